//! Integration tests for the webhook pipeline.
//!
//! These tests run the real router on a local port, sign requests the way
//! Todoist does, and use wiremock in place of the Todoist REST API and the
//! credential store.

use async_trait::async_trait;
use chrono::Utc;
use habits::config::Config;
use habits::credentials::{CredentialStore, HttpCredentialStore, StaticCredentials};
use habits::reporting::{ErrorReport, ErrorSink, ReportError};
use habits::server::{build_router, AppState};
use habits::webhooks::{sign_webhook_body, SIGNATURE_HEADER};
use habits::{FilterPolicy, Reporter, TodoistClient, TodoistId};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "client-secret";

// =============================================================================
// Harness
// =============================================================================

/// Sink that keeps every report in memory.
#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<ErrorReport>>,
}

#[async_trait]
impl ErrorSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, report: &ErrorReport) -> Result<(), ReportError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

fn config(api_url: &str) -> Config {
    Config {
        port: 0,
        client_secret: Some(SECRET.to_string()),
        user_token: Some("static-token".to_string()),
        credential_store_url: None,
        credential_store_token: None,
        filter_policy: None,
        filter_label: None,
        api_url: api_url.to_string(),
        request_timeout_ms: 2_000,
        error_report_url: None,
        error_report_key: None,
        error_reporting_disabled: false,
    }
}

fn state(
    todoist: &MockServer,
    filter: FilterPolicy,
    credentials: Arc<dyn CredentialStore>,
    sink: &Arc<RecordingSink>,
) -> AppState {
    let config = config(&todoist.uri());
    let sink: Arc<dyn ErrorSink> = sink.clone();
    AppState {
        todoist: TodoistClient::new(&config.api_url, config.request_timeout()).unwrap(),
        config,
        filter,
        credentials,
        reporter: Arc::new(Reporter::with_sinks(vec![sink])),
    }
}

/// Start the service on a random port.
async fn start_service(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    addr
}

fn completed_event(content: &str, labels: Value) -> Value {
    json!({
        "event_name": "item:completed",
        "user_id": 2_671_355,
        "event_data": {
            "id": 2_995_104_339_u64,
            "content": content,
            "project_id": 2_203_306_141_u64,
            "section_id": 7_025,
            "parent_id": null,
            "child_order": 4,
            "labels": labels,
            "priority": 3,
            "completed_at": "2024-03-07T06:30:00Z",
            "checked": true
        },
        "initiator": {"id": 2_671_355, "full_name": "Alice"}
    })
}

async fn deliver(addr: SocketAddr, body: &[u8], signature: Option<String>) -> reqwest::Response {
    let mut request = reqwest::Client::new()
        .post(format!("http://{addr}/webhooks"))
        .header("content-type", "application/json")
        .header("x-todoist-delivery-id", "delivery-1")
        .body(body.to_vec());
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    request.send().await.unwrap()
}

async fn deliver_signed(addr: SocketAddr, event: &Value) -> reqwest::Response {
    let body = serde_json::to_vec(event).unwrap();
    let signature = sign_webhook_body(&body, SECRET);
    deliver(addr, &body, Some(signature)).await
}

/// Wait for fire-and-forget reports to land.
async fn wait_for_reports(sink: &RecordingSink, count: usize) -> Vec<ErrorReport> {
    for _ in 0..50 {
        {
            let reports = sink.reports.lock().unwrap();
            if reports.len() >= count {
                return reports.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    sink.reports.lock().unwrap().clone()
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_signed_habit_is_recreated() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(header("authorization", "Bearer static-token"))
        .and(header("x-request-id", "th-2995104339-2024-03-07T06:30:00Z"))
        .and(body_json(json!({
            "content": format!("🧷 Stretch [4/30] [{}]", today()),
            "project_id": 2_203_306_141_u64,
            "section_id": 7_025,
            "parent": null,
            "order": 4,
            "label_ids": [],
            "priority": 3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new"})))
        .expect(1)
        .mount(&todoist)
        .await;

    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let response = deliver_signed(
        addr,
        &completed_event("🧷 Stretch [3/30] [2021-04-19]", json!([])),
    )
    .await;

    assert_eq!(response.status(), 204);
    assert!(response.text().await.unwrap().is_empty());
    assert!(sink.reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_signature_is_forbidden() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&todoist)
        .await;

    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let body = serde_json::to_vec(&completed_event("🧷 Stretch [3/30]", json!([]))).unwrap();

    let wrong_key = sign_webhook_body(&body, "someone-else");
    let response = deliver(addr, &body, Some(wrong_key)).await;
    assert_eq!(response.status(), 403);
    assert!(response.text().await.unwrap().is_empty());

    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    let response = deliver(addr, &tampered, Some(sign_webhook_body(&body, SECRET))).await;
    assert_eq!(response.status(), 403);

    let response = deliver(addr, &body, None).await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_non_habit_is_acknowledged_without_call() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&todoist)
        .await;

    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let response = deliver_signed(
        addr,
        &completed_event("🔧🦾🔩 Build factory of the future", json!([])),
    )
    .await;
    assert_eq!(response.status(), 204);

    let mut added = completed_event("🧷 Stretch [3/30]", json!([]));
    added["event_name"] = json!("item:added");
    let response = deliver_signed(addr, &added).await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_malformed_payload_is_acknowledged() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let body = b"not json at all";
    let response = deliver(addr, body, Some(sign_webhook_body(body, SECRET))).await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_label_policy_recreates_labelled_task() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(body_json(json!({
            "content": "Floss [11]",
            "project_id": 2_203_306_141_u64,
            "section_id": 7_025,
            "parent": null,
            "order": 4,
            "label_ids": [1, 2_156_154_810_u64],
            "priority": 3
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&todoist)
        .await;

    let addr = start_service(state(
        &todoist,
        FilterPolicy::Label(TodoistId::Number(2_156_154_810)),
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let response = deliver_signed(
        addr,
        &completed_event("Floss [10]", json!([1, 2_156_154_810_u64])),
    )
    .await;
    assert_eq!(response.status(), 204);

    // Marker alone does not qualify under the label policy
    let response = deliver_signed(addr, &completed_event("🧷 Floss [10]", json!([1]))).await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_label_policy_matches_string_labels() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(body_json(json!({
            "content": "Floss [11]",
            "project_id": 2_203_306_141_u64,
            "section_id": 7_025,
            "parent": null,
            "order": 4,
            "label_ids": ["2156154810"],
            "priority": 3
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&todoist)
        .await;

    // Same parse FILTER_LABEL_ID goes through
    let label: TodoistId = "2156154810".parse().unwrap();
    let addr = start_service(state(
        &todoist,
        FilterPolicy::Label(label),
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let response =
        deliver_signed(addr, &completed_event("Floss [10]", json!(["2156154810"]))).await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_per_user_tokens_from_store() {
    let todoist = MockServer::start().await;
    let store = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("GET"))
        .and(path("/users/2671355"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "alice-token"})),
        )
        .mount(&store)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&store)
        .await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(header("authorization", "Bearer alice-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&todoist)
        .await;

    let credentials =
        HttpCredentialStore::new(&store.uri(), None, Duration::from_secs(2)).unwrap();
    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(credentials),
        &sink,
    ))
    .await;

    let response = deliver_signed(addr, &completed_event("🧷 Stretch [3]", json!([]))).await;
    assert_eq!(response.status(), 204);

    let mut stranger = completed_event("🧷 Stretch [3]", json!([]));
    stranger["user_id"] = json!(99);
    let response = deliver_signed(addr, &stranger).await;
    assert_eq!(response.status(), 403);

    let mut anonymous = completed_event("🧷 Stretch [3]", json!([]));
    anonymous.as_object_mut().unwrap().remove("user_id");
    let response = deliver_signed(addr, &anonymous).await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_store_outage_is_forbidden_and_reported() {
    let todoist = MockServer::start().await;
    let store = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&store)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&todoist)
        .await;

    let credentials =
        HttpCredentialStore::new(&store.uri(), None, Duration::from_secs(2)).unwrap();
    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(credentials),
        &sink,
    ))
    .await;

    let response = deliver_signed(addr, &completed_event("🧷 Stretch [3]", json!([]))).await;
    assert_eq!(response.status(), 403);

    let reports = wait_for_reports(&sink, 1).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].context.get("delivery_id").map(String::as_str),
        Some("delivery-1")
    );
}

#[tokio::test]
async fn test_upstream_failure_is_reported_but_acknowledged() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&todoist)
        .await;

    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let response = deliver_signed(addr, &completed_event("🧷 Stretch [3]", json!([]))).await;
    assert_eq!(response.status(), 204);

    let reports = wait_for_reports(&sink, 1).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].context.get("task_id").map(String::as_str),
        Some("2995104339")
    );
    assert!(reports[0].message.contains("500"));
}

#[tokio::test]
async fn test_health_and_ready() {
    let todoist = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());
    let addr = start_service(state(
        &todoist,
        FilterPolicy::Marker,
        Arc::new(StaticCredentials::new("static-token")),
        &sink,
    ))
    .await;

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "healthy"}));

    let ready = reqwest::get(format!("http://{addr}/ready")).await.unwrap();
    assert_eq!(ready.status(), 200);
}
