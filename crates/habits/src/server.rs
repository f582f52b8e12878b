//! HTTP server for Todoist webhooks.
//!
//! The webhook route answers with an empty body and one of two statuses:
//! - `403 Forbidden` when the signature or the user's token is missing/invalid
//! - `204 No Content` otherwise, whether the task was recreated or not
//!
//! Todoist retries deliveries that do not get a 2xx, so failures past the
//! signature gate are reported through [`Reporter`] instead of surfacing to
//! the sender.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::client::{TodoistClient, TodoistError};
use crate::config::Config;
use crate::credentials::{CredentialError, CredentialStore};
use crate::models::TodoistId;
use crate::reporting::{ErrorReport, Reporter};
use crate::webhooks::{verify_webhook_signature, FilterPolicy, WebhookHeaders, WebhookPayload};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Configuration.
    pub config: Config,
    /// Habit filter.
    pub filter: FilterPolicy,
    /// Todoist API client.
    pub todoist: TodoistClient,
    /// Token source.
    pub credentials: Arc<dyn CredentialStore>,
    /// Error reporter.
    pub reporter: Arc<Reporter>,
}

/// Why an authentic event was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Body did not parse as a webhook payload
    MalformedPayload,
    /// Event is not a task completion
    NotCompletion,
    /// Task is not a habit
    FilteredOut,
}

/// Successful outcome of a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A new task was created
    Duplicated {
        /// Source task
        task_id: TodoistId,
        /// Title of the new task
        content: String,
    },
    /// Nothing to do
    Ignored(IgnoreReason),
}

/// Failures of the webhook pipeline.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature or token missing/invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    /// Token lookup failed
    #[error("Credential lookup failed: {0}")]
    Credentials(#[from] CredentialError),

    /// Creating the new task failed
    #[error("Failed to recreate task {task_id}: {source}")]
    Upstream {
        /// Source task
        task_id: TodoistId,
        /// Underlying API error
        source: TodoistError,
    },
}

impl WebhookError {
    /// Status returned to Todoist.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::Credentials(_) => StatusCode::FORBIDDEN,
            Self::Upstream { .. } => StatusCode::NO_CONTENT,
        }
    }

    /// Whether the failure belongs in the error collector.
    ///
    /// Rejected signatures are noise from the open internet and only logged.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        !matches!(self, Self::Unauthorized(_))
    }
}

/// Build the HTTP router for the habits service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(webhook_handler))
        .route("/webhooks", post(webhook_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if state.config.client_secret.is_none() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({ "status": "ready" })))
}

/// Handle incoming Todoist webhooks.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let headers = WebhookHeaders::from_header_map(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    });

    match capture_errors(&state.reporter, &headers, process_webhook(&state, &headers, &body)).await
    {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(e) => e.status_code(),
    }
}

/// Run `pipeline`, reporting any reportable failure.
///
/// The pipeline's result is returned unchanged.
pub async fn capture_errors<F>(
    reporter: &Reporter,
    headers: &WebhookHeaders,
    pipeline: F,
) -> Result<Disposition, WebhookError>
where
    F: Future<Output = Result<Disposition, WebhookError>>,
{
    let result = pipeline.await;

    match &result {
        Ok(disposition) => debug!(?disposition, "Webhook handled"),
        Err(e) if e.is_reportable() => {
            let mut report = ErrorReport::new("webhook", e.to_string());
            if let Some(delivery_id) = &headers.delivery_id {
                report = report.with_context("delivery_id", delivery_id);
            }
            if let WebhookError::Upstream { task_id, .. } = e {
                report = report.with_context("task_id", task_id);
            }
            reporter.capture(report);
        }
        Err(e) => warn!(error = %e, "Webhook rejected"),
    }

    result
}

/// Verify, filter and recreate.
///
/// This handler:
/// 1. Verifies the webhook signature
/// 2. Resolves the access token for the event's user
/// 3. Checks the habit filter
/// 4. Creates the rewritten copy
pub async fn process_webhook(
    state: &AppState,
    headers: &WebhookHeaders,
    body: &[u8],
) -> Result<Disposition, WebhookError> {
    let delivery_id = headers.delivery_id.as_deref().unwrap_or("unknown");
    info!(delivery_id = %delivery_id, "Received Todoist webhook");

    let Some(secret) = state.config.client_secret.as_deref() else {
        return Err(WebhookError::Unauthorized("no client secret configured"));
    };
    let Some(signature) = headers.signature.as_deref() else {
        return Err(WebhookError::Unauthorized("missing signature header"));
    };
    if !verify_webhook_signature(body, signature, secret) {
        return Err(WebhookError::Unauthorized("invalid signature"));
    }
    debug!("Webhook signature verified");

    let payload: WebhookPayload = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Failed to parse webhook payload");
            return Ok(Disposition::Ignored(IgnoreReason::MalformedPayload));
        }
    };

    let token = state
        .credentials
        .access_token(payload.user_id.as_ref())
        .await?
        .ok_or(WebhookError::Unauthorized("no access token for user"))?;

    let task = &payload.event_data;

    if !payload.is_completion() {
        debug!(event_name = ?payload.event_name, "Ignoring non-completion event");
        return Ok(Disposition::Ignored(IgnoreReason::NotCompletion));
    }

    if !state.filter.qualifies(task) {
        debug!(
            task_id = %task.id,
            policy = state.filter.name(),
            "Task is not a habit"
        );
        return Ok(Disposition::Ignored(IgnoreReason::FilteredOut));
    }

    let today = Utc::now().date_naive();
    let new_task = state
        .todoist
        .duplicate_task(task, &token, today)
        .await
        .map_err(|source| WebhookError::Upstream {
            task_id: task.id.clone(),
            source,
        })?;

    info!(
        task_id = %task.id,
        content = %new_task.content,
        "Habit task recreated"
    );

    Ok(Disposition::Duplicated {
        task_id: task.id.clone(),
        content: new_task.content,
    })
}
