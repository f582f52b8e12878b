//! Error reporting to an external collector.
//!
//! Failures that the webhook sender never sees (Todoist API errors, credential
//! store outages) are handed to a [`Reporter`]. The reporter is built once at
//! startup and shared by every request.
//!
//! # Configuration
//!
//! - `ERROR_REPORT_URL`: collector endpoint (enables the webhook sink)
//! - `ERROR_REPORT_KEY`: sent as `X-Api-Key`
//! - `ERROR_REPORT_DISABLED`: set to "true" to disable reporting

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::Config;

/// Errors that can occur when delivering a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Collector rejected the report
    #[error("Collector returned error status {0}")]
    Status(u16),
}

/// A single captured failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Component that failed
    pub source: String,
    /// Error message
    pub message: String,
    /// Structured context (task ID, delivery ID, ...)
    pub context: BTreeMap<String, String>,
    /// When the failure was captured
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    /// Create a report stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a context value.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

/// Destination for error reports.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Get the name of this sink.
    fn name(&self) -> &'static str;

    /// Deliver a report.
    async fn send(&self, report: &ErrorReport) -> Result<(), ReportError>;
}

/// Posts reports as JSON to an HTTP collector.
pub struct WebhookErrorSink {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WebhookErrorSink {
    /// Create a sink for `url`.
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ErrorSink for WebhookErrorSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, report: &ErrorReport) -> Result<(), ReportError> {
        let mut request = self.client.post(&self.url).json(report);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ReportError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Process-wide error dispatcher.
///
/// Every captured report is logged; sinks receive it in the background.
pub struct Reporter {
    sinks: Vec<Arc<dyn ErrorSink>>,
    disabled: bool,
}

impl Reporter {
    /// Create a reporter from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ReportError> {
        if config.error_reporting_disabled {
            info!("Error reporting disabled via ERROR_REPORT_DISABLED");
            return Ok(Self::disabled());
        }

        let mut sinks: Vec<Arc<dyn ErrorSink>> = vec![];

        if let Some(url) = &config.error_report_url {
            let sink = WebhookErrorSink::new(
                url.clone(),
                config.error_report_key.clone(),
                config.request_timeout(),
            )?;
            info!("Webhook error reporting enabled");
            sinks.push(Arc::new(sink));
        } else {
            debug!("Error reporting to logs only (ERROR_REPORT_URL not set)");
        }

        Ok(Self::with_sinks(sinks))
    }

    /// Create a reporter with specific sinks.
    #[must_use]
    pub fn with_sinks(sinks: Vec<Arc<dyn ErrorSink>>) -> Self {
        Self {
            sinks,
            disabled: false,
        }
    }

    /// Create a disabled reporter (for testing or when reporting is off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            sinks: vec![],
            disabled: true,
        }
    }

    /// Get the number of active sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.sinks.len()
        }
    }

    /// Capture a report (fire-and-forget).
    ///
    /// Delivery failures are logged but not propagated to the caller.
    pub fn capture(&self, report: ErrorReport) {
        error!(
            source = %report.source,
            context = ?report.context,
            "{}",
            report.message
        );

        if self.disabled || self.sinks.is_empty() {
            return;
        }

        let report = Arc::new(report);

        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let report = Arc::clone(&report);

            tokio::spawn(async move {
                match sink.send(&report).await {
                    Ok(()) => debug!(sink = sink.name(), "Error report delivered"),
                    Err(e) => error!(sink = sink.name(), error = %e, "Failed to deliver error report"),
                }
            });
        }
    }

    /// Capture a report and wait for every sink.
    pub async fn capture_and_wait(
        &self,
        report: ErrorReport,
    ) -> Vec<(String, Result<(), ReportError>)> {
        if self.disabled {
            return vec![];
        }

        let mut results = vec![];
        for sink in &self.sinks {
            results.push((sink.name().to_string(), sink.send(&report).await));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_disabled_reporter() {
        let reporter = Reporter::disabled();
        assert_eq!(reporter.sink_count(), 0);
        // Must not panic without a runtime
        reporter.capture(ErrorReport::new("test", "boom"));
    }

    #[test]
    fn test_report_context() {
        let report = ErrorReport::new("duplicator", "Todoist API returned 500")
            .with_context("task_id", 42)
            .with_context("delivery_id", "abc");

        assert_eq!(report.context.get("task_id").map(String::as_str), Some("42"));
        assert_eq!(report.context.len(), 2);
    }

    #[tokio::test]
    async fn test_webhook_sink_posts_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reports"))
            .and(header("x-api-key", "k"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookErrorSink::new(
            format!("{}/reports", server.uri()),
            Some("k".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();
        let reporter = Reporter::with_sinks(vec![Arc::new(sink)]);

        let results = reporter
            .capture_and_wait(ErrorReport::new("test", "boom"))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_sink_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let sink = WebhookErrorSink::new(server.uri(), None, Duration::from_secs(2)).unwrap();
        let err = sink.send(&ErrorReport::new("test", "boom")).await.unwrap_err();
        assert!(matches!(err, ReportError::Status(401)));
    }
}
