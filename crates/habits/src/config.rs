//! Configuration for the habits service.

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::client::TODOIST_API_URL;
use crate::models::TodoistId;
use crate::webhooks::FilterPolicy;

/// Configuration problems detected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No HMAC secret configured
    #[error("CLIENT_SECRET is not set; webhooks cannot be verified")]
    MissingSecret,

    /// Neither a static token nor a credential store configured
    #[error("Neither USER_TOKEN nor CREDENTIAL_STORE_URL is set")]
    MissingCredentials,

    /// Label policy selected without a label
    #[error("FILTER_POLICY=label requires FILTER_LABEL_ID")]
    MissingFilterLabel,

    /// Unrecognised filter policy name
    #[error("Unknown FILTER_POLICY '{0}' (expected 'marker' or 'label')")]
    UnknownFilterPolicy(String),

    /// Any other invalid value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Habits webhook handler configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Todoist app client secret used to sign webhooks.
    pub client_secret: Option<String>,
    /// Static bearer token (single-tenant deployments).
    pub user_token: Option<String>,
    /// Base URL of the per-user token store.
    pub credential_store_url: Option<String>,
    /// Bearer token for the credential store.
    pub credential_store_token: Option<String>,
    /// Explicit filter policy name (`marker` or `label`).
    pub filter_policy: Option<String>,
    /// Label that marks habit tasks under the label policy.
    pub filter_label: Option<String>,
    /// Todoist REST base URL.
    pub api_url: String,
    /// Timeout for outbound calls in milliseconds.
    pub request_timeout_ms: u64,
    /// Error-reporting endpoint.
    pub error_report_url: Option<String>,
    /// Error-reporting API key.
    pub error_report_key: Option<String>,
    /// Whether error reporting is switched off.
    pub error_reporting_disabled: bool,
}

/// First non-empty value among `names`.
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env::var("HABITS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            client_secret: env_any(&["CLIENT_SECRET", "TODOIST_CLIENT_SECRET"]),
            user_token: env_any(&["USER_TOKEN", "TODOIST_ACCESS_TOKEN"]),
            credential_store_url: env_any(&["CREDENTIAL_STORE_URL"]),
            credential_store_token: env_any(&["CREDENTIAL_STORE_TOKEN"]),
            filter_policy: env_any(&["FILTER_POLICY"]),
            filter_label: env_any(&["FILTER_LABEL_ID"]),
            api_url: env_any(&["TODOIST_API_URL"]).unwrap_or_else(|| TODOIST_API_URL.to_string()),
            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),
            error_report_url: env_any(&["ERROR_REPORT_URL"]),
            error_report_key: env_any(&["ERROR_REPORT_KEY"]),
            error_reporting_disabled: env::var("ERROR_REPORT_DISABLED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Timeout applied to every outbound call.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve the habit filter.
    ///
    /// Without an explicit policy, a configured label selects the label
    /// policy and the safety-pin marker is used otherwise.
    pub fn filter(&self) -> Result<FilterPolicy, ConfigError> {
        let label = self
            .filter_label
            .as_deref()
            .and_then(|l| l.parse::<TodoistId>().ok());

        match self.filter_policy.as_deref().map(str::to_ascii_lowercase) {
            None => Ok(label.map_or(FilterPolicy::Marker, FilterPolicy::Label)),
            Some(name) if name == "marker" => Ok(FilterPolicy::Marker),
            Some(name) if name == "label" => label
                .map(FilterPolicy::Label)
                .ok_or(ConfigError::MissingFilterLabel),
            Some(name) => Err(ConfigError::UnknownFilterPolicy(name)),
        }
    }

    /// Check that the service can run with this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_secret.is_none() {
            return Err(ConfigError::MissingSecret);
        }
        if self.user_token.is_none() && self.credential_store_url.is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        self.filter().map(|_| ())
    }
}
