//! Access token lookup.
//!
//! Todoist tasks must be created with the token of the account that completed
//! them. Three sources are supported:
//!
//! - [`StaticCredentials`] - one token for every event (single-tenant)
//! - [`InMemoryCredentials`] - a fixed user → token map
//! - [`HttpCredentialStore`] - a document store holding `users/<id>` records
//!   with an `access_token` field

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{Config, ConfigError};
use crate::models::TodoistId;

/// Errors that can occur when looking up a token.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Base URL cannot carry a path
    #[error("Invalid credential store URL: {0}")]
    InvalidUrl(String),

    /// Store answered with an unexpected status
    #[error("Credential store returned error status {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },
}

/// Read-only source of per-user access tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Look up the token for `user_id`.
    ///
    /// `Ok(None)` means no token is known; callers reject the request.
    async fn access_token(
        &self,
        user_id: Option<&TodoistId>,
    ) -> Result<Option<String>, CredentialError>;
}

/// Single token used for every event.
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    /// Create a static credential source.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn access_token(
        &self,
        _user_id: Option<&TodoistId>,
    ) -> Result<Option<String>, CredentialError> {
        Ok(Some(self.token.clone()).filter(|t| !t.is_empty()))
    }
}

/// Fixed map of user IDs to tokens.
#[derive(Default)]
pub struct InMemoryCredentials {
    tokens: HashMap<String, String>,
}

impl InMemoryCredentials {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token for a user.
    #[must_use]
    pub fn with_token(mut self, user_id: impl Into<TodoistId>, token: impl Into<String>) -> Self {
        self.tokens
            .insert(user_id.into().to_string(), token.into());
        self
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentials {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn access_token(
        &self,
        user_id: Option<&TodoistId>,
    ) -> Result<Option<String>, CredentialError> {
        Ok(user_id.and_then(|id| self.tokens.get(&id.to_string()).cloned()))
    }
}

/// Per-user token records served by a document store over HTTP.
///
/// `GET <base>/users/<id>` must return a JSON document with an
/// `access_token` field, either flat or Firestore-style
/// (`fields.access_token.stringValue`).
#[derive(Debug, Clone)]
pub struct HttpCredentialStore {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpCredentialStore {
    /// Create a store client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| CredentialError::InvalidUrl(base_url.to_string()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// `<base>/users/<id>`, with the ID encoded as a single path segment.
    fn user_url(&self, user_id: &TodoistId) -> Result<Url, CredentialError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CredentialError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("users")
            .push(&user_id.to_string());
        Ok(url)
    }

    fn extract_token(document: &Value) -> Option<String> {
        document
            .get("access_token")
            .and_then(Value::as_str)
            .or_else(|| {
                document
                    .pointer("/fields/access_token/stringValue")
                    .and_then(Value::as_str)
            })
            .filter(|t| !t.is_empty())
            .map(String::from)
    }
}

#[async_trait]
impl CredentialStore for HttpCredentialStore {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self))]
    async fn access_token(
        &self,
        user_id: Option<&TodoistId>,
    ) -> Result<Option<String>, CredentialError> {
        let Some(user_id) = user_id else {
            debug!("No user ID in event, cannot look up token");
            return Ok(None);
        };

        let mut request = self.client.get(self.user_url(user_id)?);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!("No credential record for user");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CredentialError::Status {
                status: status.as_u16(),
            });
        }

        let document: Value = response.json().await?;
        Ok(Self::extract_token(&document))
    }
}

/// Build the credential source selected by configuration.
///
/// A credential store URL takes precedence over a static token.
pub fn from_config(config: &Config) -> Result<Arc<dyn CredentialStore>, ConfigError> {
    if let Some(url) = &config.credential_store_url {
        let store = HttpCredentialStore::new(
            url,
            config.credential_store_token.clone(),
            config.request_timeout(),
        )
        .map_err(|e| ConfigError::Invalid(format!("credential store client: {e}")))?;
        return Ok(Arc::new(store));
    }

    match &config.user_token {
        Some(token) => Ok(Arc::new(StaticCredentials::new(token.clone()))),
        None => Err(ConfigError::MissingCredentials),
    }
}
