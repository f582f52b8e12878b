//! REST client for the Todoist API.

use chrono::NaiveDate;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::models::{NewTask, Task};
use crate::title::update_title;

/// Todoist REST API endpoint
pub const TODOIST_API_URL: &str = "https://api.todoist.com/rest/v1";

/// Header Todoist uses to deduplicate retried requests.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Errors returned by the Todoist API client.
#[derive(Debug, Error)]
pub enum TodoistError {
    /// Transport failure, timeout included
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Todoist answered with a non-success status
    #[error("Todoist API returned error status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },
}

/// Todoist REST client.
///
/// Tokens are passed per call because each webhook may belong to a
/// different user.
#[derive(Debug, Clone)]
pub struct TodoistClient {
    client: reqwest::Client,
    api_url: String,
}

impl TodoistClient {
    /// Create a client for `api_url` with a request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, TodoistError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Create a task.
    ///
    /// Only the status is checked; the created task in the response body is
    /// not needed.
    #[instrument(skip(self, token, task))]
    pub async fn create_task(
        &self,
        token: &str,
        request_id: &str,
        task: &NewTask,
    ) -> Result<(), TodoistError> {
        let response = self
            .client
            .post(format!("{}/tasks", self.api_url))
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_id)
            .json(task)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TodoistError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), "Task created");
        Ok(())
    }

    /// Recreate a completed habit with its title rewritten for `today`.
    ///
    /// Returns the task that was submitted.
    #[instrument(skip(self, token, task), fields(task_id = %task.id))]
    pub async fn duplicate_task(
        &self,
        task: &Task,
        token: &str,
        today: NaiveDate,
    ) -> Result<NewTask, TodoistError> {
        let new_task = NewTask::from_completed(task, update_title(&task.content, today));
        let request_id = task.request_id();

        self.create_task(token, &request_id, &new_task).await?;
        Ok(new_task)
    }
}
