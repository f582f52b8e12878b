//! Todoist entity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier as sent by Todoist.
///
/// The REST v1 API and older webhooks use integers, newer payloads use
/// strings. Both are accepted and serialized back in the shape they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TodoistId {
    /// Numeric identifier
    Number(u64),
    /// String identifier (or label name)
    Text(String),
}

impl TodoistId {
    /// Whether both identifiers name the same entity.
    ///
    /// `Number(n)` and `Text("n")` are the same ID sent in different shapes.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(n), Self::Text(s)) | (Self::Text(s), Self::Number(n)) => {
                *s == n.to_string()
            }
        }
    }
}

impl fmt::Display for TodoistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for TodoistId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(trimmed
            .parse::<u64>()
            .map_or_else(|_| Self::Text(trimmed.to_string()), Self::Number))
    }
}

impl From<u64> for TodoistId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for TodoistId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

const fn default_priority() -> u8 {
    1
}

/// Task snapshot carried in `event_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID
    pub id: TodoistId,
    /// Task title
    pub content: String,
    /// Owning project
    pub project_id: TodoistId,
    /// Section within the project
    #[serde(default)]
    pub section_id: Option<TodoistId>,
    /// Parent task for sub-tasks
    #[serde(default)]
    pub parent_id: Option<TodoistId>,
    /// Position among siblings
    #[serde(default)]
    pub child_order: i64,
    /// Labels attached to the task
    #[serde(default)]
    pub labels: Vec<TodoistId>,
    /// Priority (1 = normal, 4 = urgent)
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Completion timestamp, present on `item:completed` events
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Task {
    /// Deterministic `X-Request-Id` for recreating this task.
    ///
    /// Redelivery of the same completion yields the same id so Todoist drops
    /// the duplicate; a later completion carries a new `completed_at` and
    /// therefore a new id.
    #[must_use]
    pub fn request_id(&self) -> String {
        match self.completed_at.as_deref().filter(|c| !c.is_empty()) {
            Some(completed_at) => format!("th-{}-{completed_at}", self.id),
            None => format!("thid{}", self.id),
        }
    }

    /// Whether the task carries the given label.
    #[must_use]
    pub fn has_label(&self, label: &TodoistId) -> bool {
        self.labels.iter().any(|l| l.same_as(label))
    }
}

/// Body of a task creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task title
    pub content: String,
    /// Owning project
    pub project_id: TodoistId,
    /// Section within the project
    pub section_id: Option<TodoistId>,
    /// Parent task
    pub parent: Option<TodoistId>,
    /// Position among siblings
    pub order: i64,
    /// Labels
    pub label_ids: Vec<TodoistId>,
    /// Priority
    pub priority: u8,
}

impl NewTask {
    /// Build the copy of a completed task with a new title.
    ///
    /// Everything except `content` is taken verbatim from the source task.
    #[must_use]
    pub fn from_completed(task: &Task, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            project_id: task.project_id.clone(),
            section_id: task.section_id.clone(),
            parent: task.parent_id.clone(),
            order: task.child_order,
            label_ids: task.labels.clone(),
            priority: task.priority,
        }
    }
}
