//! Webhook payload parsing, signature verification and habit filters.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::models::{Task, TodoistId};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-todoist-hmac-sha256";

/// Header carrying Todoist's delivery identifier.
pub const DELIVERY_HEADER: &str = "x-todoist-delivery-id";

/// Event name Todoist sends when a task is checked off.
pub const COMPLETED_EVENT: &str = "item:completed";

/// Opt-in marker for habit tasks (🧷).
pub const SAFETY_PIN: char = '\u{1F9F7}';

/// Verify a Todoist webhook signature using HMAC-SHA256.
///
/// # Arguments
/// * `body` - Raw webhook body bytes
/// * `signature` - Base64-encoded signature from `X-Todoist-Hmac-Sha256` header
/// * `secret` - App client secret
///
/// # Returns
/// `true` if signature is valid, `false` otherwise
#[must_use]
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(signature_bytes) = STANDARD.decode(signature.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    // Length mismatch compares unequal without leaking content
    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Compute the signature Todoist would send for `body`.
#[must_use]
pub fn sign_webhook_body(body: &[u8], secret: &str) -> String {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map(|mut mac| {
            mac.update(body);
            STANDARD.encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default()
}

/// Whether a title carries the safety-pin marker.
#[must_use]
pub fn check_task(title: &str) -> bool {
    title.contains(SAFETY_PIN)
}

/// Rule deciding which completed tasks are habits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Title contains [`SAFETY_PIN`]
    Marker,
    /// Task carries the given label
    Label(TodoistId),
}

impl FilterPolicy {
    /// Check whether the task should be recreated.
    #[must_use]
    pub fn qualifies(&self, task: &Task) -> bool {
        match self {
            Self::Marker => check_task(&task.content),
            Self::Label(label) => task.has_label(label),
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::Label(_) => "label",
        }
    }
}

/// Main webhook payload structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event name (e.g. `item:completed`)
    #[serde(default)]
    pub event_name: Option<String>,
    /// Account the event belongs to
    #[serde(default)]
    pub user_id: Option<TodoistId>,
    /// Task the event is about
    pub event_data: Task,
    /// User who triggered the event
    #[serde(default)]
    pub initiator: Option<Value>,
}

impl WebhookPayload {
    /// Check if this is a completion event.
    ///
    /// Payloads without an event name are treated as completions; the app's
    /// webhook subscription only delivers `item:completed`.
    #[must_use]
    pub fn is_completion(&self) -> bool {
        self.event_name
            .as_deref()
            .is_none_or(|name| name == COMPLETED_EVENT)
    }
}

/// Parsed webhook headers
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    /// Unique delivery ID
    pub delivery_id: Option<String>,
    /// HMAC signature
    pub signature: Option<String>,
}

impl WebhookHeaders {
    /// Parse headers from a request
    #[must_use]
    pub fn from_header_map(get_header: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            delivery_id: get_header(DELIVERY_HEADER),
            signature: get_header(SIGNATURE_HEADER),
        }
    }
}
