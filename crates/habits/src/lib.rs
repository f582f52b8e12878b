//! Todoist webhook service that keeps habit tasks alive.
//!
//! When a task is completed in Todoist, the service receives an
//! `item:completed` webhook, checks whether the task is a habit and, if so,
//! creates a fresh copy with an updated title.
//!
//! This crate provides:
//! - Webhook payload parsing and HMAC-SHA256 signature verification
//! - Habit filters (safety-pin marker or a configured label)
//! - Title rewriting (progress counters and date stamps)
//! - A REST client for creating tasks in Todoist
//! - Per-user credential lookup
//! - Error reporting to an external collector
//! - HTTP server for webhook handling (standalone service)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Many async API methods can fail

pub mod client;
pub mod config;
pub mod credentials;
pub mod models;
pub mod reporting;
pub mod server;
pub mod title;
pub mod webhooks;

pub use client::TodoistClient;
pub use config::Config;
pub use credentials::CredentialStore;
pub use models::{NewTask, Task, TodoistId};
pub use reporting::{ErrorReport, Reporter};
pub use title::{date_updater, task_counter, update_title};
pub use webhooks::{check_task, verify_webhook_signature, FilterPolicy, WebhookPayload};
