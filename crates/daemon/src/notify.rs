//! Notification capability.
//!
//! Subsystems hold a [`Notifier`] and never check whether anyone is listening:
//! the default sink is a no-op. Delivery failures are retried once per policy
//! and then logged and dropped.

use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Error raised by a sink that could not deliver a message.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Unavailable(String),
}

/// Which subsystem produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifySource {
    Encoder,
    Cleaner,
}

impl std::fmt::Display for NotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifySource::Encoder => write!(f, "encoder"),
            NotifySource::Cleaner => write!(f, "cleaner"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// A short structured status message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub source: NotifySource,
    pub level: NotifyLevel,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<(String, String)>,
}

impl Notification {
    pub fn new(source: NotifySource, level: NotifyLevel, title: impl Into<String>) -> Self {
        Self {
            source,
            level,
            title: title.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn info(source: NotifySource, title: impl Into<String>) -> Self {
        Self::new(source, NotifyLevel::Info, title)
    }

    pub fn warning(source: NotifySource, title: impl Into<String>) -> Self {
        Self::new(source, NotifyLevel::Warning, title)
    }

    pub fn error(source: NotifySource, title: impl Into<String>) -> Self {
        Self::new(source, NotifyLevel::Error, title)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Something that can carry a notification somewhere.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn deliver(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Emits notifications as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, n: &Notification) -> Result<(), NotifyError> {
        let fields = n
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        let description = n.description.as_deref().unwrap_or("");
        match n.level {
            NotifyLevel::Info => {
                info!(source = %n.source, title = %n.title, %fields, "{}", description)
            }
            NotifyLevel::Warning => {
                warn!(source = %n.source, title = %n.title, %fields, "{}", description)
            }
            NotifyLevel::Error => {
                error!(source = %n.source, title = %n.title, %fields, "{}", description)
            }
        }
        Ok(())
    }
}

/// Sink plus retry policy, shared by every subsystem.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("retry", &self.retry).finish()
    }
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), RetryPolicy::once())
    }

    /// Deliver `notification`, never failing the caller.
    pub async fn send(&self, notification: Notification) {
        let sink = &self.sink;
        let message = &notification;
        let result = self.retry.run(move |_| sink.deliver(message)).await;
        if let Err(e) = result {
            warn!(title = %notification.title, error = %e, "dropping notification");
        }
    }
}
