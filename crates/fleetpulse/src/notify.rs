//! Notification events and their broadcast fan-out.
//!
//! Everything the engine wants the UI layer to show passes through the
//! [`NotificationHub`]: a standard channel for toasts/in-app display and a
//! separate high-priority channel for blocking alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default buffer size for the broadcast channels.
const DEFAULT_CAPACITY: usize = 256;

/// Severity tier of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, no action needed.
    Info,
    /// A positive outcome (e.g. a vehicle returning to service).
    Success,
    /// Needs attention soon.
    Warning,
    /// Needs attention now.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A user-facing notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Short headline.
    pub title: String,
    /// Longer description.
    pub message: String,
    /// Severity tier.
    pub severity: Severity,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Create a notification stamped with the current time.
    #[must_use]
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Create an info notification.
    #[must_use]
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, message)
    }

    /// Create a success notification.
    #[must_use]
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Success, title, message)
    }

    /// Create a warning notification.
    #[must_use]
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, message)
    }

    /// Create an error notification.
    #[must_use]
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, message)
    }
}

/// Fan-out of notification events to in-app subscribers.
///
/// Cloneable handle; all clones share the same channels. Publishing with no
/// subscribers is a no-op, and delivery is best-effort (slow subscribers can
/// lag and lose events, matching the at-least-once, best-effort contract).
#[derive(Debug, Clone)]
pub struct NotificationHub {
    standard: broadcast::Sender<NotificationEvent>,
    priority: broadcast::Sender<NotificationEvent>,
}

impl NotificationHub {
    /// Create a hub with the given per-channel buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (standard, _) = broadcast::channel(capacity);
        let (priority, _) = broadcast::channel(capacity);
        Self { standard, priority }
    }

    /// Subscribe to the standard notification stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.standard.subscribe()
    }

    /// Subscribe to the high-priority alert stream (blocking toasts).
    #[must_use]
    pub fn subscribe_priority(&self) -> broadcast::Receiver<NotificationEvent> {
        self.priority.subscribe()
    }

    /// Publish an event to the standard stream.
    pub fn publish(&self, event: NotificationEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.standard.send(event);
    }

    /// Publish an event to the high-priority stream and the standard stream.
    pub fn publish_priority(&self, event: NotificationEvent) {
        let _ = self.priority.send(event.clone());
        let _ = self.standard.send(event);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
