use crate::error::ClientError;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const TOAST_LIFETIME: Duration = Duration::from_millis(4000);
const MAX_TOASTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub raised_at: Instant,
}

/// Receives user-facing outcomes; nothing here is persisted.
pub trait NotificationSink {
    fn notify(&mut self, notification: Notification);

    fn success(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.notify(Notification {
            level: NotificationLevel::Success,
            message: message.into(),
            raised_at: Instant::now(),
        });
    }

    fn error(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.notify(Notification {
            level: NotificationLevel::Error,
            message: message.into(),
            raised_at: Instant::now(),
        });
    }

    fn client_error(&mut self, context: &str, err: &ClientError)
    where
        Self: Sized,
    {
        let message = match err {
            ClientError::Transport(_) => format!("{context}: {err}"),
            _ => err.to_string(),
        };
        self.error(message);
    }
}

/// Short-lived toasts, newest last.
#[derive(Debug, Clone)]
pub struct ToastQueue {
    lifetime: Duration,
    toasts: VecDeque<Notification>,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(TOAST_LIFETIME)
    }
}

impl ToastQueue {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            toasts: VecDeque::new(),
        }
    }

    /// Drops toasts older than the lifetime.
    pub fn prune(&mut self, now: Instant) {
        let lifetime = self.lifetime;
        self.toasts
            .retain(|toast| now.saturating_duration_since(toast.raised_at) < lifetime);
    }

    pub fn visible(&self) -> impl Iterator<Item = &Notification> {
        self.toasts.iter()
    }

    pub fn latest(&self) -> Option<&Notification> {
        self.toasts.back()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }
}

impl NotificationSink for ToastQueue {
    fn notify(&mut self, notification: Notification) {
        self.toasts.push_back(notification);
        while self.toasts.len() > MAX_TOASTS {
            self.toasts.pop_front();
        }
    }
}
