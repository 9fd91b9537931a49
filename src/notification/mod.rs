//! Event fan-out to user-facing notification channels. Best effort, no
//! retry: a delivery failure is logged and dropped, it never blocks the
//! caller or re-enters a queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    JobCompleted,
    JobFailed,
    JobCancelled,
    ModerationEnforced,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: String,
    pub category: NotificationCategory,
    pub job_id: Uuid,
    pub message: String,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Per-user, per-category opt-out. Defaults to enabled for every category
/// that isn't explicitly disabled.
#[derive(Default)]
pub struct PreferenceStore {
    disabled: RwLock<HashMap<(String, NotificationCategory), bool>>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: &str, category: NotificationCategory, enabled: bool) {
        self.disabled
            .write()
            .await
            .insert((user_id.to_string(), category), !enabled);
    }

    pub async fn is_enabled(&self, user_id: &str, category: NotificationCategory) -> bool {
        !self
            .disabled
            .read()
            .await
            .get(&(user_id.to_string(), category))
            .copied()
            .unwrap_or(false)
    }
}

pub struct NotificationDispatcher {
    channel: Arc<dyn NotificationChannel>,
    preferences: Arc<PreferenceStore>,
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>, preferences: Arc<PreferenceStore>) -> Self {
        Self {
            channel,
            preferences,
        }
    }

    pub async fn dispatch(&self, notification: Notification) {
        if !self
            .preferences
            .is_enabled(&notification.user_id, notification.category)
            .await
        {
            tracing::debug!(
                user_id = %notification.user_id,
                ?notification.category,
                "notification suppressed by preference"
            );
            return;
        }

        if let Err(e) = self.channel.deliver(&notification).await {
            tracing::warn!(
                user_id = %notification.user_id,
                ?notification.category,
                error = %e,
                "notification delivery failed, dropping"
            );
        }
    }
}

/// Logs notifications instead of sending them anywhere. Real deployments
/// swap this for a webhook/email/push channel; nothing else in this module
/// depends on the concrete transport.
pub struct LoggingChannel;

#[async_trait]
impl NotificationChannel for LoggingChannel {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            ?notification.category,
            job_id = %notification.job_id,
            message = %notification.message,
            "notification delivered"
        );
        Ok(())
    }
}
