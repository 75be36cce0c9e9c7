//! Delivery of reminder notifications to an external sink.

use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use study_core::model::{OwnerId, SessionCategory, SessionId, SessionInstance};

use crate::error::NotifyError;

/// Payload delivered to the notification sink when a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderNotification {
    pub session_id: SessionId,
    pub title: String,
    pub category: SessionCategory,
    pub message: String,
}

impl ReminderNotification {
    /// Builds the payload for a session's armed reminder.
    ///
    /// Returns `None` when the session has no reminder.
    #[must_use]
    pub fn for_session(session: &SessionInstance) -> Option<Self> {
        let reminder = session.reminder()?;
        let message = format!(
            "Your {} session \"{}\" starts in {} minutes",
            session.category(),
            session.title(),
            reminder.lead_minutes()
        );
        Some(Self {
            session_id: session.id(),
            title: session.title().to_owned(),
            category: session.category(),
            message,
        })
    }
}

/// Destination for fired reminders.
///
/// Delivery failures are reported to the caller but never retried here;
/// retry policy belongs to the receiving side.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification to the owner.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` when delivery fails.
    async fn send(
        &self,
        owner_id: OwnerId,
        notification: &ReminderNotification,
    ) -> Result<(), NotifyError>;
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl WebhookConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let url = env::var("STUDY_WEBHOOK_URL").ok()?;
        if url.trim().is_empty() {
            return None;
        }
        let timeout_secs = env::var("STUDY_WEBHOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(10);
        Some(Self { url, timeout_secs })
    }
}

/// Posts reminder notifications to a configured webhook.
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    config: Option<WebhookConfig>,
}

impl WebhookSink {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(WebhookConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<WebhookConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(
        &self,
        owner_id: OwnerId,
        notification: &ReminderNotification,
    ) -> Result<(), NotifyError> {
        let config = self.config.as_ref().ok_or(NotifyError::Disabled)?;

        let payload = WebhookEnvelope {
            owner_id,
            session_id: notification.session_id,
            title: &notification.title,
            category: notification.category,
            message: &notification.message,
        };

        let response = self
            .client
            .post(&config.url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status()));
        }

        Ok(())
    }
}

/// Writes reminder notifications to the application log.
///
/// Used when no webhook is configured, so fired reminders stay observable.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(
        &self,
        owner_id: OwnerId,
        notification: &ReminderNotification,
    ) -> Result<(), NotifyError> {
        info!(
            owner_id = %owner_id,
            session_id = %notification.session_id,
            category = notification.category.as_str(),
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Captures notifications in memory for inspection.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<(OwnerId, ReminderNotification)>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every notification delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(OwnerId, ReminderNotification)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(
        &self,
        owner_id: OwnerId,
        notification: &ReminderNotification,
    ) -> Result<(), NotifyError> {
        match self.sent.lock() {
            Ok(mut guard) => guard.push((owner_id, notification.clone())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((owner_id, notification.clone())),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookEnvelope<'a> {
    owner_id: OwnerId,
    session_id: SessionId,
    title: &'a str,
    category: SessionCategory,
    message: &'a str,
}
