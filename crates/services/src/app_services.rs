//! Wiring of storage, sinks, and services for an application shell.

use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::notify::{LogSink, NotificationSink, WebhookSink};
use crate::progress::ProgressService;
use crate::reminders::ReminderScheduler;
use crate::sessions::SessionService;
use crate::stats::StatsService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    reminders: ReminderScheduler,
    session_service: Arc<SessionService>,
    progress_service: Arc<ProgressService>,
    stats_service: Arc<StatsService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// Reminders are delivered to the webhook configured through
    /// `STUDY_WEBHOOK_URL`, or to the log when none is set.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(storage, clock, sink_from_env()))
    }

    /// Build services over already-initialized storage and a chosen sink.
    #[must_use]
    pub fn new(storage: Storage, clock: Clock, sink: Arc<dyn NotificationSink>) -> Self {
        let reminders = ReminderScheduler::new(clock, Arc::clone(&storage.sessions), sink);
        let session_service = Arc::new(SessionService::new(
            clock,
            Arc::clone(&storage.sessions),
            reminders.clone(),
        ));
        let progress_service =
            Arc::new(ProgressService::new(clock, Arc::clone(&storage.sessions)));
        let stats_service = Arc::new(StatsService::new(Arc::clone(&storage.sessions)));

        Self {
            reminders,
            session_service,
            progress_service,
            stats_service,
        }
    }

    /// Re-arm every persisted, unfired reminder after a restart.
    ///
    /// Returns the number of timers armed.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if pending reminders cannot be listed.
    pub async fn restore_reminders(&self) -> Result<usize, AppServicesError> {
        let handles = self.reminders.rearm_pending().await?;
        Ok(handles.len())
    }

    #[must_use]
    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    #[must_use]
    pub fn session_service(&self) -> Arc<SessionService> {
        Arc::clone(&self.session_service)
    }

    #[must_use]
    pub fn progress_service(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress_service)
    }

    #[must_use]
    pub fn stats_service(&self) -> Arc<StatsService> {
        Arc::clone(&self.stats_service)
    }
}

fn sink_from_env() -> Arc<dyn NotificationSink> {
    let webhook = WebhookSink::from_env();
    if webhook.enabled() {
        Arc::new(webhook)
    } else {
        Arc::new(LogSink)
    }
}
