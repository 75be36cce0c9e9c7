#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod notify;
pub mod progress;
pub mod reminders;
pub mod sessions;
pub mod stats;

pub use study_core::Clock;

pub use app_services::AppServices;
pub use error::{AppServicesError, NotifyError, SchedulingError};
pub use notify::{
    LogSink, NotificationSink, RecordingSink, ReminderNotification, WebhookConfig, WebhookSink,
};
pub use progress::{ProgressService, ProgressUpdate};
pub use reminders::{ReminderHandle, ReminderScheduler};
pub use sessions::SessionService;
pub use stats::{CategoryStats, StatsService};
