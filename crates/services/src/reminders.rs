//! Arms one timer task per session reminder and fires each at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use storage::repository::{SessionRepository, StorageError};
use study_core::Clock;
use study_core::model::{OwnerId, ProgressStatus, SessionId, SessionInstance};

use crate::notify::{NotificationSink, ReminderNotification};

/// Upper bound on a single timer sleep; the task re-reads the clock between
/// slices so the deadline tracks the injected time source.
const WAIT_CHUNK: Duration = Duration::from_secs(86_400);

/// Opaque claim on one armed reminder.
///
/// Stale handles (superseded by a re-arm) cancel nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderHandle {
    session_id: SessionId,
    version: u64,
}

impl ReminderHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

struct ArmedEntry {
    version: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

type ArmedMap = HashMap<SessionId, ArmedEntry>;

/// Owns every pending reminder timer.
///
/// Each armed reminder is an independent task that waits until its fire
/// time or cancellation, whichever comes first. Firing claims the persisted
/// `fired` flag before touching the sink, so a reminder is delivered at most
/// once even when a re-arm or cancel races the timer.
#[derive(Clone)]
pub struct ReminderScheduler {
    clock: Clock,
    sessions: Arc<dyn SessionRepository>,
    sink: Arc<dyn NotificationSink>,
    armed: Arc<Mutex<ArmedMap>>,
    next_version: Arc<AtomicU64>,
}

impl ReminderScheduler {
    #[must_use]
    pub fn new(
        clock: Clock,
        sessions: Arc<dyn SessionRepository>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            clock,
            sessions,
            sink,
            armed: Arc::new(Mutex::new(HashMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Arms a timer for the session's reminder.
    ///
    /// Returns `None` without arming when the session has no reminder, the
    /// reminder already fired, the session was already acted on, or the
    /// session's start time has passed. A fire time in the past with the
    /// session not yet started fires immediately rather than being dropped.
    ///
    /// Arming a session that already holds a timer replaces it.
    pub fn arm(&self, session: &SessionInstance) -> Option<ReminderHandle> {
        let reminder = session.reminder()?;
        if reminder.fired() {
            return None;
        }
        if session.progress().status() != ProgressStatus::NotStarted {
            return None;
        }
        let fire_at = session.reminder_fire_at()?;
        let now = self.clock.now();
        if fire_at <= now && session.start_time() <= now {
            return None;
        }
        let notification = ReminderNotification::for_session(session)?;

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let task = FiringTask {
            clock: self.clock,
            sessions: Arc::clone(&self.sessions),
            sink: Arc::clone(&self.sink),
            armed: Arc::clone(&self.armed),
            token: token.clone(),
            version,
            owner_id: session.owner_id(),
            notification,
            fire_at,
        };

        let session_id = session.id();
        // Insert under the same lock the task's self-cleanup takes, so an
        // immediately-firing task cannot finish before its entry exists.
        let mut armed = lock_armed(&self.armed);
        if let Some(previous) = armed.remove(&session_id) {
            previous.token.cancel();
        }
        let handle = tokio::spawn(task.run());
        armed.insert(
            session_id,
            ArmedEntry {
                version,
                token,
                task: handle,
            },
        );

        Some(ReminderHandle {
            session_id,
            version,
        })
    }

    /// Cancels the reminder the handle refers to.
    ///
    /// Idempotent: a handle that is stale, already canceled, or already
    /// fired cancels nothing and never errors.
    pub fn cancel(&self, handle: ReminderHandle) {
        let mut armed = lock_armed(&self.armed);
        let current = armed
            .get(&handle.session_id)
            .is_some_and(|entry| entry.version == handle.version);
        if current {
            if let Some(entry) = armed.remove(&handle.session_id) {
                entry.token.cancel();
            }
        }
    }

    /// Cancels whatever timer the session currently holds, if any.
    pub fn cancel_for_session(&self, session_id: SessionId) {
        let mut armed = lock_armed(&self.armed);
        if let Some(entry) = armed.remove(&session_id) {
            entry.token.cancel();
        }
    }

    /// Re-arms every persisted reminder that has not fired yet.
    ///
    /// Meant for startup, after which in-memory timers and the store agree.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the pending reminders cannot be listed.
    pub async fn rearm_pending(&self) -> Result<Vec<ReminderHandle>, StorageError> {
        let sessions = self.sessions.list_unfired_reminders().await?;
        let mut handles = Vec::new();
        for session in &sessions {
            if let Some(handle) = self.arm(session) {
                handles.push(handle);
            }
        }
        info!(armed = handles.len(), "re-armed pending reminders");
        Ok(handles)
    }

    #[must_use]
    pub fn is_armed(&self, session_id: SessionId) -> bool {
        lock_armed(&self.armed).contains_key(&session_id)
    }

    #[must_use]
    pub fn armed_count(&self) -> usize {
        lock_armed(&self.armed).len()
    }

    /// Cancels all timers and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<ArmedEntry> = {
            let mut armed = lock_armed(&self.armed);
            armed.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.token.cancel();
        }
        for entry in entries {
            // A finished task just returns; panics are not propagated.
            let _ = entry.task.await;
        }
    }
}

struct FiringTask {
    clock: Clock,
    sessions: Arc<dyn SessionRepository>,
    sink: Arc<dyn NotificationSink>,
    armed: Arc<Mutex<ArmedMap>>,
    token: CancellationToken,
    version: u64,
    owner_id: OwnerId,
    notification: ReminderNotification,
    fire_at: DateTime<Utc>,
}

impl FiringTask {
    async fn run(self) {
        let session_id = self.notification.session_id;

        loop {
            let now = self.clock.now();
            if now >= self.fire_at {
                break;
            }
            let wait = (self.fire_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(WAIT_CHUNK);
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        // A cancel that lands between the final wake and here still wins.
        if self.token.is_cancelled() {
            return;
        }

        match self.sessions.claim_reminder_fired(session_id).await {
            Ok(true) => {
                if let Err(error) = self.sink.send(self.owner_id, &self.notification).await {
                    warn!(
                        session_id = %session_id,
                        error = %error,
                        "reminder delivery failed"
                    );
                }
            }
            Ok(false) => {}
            Err(error) => {
                warn!(
                    session_id = %session_id,
                    error = %error,
                    "could not record reminder attempt"
                );
            }
        }

        let mut armed = lock_armed(&self.armed);
        let current = armed
            .get(&session_id)
            .is_some_and(|entry| entry.version == self.version);
        if current {
            armed.remove(&session_id);
        }
    }
}

fn lock_armed(armed: &Mutex<ArmedMap>) -> MutexGuard<'_, ArmedMap> {
    match armed.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use storage::repository::{InMemoryRepository, NewSession};
    use study_core::model::{ReminderSpec, SessionCategory, SessionDraft};
    use study_core::time::fixed_now;

    use crate::notify::RecordingSink;

    use super::*;

    fn draft(start: DateTime<Utc>, lead_minutes: u32) -> SessionDraft {
        SessionDraft {
            title: "Flashcard catch-up".to_owned(),
            category: SessionCategory::Review,
            start_time: start,
            end_time: start + ChronoDuration::minutes(60),
            description: None,
            course_id: None,
            recurrence: None,
            reminder: Some(ReminderSpec { lead_minutes }),
        }
    }

    async fn persist(
        repo: &InMemoryRepository,
        start: DateTime<Utc>,
        lead_minutes: u32,
    ) -> SessionInstance {
        let definition = draft(start, lead_minutes)
            .validate(fixed_now() - ChronoDuration::days(1))
            .expect("valid draft");
        let occurrence = study_core::recurrence::Occurrence {
            start_time: definition.start_time,
            end_time: definition.end_time,
        };
        let new_session =
            NewSession::from_definition(OwnerId::new(1), &definition, occurrence, None);
        repo.insert(new_session).await.expect("insert session")
    }

    fn build_scheduler(
        repo: Arc<InMemoryRepository>,
        sink: RecordingSink,
        now: DateTime<Utc>,
    ) -> ReminderScheduler {
        ReminderScheduler::new(Clock::fixed(now), repo, Arc::new(sink))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..40 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn arm_without_reminder_returns_none() {
        let repo = Arc::new(InMemoryRepository::new());
        let definition = SessionDraft {
            reminder: None,
            ..draft(fixed_now() + ChronoDuration::hours(2), 30)
        }
        .validate(fixed_now())
        .expect("valid draft");
        let occurrence = study_core::recurrence::Occurrence {
            start_time: definition.start_time,
            end_time: definition.end_time,
        };
        let session = repo
            .insert(NewSession::from_definition(
                OwnerId::new(1),
                &definition,
                occurrence,
                None,
            ))
            .await
            .expect("insert session");

        let scheduler = build_scheduler(Arc::clone(&repo), RecordingSink::new(), fixed_now());
        assert!(scheduler.arm(&session).is_none());
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn arm_skips_session_already_underway() {
        let repo = Arc::new(InMemoryRepository::new());
        // Start time an hour in the past; the reminder window is long gone.
        let session = persist(&repo, fixed_now() - ChronoDuration::hours(1), 30).await;

        let scheduler = build_scheduler(Arc::clone(&repo), RecordingSink::new(), fixed_now());
        assert!(scheduler.arm(&session).is_none());
    }

    #[tokio::test]
    async fn overdue_reminder_fires_immediately_before_start() {
        let repo = Arc::new(InMemoryRepository::new());
        // Fire time 15 minutes ago, session starts in 15 minutes.
        let session = persist(&repo, fixed_now() + ChronoDuration::minutes(15), 30).await;
        let sink = RecordingSink::new();
        let scheduler = build_scheduler(Arc::clone(&repo), sink.clone(), fixed_now());

        let handle = scheduler.arm(&session).expect("reminder armed");

        wait_until(|| sink.sent().len() == 1).await;
        let stored = repo.get(session.id()).await.expect("session exists");
        assert!(stored.reminder().expect("reminder present").fired());
        wait_until(|| !scheduler.is_armed(session.id())).await;

        // Canceling after the fire is a harmless no-op.
        scheduler.cancel(handle);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn cancel_before_fire_suppresses_notification() {
        let repo = Arc::new(InMemoryRepository::new());
        let session = persist(&repo, fixed_now() + ChronoDuration::hours(2), 30).await;
        let sink = RecordingSink::new();
        let scheduler = build_scheduler(Arc::clone(&repo), sink.clone(), fixed_now());

        let handle = scheduler.arm(&session).expect("reminder armed");
        assert!(scheduler.is_armed(session.id()));

        scheduler.cancel(handle);
        assert!(!scheduler.is_armed(session.id()));
        scheduler.shutdown().await;

        assert!(sink.sent().is_empty());
        let stored = repo.get(session.id()).await.expect("session exists");
        assert!(!stored.reminder().expect("reminder present").fired());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_ignores_stale_handles() {
        let repo = Arc::new(InMemoryRepository::new());
        let session = persist(&repo, fixed_now() + ChronoDuration::hours(2), 30).await;
        let scheduler = build_scheduler(Arc::clone(&repo), RecordingSink::new(), fixed_now());

        let first = scheduler.arm(&session).expect("reminder armed");
        let second = scheduler.arm(&session).expect("reminder re-armed");

        // The first handle was superseded by the re-arm.
        scheduler.cancel(first);
        assert!(scheduler.is_armed(session.id()));

        scheduler.cancel(second);
        assert!(!scheduler.is_armed(session.id()));
        scheduler.cancel(second);
        assert!(!scheduler.is_armed(session.id()));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn fired_reminder_is_not_rearmed() {
        let repo = Arc::new(InMemoryRepository::new());
        let session = persist(&repo, fixed_now() + ChronoDuration::minutes(15), 30).await;
        let sink = RecordingSink::new();
        let scheduler = build_scheduler(Arc::clone(&repo), sink.clone(), fixed_now());

        scheduler.arm(&session).expect("reminder armed");
        wait_until(|| sink.sent().len() == 1).await;

        let stored = repo.get(session.id()).await.expect("session exists");
        assert!(scheduler.arm(&stored).is_none());

        let handles = scheduler.rearm_pending().await.expect("listing works");
        assert!(handles.is_empty());
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn rearm_pending_arms_future_reminders() {
        let repo = Arc::new(InMemoryRepository::new());
        let first = persist(&repo, fixed_now() + ChronoDuration::hours(2), 30).await;
        let second = persist(&repo, fixed_now() + ChronoDuration::hours(3), 30).await;
        let scheduler = build_scheduler(Arc::clone(&repo), RecordingSink::new(), fixed_now());

        let handles = scheduler.rearm_pending().await.expect("listing works");
        assert_eq!(handles.len(), 2);
        assert!(scheduler.is_armed(first.id()));
        assert!(scheduler.is_armed(second.id()));
        scheduler.shutdown().await;
        assert_eq!(scheduler.armed_count(), 0);
    }
}
