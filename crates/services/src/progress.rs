//! Progress transitions and the overdue sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use storage::repository::{SessionRepository, StorageError};
use study_core::Clock;
use study_core::model::{ProgressError, ProgressStatus, SessionId, SessionInstance};

use crate::error::SchedulingError;

/// Requested progress change for one session instance.
///
/// `duration_minutes` is honored only when the target status is
/// `Completed`; when absent, the recorded duration is the wall-clock time
/// elapsed since the session's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub status: ProgressStatus,
    pub notes: Option<String>,
    pub duration_minutes: Option<u32>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(status: ProgressStatus) -> Self {
        Self {
            status,
            notes: None,
            duration_minutes: None,
        }
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }
}

/// Applies progress transitions under an optimistic per-instance guard.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    sessions: Arc<dyn SessionRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(clock: Clock, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { clock, sessions }
    }

    /// Moves one instance through the progress state machine.
    ///
    /// Completion records a duration capped at the scheduled window and
    /// stamps the completion time; a completed instance accepts further
    /// updates to `Completed` that replace its notes only. The stored row
    /// is only replaced if its status still matches the one this update
    /// was computed against, so a racing update loses cleanly instead of
    /// being silently overwritten.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Progress` for an illegal transition,
    /// leaving the instance unmodified, and `SchedulingError::Storage`
    /// when the instance is missing or the guarded write fails.
    pub async fn update_progress(
        &self,
        id: SessionId,
        update: ProgressUpdate,
    ) -> Result<SessionInstance, SchedulingError> {
        let now = self.clock.now();
        let session = self.sessions.get(id).await?;
        let current = session.progress().clone();

        let next = match update.status {
            ProgressStatus::NotStarted => {
                return Err(SchedulingError::Progress(ProgressError::InvalidTransition {
                    from: current.status(),
                    to: ProgressStatus::NotStarted,
                }));
            }
            ProgressStatus::InProgress => current.start(update.notes)?,
            ProgressStatus::Completed => {
                let duration = capped_duration(&session, now, update.duration_minutes);
                current.complete(duration, now, update.notes)?
            }
            ProgressStatus::Missed => current.miss(update.notes)?,
        };

        let updated = self
            .sessions
            .update_progress(id, current.status(), &next)
            .await?;
        Ok(updated)
    }

    /// Marks every overdue, still-untouched instance as missed.
    ///
    /// Overdue means the session's window ended before the current time
    /// while its status is still `not_started`. A row whose status changed
    /// between listing and writing is left alone. Returns the number of
    /// instances swept.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Storage` if listing or writing fails for
    /// reasons other than losing the per-row race.
    pub async fn sweep_missed(&self) -> Result<usize, SchedulingError> {
        let now = self.clock.now();
        let overdue = self.sessions.list_overdue(now).await?;

        let mut swept = 0;
        for session in overdue {
            let current = session.progress().clone();
            let missed = current.miss(None)?;
            match self
                .sessions
                .update_progress(session.id(), current.status(), &missed)
                .await
            {
                Ok(_) => swept += 1,
                // A user update won the race; leave the row as they set it.
                Err(StorageError::Conflict | StorageError::NotFound) => {}
                Err(error) => return Err(error.into()),
            }
        }
        info!(swept, "marked overdue sessions as missed");
        Ok(swept)
    }
}

fn capped_duration(session: &SessionInstance, now: DateTime<Utc>, explicit: Option<u32>) -> u32 {
    let window = session.scheduled_minutes().max(0);
    let measured = match explicit {
        Some(minutes) => i64::from(minutes),
        None => (now - session.start_time()).num_minutes().max(0),
    };
    u32::try_from(measured.min(window)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use storage::repository::{InMemoryRepository, NewSession};
    use study_core::model::{OwnerId, ReminderSpec, SessionCategory, SessionDraft};
    use study_core::recurrence::Occurrence;
    use study_core::time::fixed_now;

    use super::*;

    async fn persist_session(
        repo: &InMemoryRepository,
        start: DateTime<Utc>,
        window_minutes: i64,
    ) -> SessionInstance {
        let draft = SessionDraft {
            title: "Past paper under exam conditions".to_owned(),
            category: SessionCategory::Practice,
            start_time: start,
            end_time: start + Duration::minutes(window_minutes),
            description: None,
            course_id: None,
            recurrence: None,
            reminder: Some(ReminderSpec::default()),
        };
        let definition = draft
            .validate(start - Duration::days(1))
            .expect("valid draft");
        let occurrence = Occurrence {
            start_time: definition.start_time,
            end_time: definition.end_time,
        };
        repo.insert(NewSession::from_definition(
            OwnerId::new(1),
            &definition,
            occurrence,
            None,
        ))
        .await
        .expect("insert session")
    }

    fn service_at(repo: &Arc<InMemoryRepository>, now: DateTime<Utc>) -> ProgressService {
        let sessions: Arc<dyn SessionRepository> = repo.clone();
        ProgressService::new(Clock::fixed(now), sessions)
    }

    #[tokio::test]
    async fn start_then_complete_records_elapsed_duration() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let session = persist_session(&repo, start, 60).await;

        let at_start = service_at(&repo, start);
        let started = at_start
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await
            .expect("start session");
        assert_eq!(started.progress().status(), ProgressStatus::InProgress);

        let later = start + Duration::minutes(45);
        let at_later = service_at(&repo, later);
        let completed = at_later
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::Completed)
                    .with_notes("finished the integrals"),
            )
            .await
            .expect("complete session");

        assert_eq!(completed.progress().status(), ProgressStatus::Completed);
        assert_eq!(completed.progress().duration_minutes(), Some(45));
        assert_eq!(completed.progress().completed_at(), Some(later));
        assert_eq!(completed.progress().notes(), Some("finished the integrals"));
    }

    #[tokio::test]
    async fn completion_duration_caps_at_scheduled_window() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let session = persist_session(&repo, start, 60).await;

        service_at(&repo, start)
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await
            .expect("start session");

        // Three hours of wall clock against a one-hour window.
        let completed = service_at(&repo, start + Duration::hours(3))
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::Completed),
            )
            .await
            .expect("complete session");

        assert_eq!(completed.progress().duration_minutes(), Some(60));
    }

    #[tokio::test]
    async fn explicit_duration_is_kept_but_still_capped() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let first = persist_session(&repo, start, 60).await;
        let second = persist_session(&repo, start, 60).await;
        let service = service_at(&repo, start + Duration::minutes(10));

        service
            .update_progress(
                first.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await
            .expect("start first");
        let completed = service
            .update_progress(
                first.id(),
                ProgressUpdate::new(ProgressStatus::Completed).with_duration(25),
            )
            .await
            .expect("complete first");
        assert_eq!(completed.progress().duration_minutes(), Some(25));

        service
            .update_progress(
                second.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await
            .expect("start second");
        let capped = service
            .update_progress(
                second.id(),
                ProgressUpdate::new(ProgressStatus::Completed).with_duration(500),
            )
            .await
            .expect("complete second");
        assert_eq!(capped.progress().duration_minutes(), Some(60));
    }

    #[tokio::test]
    async fn completed_reupdate_replaces_notes_only() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let session = persist_session(&repo, start, 60).await;
        let service = service_at(&repo, start + Duration::minutes(30));

        service
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await
            .expect("start session");
        service
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::Completed).with_duration(30),
            )
            .await
            .expect("complete session");

        let reupdated = service_at(&repo, start + Duration::hours(5))
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::Completed)
                    .with_notes("corrected my summary"),
            )
            .await
            .expect("re-update notes");

        assert_eq!(reupdated.progress().duration_minutes(), Some(30));
        assert_eq!(
            reupdated.progress().completed_at(),
            Some(start + Duration::minutes(30))
        );
        assert_eq!(reupdated.progress().notes(), Some("corrected my summary"));
    }

    #[tokio::test]
    async fn terminal_state_change_is_rejected_and_row_kept() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let session = persist_session(&repo, start, 60).await;
        let service = service_at(&repo, start + Duration::minutes(30));

        service
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::Missed).with_notes("overslept"),
            )
            .await
            .expect("miss session");

        let result = service
            .update_progress(
                session.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await;
        assert!(matches!(
            result,
            Err(SchedulingError::Progress(ProgressError::InvalidTransition {
                from: ProgressStatus::Missed,
                to: ProgressStatus::InProgress,
            }))
        ));

        let stored = repo.get(session.id()).await.expect("session exists");
        assert_eq!(stored.progress().status(), ProgressStatus::Missed);
        assert_eq!(stored.progress().notes(), Some("overslept"));
    }

    #[tokio::test]
    async fn sweep_marks_only_untouched_overdue_sessions() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let untouched = persist_session(&repo, start, 60).await;
        let started = persist_session(&repo, start, 60).await;
        let upcoming = persist_session(&repo, start + Duration::days(1), 60).await;

        service_at(&repo, start)
            .update_progress(
                started.id(),
                ProgressUpdate::new(ProgressStatus::InProgress),
            )
            .await
            .expect("start session");

        let sweeper = service_at(&repo, start + Duration::hours(2));
        let swept = sweeper.sweep_missed().await.expect("sweep runs");
        assert_eq!(swept, 1);

        let missed = repo.get(untouched.id()).await.expect("session exists");
        assert_eq!(missed.progress().status(), ProgressStatus::Missed);
        let in_progress = repo.get(started.id()).await.expect("session exists");
        assert_eq!(in_progress.progress().status(), ProgressStatus::InProgress);
        let pending = repo.get(upcoming.id()).await.expect("session exists");
        assert_eq!(pending.progress().status(), ProgressStatus::NotStarted);
    }

    #[tokio::test]
    async fn sweep_boundary_excludes_sessions_ending_exactly_now() {
        let repo = Arc::new(InMemoryRepository::new());
        let start = fixed_now();
        let session = persist_session(&repo, start, 60).await;

        let at_end = service_at(&repo, start + Duration::minutes(60));
        assert_eq!(at_end.sweep_missed().await.expect("sweep runs"), 0);

        let past_end = service_at(&repo, start + Duration::minutes(61));
        assert_eq!(past_end.sweep_missed().await.expect("sweep runs"), 1);

        let stored = repo.get(session.id()).await.expect("session exists");
        assert_eq!(stored.progress().status(), ProgressStatus::Missed);
    }
}
