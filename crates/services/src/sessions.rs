//! Session creation, editing, deletion, and listing.

use std::sync::Arc;

use storage::repository::{NewSession, SessionFilter, SessionRepository};
use study_core::Clock;
use study_core::model::{
    OwnerId, RecurrenceGroupId, SessionDraft, SessionId, SessionInstance, SessionPatch,
};
use study_core::recurrence::{Occurrence, expand};

use crate::error::SchedulingError;
use crate::reminders::ReminderScheduler;

/// Creates and maintains session instances, keeping reminder timers in step.
#[derive(Clone)]
pub struct SessionService {
    clock: Clock,
    sessions: Arc<dyn SessionRepository>,
    reminders: ReminderScheduler,
}

impl SessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        sessions: Arc<dyn SessionRepository>,
        reminders: ReminderScheduler,
    ) -> Self {
        Self {
            clock,
            sessions,
            reminders,
        }
    }

    /// Validates a draft, persists its instances, and arms their reminders.
    ///
    /// A recurring draft expands into one instance per occurrence, all
    /// sharing a freshly generated recurrence group id and stored in a
    /// single atomic batch. A non-recurring draft yields exactly one
    /// instance with no group id.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Validation` for a malformed draft and
    /// `SchedulingError::Storage` if persistence fails.
    pub async fn create_session(
        &self,
        owner_id: OwnerId,
        draft: SessionDraft,
    ) -> Result<Vec<SessionInstance>, SchedulingError> {
        let now = self.clock.now();
        let definition = draft.validate(now)?;

        let stored = match definition.recurrence {
            Some(_) => {
                let group_id = RecurrenceGroupId::generate();
                let batch: Vec<NewSession> = expand(&definition)
                    .into_iter()
                    .map(|occurrence| {
                        NewSession::from_definition(owner_id, &definition, occurrence, Some(group_id))
                    })
                    .collect();
                self.sessions.insert_group(batch).await?
            }
            None => {
                let occurrence = Occurrence {
                    start_time: definition.start_time,
                    end_time: definition.end_time,
                };
                let single = NewSession::from_definition(owner_id, &definition, occurrence, None);
                vec![self.sessions.insert(single).await?]
            }
        };

        for session in &stored {
            self.reminders.arm(session);
        }
        Ok(stored)
    }

    /// Applies a patch to one instance and persists the result.
    ///
    /// Touching the start time or the reminder replaces the instance's
    /// timer with one computed from the new fire time; clearing the
    /// reminder cancels it.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Validation` if the patched instance is
    /// invalid and `SchedulingError::Storage` when the instance is missing
    /// or cannot be stored.
    pub async fn update_session(
        &self,
        id: SessionId,
        patch: &SessionPatch,
    ) -> Result<SessionInstance, SchedulingError> {
        let current = self.sessions.get(id).await?;
        let updated = current.apply_patch(patch)?;
        self.sessions.update(&updated).await?;

        let start_moved = updated.start_time() != current.start_time();
        if updated.reminder().is_none() {
            self.reminders.cancel_for_session(id);
        } else if start_moved || patch.reminder.is_some() {
            self.reminders.arm(&updated);
        }
        Ok(updated)
    }

    /// Removes one instance, canceling its reminder first.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Storage` when the instance is missing or
    /// cannot be removed.
    pub async fn delete_session(&self, id: SessionId) -> Result<(), SchedulingError> {
        self.reminders.cancel_for_session(id);
        self.sessions.delete(id).await?;
        Ok(())
    }

    /// Fetches one instance by id.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Storage` when the instance is missing.
    pub async fn get_session(&self, id: SessionId) -> Result<SessionInstance, SchedulingError> {
        Ok(self.sessions.get(id).await?)
    }

    /// Lists an owner's instances matching the filter, ordered by start time.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Storage` if the query fails.
    pub async fn list_sessions(
        &self,
        owner_id: OwnerId,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionInstance>, SchedulingError> {
        Ok(self.sessions.list(owner_id, filter).await?)
    }

    #[must_use]
    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }
}
