use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use study_core::model::{
    CourseId, OwnerId, Progress, ProgressStatus, RecurrenceGroupId, ReminderState,
    SessionCategory, SessionDefinition, SessionId, SessionInstance, SessionValidationError,
};
use study_core::recurrence::Occurrence;
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for a session instance that has no id yet.
///
/// This mirrors the domain `SessionInstance` so repositories can assign ids
/// at insert time without leaking storage concerns into the domain layer.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub owner_id: OwnerId,
    pub course_id: Option<CourseId>,
    pub title: String,
    pub category: SessionCategory,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub recurrence_group_id: Option<RecurrenceGroupId>,
    pub reminder: Option<ReminderState>,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
}

impl NewSession {
    /// Builds the unsaved row for one expanded occurrence of a definition.
    #[must_use]
    pub fn from_definition(
        owner_id: OwnerId,
        definition: &SessionDefinition,
        occurrence: Occurrence,
        recurrence_group_id: Option<RecurrenceGroupId>,
    ) -> Self {
        Self {
            owner_id,
            course_id: definition.course_id,
            title: definition.title.clone(),
            category: definition.category,
            description: definition.description.clone(),
            start_time: occurrence.start_time,
            end_time: occurrence.end_time,
            recurrence_group_id,
            reminder: definition.reminder.map(ReminderState::from_spec),
            progress: Progress::new(),
            created_at: definition.created_at,
        }
    }

    /// Converts the row into a domain instance once an id is known.
    ///
    /// # Errors
    ///
    /// Returns `SessionValidationError` if the stored fields fail revalidation.
    pub fn into_instance(self, id: SessionId) -> Result<SessionInstance, SessionValidationError> {
        SessionInstance::from_persisted(
            id,
            self.owner_id,
            self.course_id,
            self.title,
            self.category,
            self.description,
            self.start_time,
            self.end_time,
            self.recurrence_group_id,
            self.reminder,
            self.progress,
            self.created_at,
        )
    }
}

/// Filter for listing and aggregating an owner's sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Keep sessions starting at or after this point.
    pub from: Option<DateTime<Utc>>,
    /// Keep sessions starting at or before this point.
    pub to: Option<DateTime<Utc>>,
    pub course_id: Option<CourseId>,
    pub category: Option<SessionCategory>,
    pub status: Option<ProgressStatus>,
}

/// Repository contract for session instances.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist one instance, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the instance cannot be stored.
    async fn insert(&self, session: NewSession) -> Result<SessionInstance, StorageError>;

    /// Persist a whole recurrence group in one atomic batch.
    ///
    /// Either every instance is stored or none are.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the batch cannot be stored.
    async fn insert_group(
        &self,
        sessions: Vec<NewSession>,
    ) -> Result<Vec<SessionInstance>, StorageError>;

    /// Fetch one instance by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get(&self, id: SessionId) -> Result<SessionInstance, StorageError>;

    /// List an owner's instances matching the filter, ordered by start time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn list(
        &self,
        owner_id: OwnerId,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionInstance>, StorageError>;

    /// Replace the stored row for an instance.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the instance does not exist.
    async fn update(&self, session: &SessionInstance) -> Result<(), StorageError>;

    /// Replace an instance's progress, guarded by its expected current status.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored status no longer matches
    /// `expected`, and `NotFound` if the instance does not exist.
    async fn update_progress(
        &self,
        id: SessionId,
        expected: ProgressStatus,
        progress: &Progress,
    ) -> Result<SessionInstance, StorageError>;

    /// Atomically flip an unfired reminder to fired.
    ///
    /// Returns `true` only for the single caller that performed the flip;
    /// an already-fired or absent reminder yields `false`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the instance does not exist.
    async fn claim_reminder_fired(&self, id: SessionId) -> Result<bool, StorageError>;

    /// List instances whose reminder is set, unfired, and whose session has
    /// not been started yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn list_unfired_reminders(&self) -> Result<Vec<SessionInstance>, StorageError>;

    /// List instances still `not_started` whose window ended before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn list_overdue(&self, cutoff: DateTime<Utc>)
    -> Result<Vec<SessionInstance>, StorageError>;

    /// Delete one instance.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the instance does not exist.
    async fn delete(&self, id: SessionId) -> Result<(), StorageError>;
}

fn matches_filter(session: &SessionInstance, owner_id: OwnerId, filter: &SessionFilter) -> bool {
    if session.owner_id() != owner_id {
        return false;
    }
    if let Some(from) = filter.from {
        if session.start_time() < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if session.start_time() > to {
            return false;
        }
    }
    if let Some(course_id) = filter.course_id {
        if session.course_id() != Some(course_id) {
            return false;
        }
    }
    if let Some(category) = filter.category {
        if session.category() != category {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if session.progress().status() != status {
            return false;
        }
    }
    true
}

#[derive(Default)]
struct InMemoryState {
    next_id: u64,
    rows: HashMap<SessionId, SessionInstance>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState::default())),
        }
    }

    fn insert_locked(
        state: &mut InMemoryState,
        session: NewSession,
    ) -> Result<SessionInstance, StorageError> {
        state.next_id += 1;
        let id = SessionId::new(state.next_id);
        let instance = session
            .into_instance(id)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        state.rows.insert(id, instance.clone());
        Ok(instance)
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn insert(&self, session: NewSession) -> Result<SessionInstance, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::insert_locked(&mut guard, session)
    }

    async fn insert_group(
        &self,
        sessions: Vec<NewSession>,
    ) -> Result<Vec<SessionInstance>, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // Stage against a copy so a mid-batch failure stores nothing.
        let mut staged = InMemoryState {
            next_id: guard.next_id,
            rows: guard.rows.clone(),
        };
        let mut inserted = Vec::with_capacity(sessions.len());
        for session in sessions {
            inserted.push(Self::insert_locked(&mut staged, session)?);
        }

        guard.next_id = staged.next_id;
        guard.rows = staged.rows;
        Ok(inserted)
    }

    async fn get(&self, id: SessionId) -> Result<SessionInstance, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.rows.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list(
        &self,
        owner_id: OwnerId,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionInstance>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<_> = guard
            .rows
            .values()
            .filter(|s| matches_filter(s, owner_id, filter))
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.start_time(), s.id().value()));
        Ok(found)
    }

    async fn update(&self, session: &SessionInstance) -> Result<(), StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        match guard.rows.get_mut(&session.id()) {
            Some(row) => {
                *row = session.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn update_progress(
        &self,
        id: SessionId,
        expected: ProgressStatus,
        progress: &Progress,
    ) -> Result<SessionInstance, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let row = guard.rows.get_mut(&id).ok_or(StorageError::NotFound)?;
        if row.progress().status() != expected {
            return Err(StorageError::Conflict);
        }
        *row = row.clone().with_progress(progress.clone());
        Ok(row.clone())
    }

    async fn claim_reminder_fired(&self, id: SessionId) -> Result<bool, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let row = guard.rows.get_mut(&id).ok_or(StorageError::NotFound)?;
        match row.reminder() {
            Some(state) if !state.fired() => {
                *row = row.clone().with_reminder_fired();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_unfired_reminders(&self) -> Result<Vec<SessionInstance>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<_> = guard
            .rows
            .values()
            .filter(|s| {
                s.reminder().is_some_and(|r| !r.fired())
                    && s.progress().status() == ProgressStatus::NotStarted
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.start_time(), s.id().value()));
        Ok(found)
    }

    async fn list_overdue(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionInstance>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<_> = guard
            .rows
            .values()
            .filter(|s| {
                s.progress().status() == ProgressStatus::NotStarted && s.end_time() < cutoff
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.start_time(), s.id().value()));
        Ok(found)
    }

    async fn delete(&self, id: SessionId) -> Result<(), StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

/// Aggregates the session repository behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let sessions: Arc<dyn SessionRepository> = Arc::new(InMemoryRepository::new());
        Self { sessions }
    }
}
