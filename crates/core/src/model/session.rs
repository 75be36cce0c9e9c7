use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CourseId, OwnerId, RecurrenceGroupId, SessionId};
use crate::model::progress::Progress;

/// Lead time applied when a reminder is requested without an explicit value.
pub const DEFAULT_LEAD_MINUTES: u32 = 30;

//
// ─── CATEGORY & FREQUENCY ──────────────────────────────────────────────────────
//

/// What kind of study work a session is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    ExamPrep,
    Homework,
    Reading,
    Review,
    Practice,
}

impl SessionCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCategory::ExamPrep => "exam_prep",
            SessionCategory::Homework => "homework",
            SessionCategory::Reading => "reading",
            SessionCategory::Review => "review",
            SessionCategory::Practice => "practice",
        }
    }

    /// All categories, in reporting order.
    #[must_use]
    pub fn all() -> [SessionCategory; 5] {
        [
            SessionCategory::ExamPrep,
            SessionCategory::Homework,
            SessionCategory::Reading,
            SessionCategory::Review,
            SessionCategory::Practice,
        ]
    }
}

impl fmt::Display for SessionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a category from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized session category: {raw}")]
pub struct ParseCategoryError {
    pub raw: String,
}

impl FromStr for SessionCategory {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exam_prep" => Ok(SessionCategory::ExamPrep),
            "homework" => Ok(SessionCategory::Homework),
            "reading" => Ok(SessionCategory::Reading),
            "review" => Ok(SessionCategory::Review),
            "practice" => Ok(SessionCategory::Practice),
            _ => Err(ParseCategoryError { raw: s.to_string() }),
        }
    }
}

/// How often a recurring session repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a recurrence frequency from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized recurrence frequency: {raw}")]
pub struct ParseFrequencyError {
    pub raw: String,
}

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(ParseFrequencyError { raw: s.to_string() }),
        }
    }
}

//
// ─── RECURRENCE & REMINDER ─────────────────────────────────────────────────────
//

/// Recurrence rule attached to a session definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// Last point in time an occurrence may start at (inclusive).
    pub until: DateTime<Utc>,
}

/// Reminder request attached to a session definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSpec {
    /// Minutes before the session start at which the reminder fires.
    pub lead_minutes: u32,
}

impl Default for ReminderSpec {
    fn default() -> Self {
        Self {
            lead_minutes: DEFAULT_LEAD_MINUTES,
        }
    }
}

/// Persisted reminder state for one session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderState {
    lead_minutes: u32,
    fired: bool,
}

impl ReminderState {
    /// Fresh, unfired state for a newly created instance.
    #[must_use]
    pub fn from_spec(spec: ReminderSpec) -> Self {
        Self {
            lead_minutes: spec.lead_minutes,
            fired: false,
        }
    }

    /// Rehydrates reminder state from storage.
    #[must_use]
    pub fn from_persisted(lead_minutes: u32, fired: bool) -> Self {
        Self {
            lead_minutes,
            fired,
        }
    }

    #[must_use]
    pub fn lead_minutes(&self) -> u32 {
        self.lead_minutes
    }

    /// A fired reminder must never fire again.
    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired
    }
}

//
// ─── VALIDATION ERRORS ─────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionValidationError {
    #[error("session title cannot be empty")]
    EmptyTitle,

    #[error("session must end after it starts")]
    InvalidTimeRange,

    #[error("recurrence end must not be before the session start")]
    RecurrenceEndBeforeStart,
}

//
// ─── DRAFT & DEFINITION ────────────────────────────────────────────────────────
//

/// Caller-supplied session input, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDraft {
    pub title: String,
    pub category: SessionCategory,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: Option<String>,
    pub course_id: Option<CourseId>,
    pub recurrence: Option<Recurrence>,
    pub reminder: Option<ReminderSpec>,
}

impl SessionDraft {
    /// Validates the draft into a definition ready for expansion.
    ///
    /// # Errors
    ///
    /// Returns `SessionValidationError::EmptyTitle` if the title is blank,
    /// `InvalidTimeRange` if the window is empty or inverted, and
    /// `RecurrenceEndBeforeStart` if the recurrence ends before the first start.
    pub fn validate(self, now: DateTime<Utc>) -> Result<SessionDefinition, SessionValidationError> {
        let title = self.title.trim().to_owned();
        if title.is_empty() {
            return Err(SessionValidationError::EmptyTitle);
        }

        if self.end_time <= self.start_time {
            return Err(SessionValidationError::InvalidTimeRange);
        }

        if let Some(recurrence) = &self.recurrence {
            if recurrence.until < self.start_time {
                return Err(SessionValidationError::RecurrenceEndBeforeStart);
            }
        }

        let description = self
            .description
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());

        Ok(SessionDefinition {
            title,
            category: self.category,
            start_time: self.start_time,
            end_time: self.end_time,
            description,
            course_id: self.course_id,
            recurrence: self.recurrence,
            reminder: self.reminder,
            created_at: now,
        })
    }
}

/// A validated session definition, the input to recurrence expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDefinition {
    pub title: String,
    pub category: SessionCategory,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: Option<String>,
    pub course_id: Option<CourseId>,
    pub recurrence: Option<Recurrence>,
    pub reminder: Option<ReminderSpec>,
    pub created_at: DateTime<Utc>,
}

impl SessionDefinition {
    /// Length of the session window; every expanded instance keeps it.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.end_time - self.start_time
    }
}

//
// ─── SESSION INSTANCE ──────────────────────────────────────────────────────────
//

/// One concrete, time-boxed occurrence of a study session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInstance {
    id: SessionId,
    owner_id: OwnerId,
    course_id: Option<CourseId>,
    title: String,
    category: SessionCategory,
    description: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    recurrence_group_id: Option<RecurrenceGroupId>,
    reminder: Option<ReminderState>,
    progress: Progress,
    created_at: DateTime<Utc>,
}

impl SessionInstance {
    /// Rehydrates an instance from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionValidationError::InvalidTimeRange` if the stored window
    /// is empty or inverted, and `EmptyTitle` if the stored title is blank.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: SessionId,
        owner_id: OwnerId,
        course_id: Option<CourseId>,
        title: String,
        category: SessionCategory,
        description: Option<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        recurrence_group_id: Option<RecurrenceGroupId>,
        reminder: Option<ReminderState>,
        progress: Progress,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SessionValidationError> {
        if title.trim().is_empty() {
            return Err(SessionValidationError::EmptyTitle);
        }
        if end_time <= start_time {
            return Err(SessionValidationError::InvalidTimeRange);
        }

        Ok(Self {
            id,
            owner_id,
            course_id,
            title,
            category,
            description,
            start_time,
            end_time,
            recurrence_group_id,
            reminder,
            progress,
            created_at,
        })
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    #[must_use]
    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn category(&self) -> SessionCategory {
        self.category
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    #[must_use]
    pub fn recurrence_group_id(&self) -> Option<RecurrenceGroupId> {
        self.recurrence_group_id
    }

    #[must_use]
    pub fn reminder(&self) -> Option<ReminderState> {
        self.reminder
    }

    #[must_use]
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Scheduled window length in whole minutes.
    #[must_use]
    pub fn scheduled_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    /// Absolute point in time the reminder should fire at, if one is set.
    #[must_use]
    pub fn reminder_fire_at(&self) -> Option<DateTime<Utc>> {
        self.reminder
            .map(|r| self.start_time - Duration::minutes(i64::from(r.lead_minutes())))
    }

    /// Returns a copy with the given progress applied.
    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Returns a copy with the reminder marked fired.
    ///
    /// No-op when the instance has no reminder.
    #[must_use]
    pub fn with_reminder_fired(mut self) -> Self {
        if let Some(state) = self.reminder {
            self.reminder = Some(ReminderState::from_persisted(state.lead_minutes(), true));
        }
        self
    }

    /// Applies an edit patch, revalidating the result.
    ///
    /// Replacing the reminder spec installs a fresh, unfired reminder; moving
    /// `start_time` alone keeps the existing reminder state, including a fired
    /// flag that already went off.
    ///
    /// # Errors
    ///
    /// Returns `SessionValidationError` if the patched title or window is invalid.
    pub fn apply_patch(&self, patch: &SessionPatch) -> Result<Self, SessionValidationError> {
        let title = match &patch.title {
            Some(title) => {
                let trimmed = title.trim().to_owned();
                if trimmed.is_empty() {
                    return Err(SessionValidationError::EmptyTitle);
                }
                trimmed
            }
            None => self.title.clone(),
        };

        let start_time = patch.start_time.unwrap_or(self.start_time);
        let end_time = patch.end_time.unwrap_or(self.end_time);
        if end_time <= start_time {
            return Err(SessionValidationError::InvalidTimeRange);
        }

        let description = match &patch.description {
            Some(value) => value
                .as_ref()
                .map(|d| d.trim().to_owned())
                .filter(|d| !d.is_empty()),
            None => self.description.clone(),
        };

        let course_id = match patch.course_id {
            Some(value) => value,
            None => self.course_id,
        };

        let reminder = match patch.reminder {
            Some(Some(spec)) => Some(ReminderState::from_spec(spec)),
            Some(None) => None,
            None => self.reminder,
        };

        Ok(Self {
            id: self.id,
            owner_id: self.owner_id,
            course_id,
            title,
            category: patch.category.unwrap_or(self.category),
            description,
            start_time,
            end_time,
            recurrence_group_id: self.recurrence_group_id,
            reminder,
            progress: self.progress.clone(),
            created_at: self.created_at,
        })
    }
}

/// Field-wise edit for one session instance.
///
/// Inner `Option` fields distinguish "leave untouched" (`None`) from
/// "clear the value" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub category: Option<SessionCategory>,
    pub description: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub course_id: Option<Option<CourseId>>,
    pub reminder: Option<Option<ReminderSpec>>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
