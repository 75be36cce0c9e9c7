use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Where a session sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    Missed,
}

impl ProgressStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Missed => "missed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a progress status from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized progress status: {raw}")]
pub struct ParseStatusError {
    pub raw: String,
}

impl FromStr for ProgressStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "missed" => Ok(ProgressStatus::Missed),
            _ => Err(ParseStatusError { raw: s.to_string() }),
        }
    }
}

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("cannot move session progress from {from} to {to}")]
    InvalidTransition {
        from: ProgressStatus,
        to: ProgressStatus,
    },

    #[error("completed progress requires a duration and completion time")]
    MissingCompletion,

    #[error("only completed progress carries a duration or completion time")]
    UnexpectedCompletion,
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Progress record for one session instance.
///
/// Legal moves are `not_started -> in_progress`, `in_progress -> completed`,
/// `not_started -> missed` and `in_progress -> missed`. A completed record
/// accepts further completions that replace the notes and nothing else.
/// Everything else is an `InvalidTransition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    status: ProgressStatus,
    notes: Option<String>,
    duration_minutes: Option<u32>,
    completed_at: Option<DateTime<Utc>>,
}

impl Progress {
    /// Fresh progress for a newly created session instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: ProgressStatus::NotStarted,
            notes: None,
            duration_minutes: None,
            completed_at: None,
        }
    }

    /// Rehydrates progress from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::MissingCompletion` for a completed record
    /// without a duration or completion time, and `UnexpectedCompletion`
    /// when any other status carries either.
    pub fn from_persisted(
        status: ProgressStatus,
        notes: Option<String>,
        duration_minutes: Option<u32>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ProgressError> {
        match status {
            ProgressStatus::Completed => {
                if duration_minutes.is_none() || completed_at.is_none() {
                    return Err(ProgressError::MissingCompletion);
                }
            }
            _ => {
                if duration_minutes.is_some() || completed_at.is_some() {
                    return Err(ProgressError::UnexpectedCompletion);
                }
            }
        }

        Ok(Self {
            status,
            notes,
            duration_minutes,
            completed_at,
        })
    }

    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Recorded study time; present only once the session is completed.
    #[must_use]
    pub fn duration_minutes(&self) -> Option<u32> {
        self.duration_minutes
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Marks the session started.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the session is `not_started`.
    pub fn start(&self, notes: Option<String>) -> Result<Self, ProgressError> {
        match self.status {
            ProgressStatus::NotStarted => Ok(Self {
                status: ProgressStatus::InProgress,
                notes: merge_notes(&self.notes, notes),
                duration_minutes: None,
                completed_at: None,
            }),
            from => Err(ProgressError::InvalidTransition {
                from,
                to: ProgressStatus::InProgress,
            }),
        }
    }

    /// Marks the session completed with its final duration.
    ///
    /// Completing again keeps the recorded duration and completion time and
    /// only replaces the notes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the session is `in_progress` or
    /// already `completed`.
    pub fn complete(
        &self,
        duration_minutes: u32,
        completed_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Self, ProgressError> {
        match self.status {
            ProgressStatus::InProgress => Ok(Self {
                status: ProgressStatus::Completed,
                notes: merge_notes(&self.notes, notes),
                duration_minutes: Some(duration_minutes),
                completed_at: Some(completed_at),
            }),
            ProgressStatus::Completed => Ok(Self {
                status: ProgressStatus::Completed,
                notes: merge_notes(&self.notes, notes),
                duration_minutes: self.duration_minutes,
                completed_at: self.completed_at,
            }),
            from => Err(ProgressError::InvalidTransition {
                from,
                to: ProgressStatus::Completed,
            }),
        }
    }

    /// Marks the session missed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the session is `not_started` or
    /// `in_progress`.
    pub fn miss(&self, notes: Option<String>) -> Result<Self, ProgressError> {
        match self.status {
            ProgressStatus::NotStarted | ProgressStatus::InProgress => Ok(Self {
                status: ProgressStatus::Missed,
                notes: merge_notes(&self.notes, notes),
                duration_minutes: None,
                completed_at: None,
            }),
            from => Err(ProgressError::InvalidTransition {
                from,
                to: ProgressStatus::Missed,
            }),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

// Incoming notes replace the stored ones; absent notes keep them.
fn merge_notes(current: &Option<String>, incoming: Option<String>) -> Option<String> {
    match incoming {
        Some(notes) => {
            let trimmed = notes.trim().to_owned();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        None => current.clone(),
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
