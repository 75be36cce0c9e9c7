mod ids;
mod progress;
mod session;

pub use ids::{CourseId, OwnerId, ParseIdError, RecurrenceGroupId, SessionId};

pub use progress::{ParseStatusError, Progress, ProgressError, ProgressStatus};
pub use session::{
    DEFAULT_LEAD_MINUTES, Frequency, ParseCategoryError, ParseFrequencyError, Recurrence,
    ReminderSpec, ReminderState, SessionCategory, SessionDefinition, SessionDraft, SessionInstance,
    SessionPatch, SessionValidationError,
};
