use sqlx::Row;
use study_core::model::{
    CourseId, OwnerId, Progress, ProgressStatus, RecurrenceGroupId, ReminderState,
    SessionCategory, SessionId, SessionInstance,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn session_id_from_i64(v: i64) -> Result<SessionId, StorageError> {
    Ok(SessionId::new(i64_to_u64("session_id", v)?))
}

pub(crate) fn owner_id_from_i64(v: i64) -> Result<OwnerId, StorageError> {
    Ok(OwnerId::new(i64_to_u64("owner_id", v)?))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_session_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionInstance, StorageError> {
    let id = session_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?;
    let owner_id = owner_id_from_i64(row.try_get::<i64, _>("owner_id").map_err(ser)?)?;
    let course_id = row
        .try_get::<Option<i64>, _>("course_id")
        .map_err(ser)?
        .map(course_id_from_i64)
        .transpose()?;

    let category = row
        .try_get::<String, _>("category")
        .map_err(ser)?
        .parse::<SessionCategory>()
        .map_err(ser)?;

    let recurrence_group_id = row
        .try_get::<Option<String>, _>("recurrence_group_id")
        .map_err(ser)?
        .map(|raw| raw.parse::<RecurrenceGroupId>())
        .transpose()
        .map_err(ser)?;

    let reminder = match row
        .try_get::<Option<i64>, _>("reminder_lead_minutes")
        .map_err(ser)?
    {
        Some(lead) => {
            let fired: bool = row.try_get("reminder_fired").map_err(ser)?;
            Some(ReminderState::from_persisted(
                u32_from_i64("reminder_lead_minutes", lead)?,
                fired,
            ))
        }
        None => None,
    };

    let status = row
        .try_get::<String, _>("progress_status")
        .map_err(ser)?
        .parse::<ProgressStatus>()
        .map_err(ser)?;
    let duration_minutes = row
        .try_get::<Option<i64>, _>("progress_duration_minutes")
        .map_err(ser)?
        .map(|v| u32_from_i64("progress_duration_minutes", v))
        .transpose()?;
    let progress = Progress::from_persisted(
        status,
        row.try_get("progress_notes").map_err(ser)?,
        duration_minutes,
        row.try_get("progress_completed_at").map_err(ser)?,
    )
    .map_err(ser)?;

    SessionInstance::from_persisted(
        id,
        owner_id,
        course_id,
        row.try_get("title").map_err(ser)?,
        category,
        row.try_get("description").map_err(ser)?,
        row.try_get("start_time").map_err(ser)?,
        row.try_get("end_time").map_err(ser)?,
        recurrence_group_id,
        reminder,
        progress,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}
