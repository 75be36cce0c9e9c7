use chrono::{DateTime, Utc};
use study_core::model::{OwnerId, Progress, ProgressStatus, SessionId, SessionInstance};

use super::{
    SqliteRepository,
    mapping::{id_i64, map_session_row, ser, session_id_from_i64},
};
use crate::repository::{NewSession, SessionFilter, SessionRepository, StorageError};

const SELECT_SESSIONS: &str = r"
    SELECT
        id, owner_id, course_id, title, category, description,
        start_time, end_time, recurrence_group_id,
        reminder_lead_minutes, reminder_fired,
        progress_status, progress_notes, progress_duration_minutes,
        progress_completed_at, created_at
    FROM study_sessions
";

async fn insert_session(
    conn: &mut sqlx::SqliteConnection,
    session: &NewSession,
) -> Result<i64, StorageError> {
    let res = sqlx::query(
        r"
            INSERT INTO study_sessions (
                owner_id, course_id, title, category, description,
                start_time, end_time, recurrence_group_id,
                reminder_lead_minutes, reminder_fired,
                progress_status, progress_notes, progress_duration_minutes,
                progress_completed_at, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ",
    )
    .bind(id_i64("owner_id", session.owner_id.value())?)
    .bind(
        session
            .course_id
            .map(|c| id_i64("course_id", c.value()))
            .transpose()?,
    )
    .bind(session.title.as_str())
    .bind(session.category.as_str())
    .bind(session.description.as_deref())
    .bind(session.start_time)
    .bind(session.end_time)
    .bind(session.recurrence_group_id.map(|g| g.value().to_string()))
    .bind(session.reminder.map(|r| i64::from(r.lead_minutes())))
    .bind(session.reminder.is_some_and(|r| r.fired()))
    .bind(session.progress.status().as_str())
    .bind(session.progress.notes())
    .bind(session.progress.duration_minutes().map(i64::from))
    .bind(session.progress.completed_at())
    .bind(session.created_at)
    .execute(conn)
    .await
    .map_err(|e| StorageError::Connection(e.to_string()))?;

    Ok(res.last_insert_rowid())
}

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn insert(&self, session: NewSession) -> Result<SessionInstance, StorageError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let rowid = insert_session(&mut conn, &session).await?;
        session
            .into_instance(session_id_from_i64(rowid)?)
            .map_err(ser)
    }

    async fn insert_group(
        &self,
        sessions: Vec<NewSession>,
    ) -> Result<Vec<SessionInstance>, StorageError> {
        if sessions.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut inserted = Vec::with_capacity(sessions.len());
        for session in sessions {
            let rowid = insert_session(&mut tx, &session).await?;
            inserted.push(
                session
                    .into_instance(session_id_from_i64(rowid)?)
                    .map_err(ser)?,
            );
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(inserted)
    }

    async fn get(&self, id: SessionId) -> Result<SessionInstance, StorageError> {
        let sql = format!("{SELECT_SESSIONS} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("session_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .ok_or(StorageError::NotFound)?;

        map_session_row(&row)
    }

    async fn list(
        &self,
        owner_id: OwnerId,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionInstance>, StorageError> {
        let mut sql = format!("{SELECT_SESSIONS} WHERE owner_id = ?1");

        let mut clauses: Vec<&str> = Vec::new();
        if filter.from.is_some() {
            clauses.push(" AND start_time >= ?");
        }
        if filter.to.is_some() {
            clauses.push(" AND start_time <= ?");
        }
        if filter.course_id.is_some() {
            clauses.push(" AND course_id = ?");
        }
        if filter.category.is_some() {
            clauses.push(" AND category = ?");
        }
        if filter.status.is_some() {
            clauses.push(" AND progress_status = ?");
        }
        for (i, clause) in clauses.iter().enumerate() {
            sql.push_str(clause);
            sql.push_str(&(i + 2).to_string());
        }
        sql.push_str(" ORDER BY start_time ASC, id ASC");

        let mut query = sqlx::query(&sql).bind(id_i64("owner_id", owner_id.value())?);
        if let Some(from) = filter.from {
            query = query.bind(from);
        }
        if let Some(to) = filter.to {
            query = query.bind(to);
        }
        if let Some(course_id) = filter.course_id {
            query = query.bind(id_i64("course_id", course_id.value())?);
        }
        if let Some(category) = filter.category {
            query = query.bind(category.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_session_row(&row)?);
        }
        Ok(out)
    }

    async fn update(&self, session: &SessionInstance) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
                UPDATE study_sessions SET
                    owner_id = ?1, course_id = ?2, title = ?3, category = ?4,
                    description = ?5, start_time = ?6, end_time = ?7,
                    recurrence_group_id = ?8, reminder_lead_minutes = ?9,
                    reminder_fired = ?10, progress_status = ?11, progress_notes = ?12,
                    progress_duration_minutes = ?13, progress_completed_at = ?14,
                    created_at = ?15
                WHERE id = ?16
            ",
        )
        .bind(id_i64("owner_id", session.owner_id().value())?)
        .bind(
            session
                .course_id()
                .map(|c| id_i64("course_id", c.value()))
                .transpose()?,
        )
        .bind(session.title())
        .bind(session.category().as_str())
        .bind(session.description())
        .bind(session.start_time())
        .bind(session.end_time())
        .bind(session.recurrence_group_id().map(|g| g.value().to_string()))
        .bind(session.reminder().map(|r| i64::from(r.lead_minutes())))
        .bind(session.reminder().is_some_and(|r| r.fired()))
        .bind(session.progress().status().as_str())
        .bind(session.progress().notes())
        .bind(session.progress().duration_minutes().map(i64::from))
        .bind(session.progress().completed_at())
        .bind(session.created_at())
        .bind(id_i64("session_id", session.id().value())?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: SessionId,
        expected: ProgressStatus,
        progress: &Progress,
    ) -> Result<SessionInstance, StorageError> {
        let res = sqlx::query(
            r"
                UPDATE study_sessions SET
                    progress_status = ?1, progress_notes = ?2,
                    progress_duration_minutes = ?3, progress_completed_at = ?4
                WHERE id = ?5 AND progress_status = ?6
            ",
        )
        .bind(progress.status().as_str())
        .bind(progress.notes())
        .bind(progress.duration_minutes().map(i64::from))
        .bind(progress.completed_at())
        .bind(id_i64("session_id", id.value())?)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            // Distinguish a vanished row from a concurrent status change.
            return match self.get(id).await {
                Ok(_) => Err(StorageError::Conflict),
                Err(e) => Err(e),
            };
        }

        self.get(id).await
    }

    async fn claim_reminder_fired(&self, id: SessionId) -> Result<bool, StorageError> {
        let res = sqlx::query(
            r"
                UPDATE study_sessions SET reminder_fired = 1
                WHERE id = ?1
                  AND reminder_lead_minutes IS NOT NULL
                  AND reminder_fired = 0
            ",
        )
        .bind(id_i64("session_id", id.value())?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM study_sessions WHERE id = ?1")
            .bind(id_i64("session_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound),
        }
    }

    async fn list_unfired_reminders(&self) -> Result<Vec<SessionInstance>, StorageError> {
        let sql = format!(
            r"
                {SELECT_SESSIONS}
                WHERE reminder_lead_minutes IS NOT NULL
                  AND reminder_fired = 0
                  AND progress_status = 'not_started'
                ORDER BY start_time ASC, id ASC
            "
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_session_row(&row)?);
        }
        Ok(out)
    }

    async fn list_overdue(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionInstance>, StorageError> {
        let sql = format!(
            r"
                {SELECT_SESSIONS}
                WHERE progress_status = 'not_started'
                  AND end_time < ?1
                ORDER BY start_time ASC, id ASC
            "
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_session_row(&row)?);
        }
        Ok(out)
    }

    async fn delete(&self, id: SessionId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM study_sessions WHERE id = ?1")
            .bind(id_i64("session_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
