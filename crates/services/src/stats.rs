//! Per-category statistics over an owner's sessions.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use storage::repository::{SessionFilter, SessionRepository};
use study_core::model::{OwnerId, ProgressStatus, SessionCategory};

use crate::error::SchedulingError;

/// Aggregated counters for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub total_duration_minutes: u64,
    /// Whole-minute mean over completed sessions; zero when none completed.
    pub average_duration_minutes: u64,
}

/// Read-only aggregation over stored sessions.
#[derive(Clone)]
pub struct StatsService {
    sessions: Arc<dyn SessionRepository>,
}

impl StatsService {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self { sessions }
    }

    /// Summarizes an owner's sessions per category.
    ///
    /// Only categories with at least one matching instance appear in the
    /// result. Totals count every matching instance; duration figures
    /// cover completed instances only. Never mutates any instance.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::Storage` if the listing fails.
    pub async fn summarize(
        &self,
        owner_id: OwnerId,
        filter: &SessionFilter,
    ) -> Result<BTreeMap<SessionCategory, CategoryStats>, SchedulingError> {
        let sessions = self.sessions.list(owner_id, filter).await?;

        let mut stats: BTreeMap<SessionCategory, CategoryStats> = BTreeMap::new();
        for session in &sessions {
            let entry = stats.entry(session.category()).or_default();
            entry.total_sessions += 1;
            if session.progress().status() == ProgressStatus::Completed {
                entry.completed_sessions += 1;
                entry.total_duration_minutes +=
                    u64::from(session.progress().duration_minutes().unwrap_or(0));
            }
        }
        for entry in stats.values_mut() {
            if entry.completed_sessions > 0 {
                entry.average_duration_minutes =
                    entry.total_duration_minutes / entry.completed_sessions;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use storage::repository::{InMemoryRepository, NewSession};
    use study_core::model::{SessionDraft, SessionInstance};
    use study_core::recurrence::Occurrence;
    use study_core::time::fixed_now;

    use super::*;

    async fn persist(
        repo: &InMemoryRepository,
        owner: u64,
        category: SessionCategory,
        completed_minutes: Option<u32>,
    ) -> SessionInstance {
        let start = fixed_now() + Duration::hours(1);
        let draft = SessionDraft {
            title: "Reading block".to_owned(),
            category,
            start_time: start,
            end_time: start + Duration::hours(2),
            description: None,
            course_id: None,
            recurrence: None,
            reminder: None,
        };
        let definition = draft.validate(fixed_now()).expect("valid draft");
        let occurrence = Occurrence {
            start_time: definition.start_time,
            end_time: definition.end_time,
        };
        let stored = repo
            .insert(NewSession::from_definition(
                OwnerId::new(owner),
                &definition,
                occurrence,
                None,
            ))
            .await
            .expect("insert session");

        if let Some(minutes) = completed_minutes {
            let started = stored.progress().start(None).expect("start progress");
            let completed = started
                .complete(minutes, start + Duration::hours(2), None)
                .expect("complete progress");
            repo.update_progress(stored.id(), ProgressStatus::NotStarted, &started)
                .await
                .expect("persist start");
            repo.update_progress(stored.id(), ProgressStatus::InProgress, &completed)
                .await
                .expect("persist completion");
        }
        stored
    }

    #[tokio::test]
    async fn summarize_groups_by_category() {
        let repo = Arc::new(InMemoryRepository::new());
        persist(&repo, 1, SessionCategory::ExamPrep, Some(25)).await;
        persist(&repo, 1, SessionCategory::ExamPrep, Some(30)).await;
        persist(&repo, 1, SessionCategory::ExamPrep, None).await;
        persist(&repo, 1, SessionCategory::Reading, None).await;

        let service = StatsService::new(repo);
        let stats = service
            .summarize(OwnerId::new(1), &SessionFilter::default())
            .await
            .expect("summarize");

        assert_eq!(stats.len(), 2);
        let exam_prep = &stats[&SessionCategory::ExamPrep];
        assert_eq!(exam_prep.total_sessions, 3);
        assert_eq!(exam_prep.completed_sessions, 2);
        assert_eq!(exam_prep.total_duration_minutes, 55);
        // Whole-minute average: 55 / 2 rounds down.
        assert_eq!(exam_prep.average_duration_minutes, 27);

        let reading = &stats[&SessionCategory::Reading];
        assert_eq!(reading.total_sessions, 1);
        assert_eq!(reading.completed_sessions, 0);
        assert_eq!(reading.total_duration_minutes, 0);
        assert_eq!(reading.average_duration_minutes, 0);
    }

    #[tokio::test]
    async fn summarize_scopes_to_owner() {
        let repo = Arc::new(InMemoryRepository::new());
        persist(&repo, 1, SessionCategory::Homework, Some(40)).await;
        persist(&repo, 2, SessionCategory::Homework, Some(90)).await;

        let service = StatsService::new(repo);
        let stats = service
            .summarize(OwnerId::new(1), &SessionFilter::default())
            .await
            .expect("summarize");

        let homework = &stats[&SessionCategory::Homework];
        assert_eq!(homework.total_sessions, 1);
        assert_eq!(homework.total_duration_minutes, 40);
    }

    #[tokio::test]
    async fn summarize_applies_category_filter() {
        let repo = Arc::new(InMemoryRepository::new());
        persist(&repo, 1, SessionCategory::Practice, Some(60)).await;
        persist(&repo, 1, SessionCategory::Review, Some(20)).await;

        let service = StatsService::new(repo);
        let filter = SessionFilter {
            category: Some(SessionCategory::Review),
            ..SessionFilter::default()
        };
        let stats = service
            .summarize(OwnerId::new(1), &filter)
            .await
            .expect("summarize");

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[&SessionCategory::Review].completed_sessions, 1);
        assert_eq!(stats[&SessionCategory::Review].average_duration_minutes, 20);
    }

    #[tokio::test]
    async fn empty_store_summarizes_to_empty_map() {
        let repo = Arc::new(InMemoryRepository::new());
        let service = StatsService::new(repo);
        let stats = service
            .summarize(OwnerId::new(1), &SessionFilter::default())
            .await
            .expect("summarize");
        assert!(stats.is_empty());
    }
}
