use chrono::{DateTime, Duration, Months, Utc};

use crate::model::{Frequency, SessionDefinition};

//
// ─── OCCURRENCE ────────────────────────────────────────────────────────────────
//

/// One concrete time window produced by expanding a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

//
// ─── CALENDAR ARITHMETIC ───────────────────────────────────────────────────────
//

/// Computes the next occurrence after `current` for the given frequency,
/// keeping the time of day.
///
/// Monthly advancement from a day the target month does not have lands on
/// the last day of that month instead of rolling into the following one.
/// Returns `None` when the calendar cannot represent the next occurrence.
///
/// # Examples
///
/// ```
/// # use study_core::recurrence::next_occurrence;
/// # use study_core::model::Frequency;
/// use chrono::{TimeZone, Utc};
///
/// let mar_31 = Utc.with_ymd_and_hms(2024, 3, 31, 9, 0, 0).unwrap();
/// let next = next_occurrence(mar_31, Frequency::Monthly).unwrap();
/// assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap());
/// ```
#[must_use]
pub fn next_occurrence(current: DateTime<Utc>, frequency: Frequency) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Daily => current.checked_add_signed(Duration::days(1)),
        Frequency::Weekly => current.checked_add_signed(Duration::days(7)),
        Frequency::Monthly => current.checked_add_months(Months::new(1)),
    }
}

//
// ─── EXPANSION ─────────────────────────────────────────────────────────────────
//

/// Expands a validated definition into the full, eagerly materialized series
/// of occurrence windows.
///
/// A definition without a recurrence yields exactly one occurrence matching
/// its own window. A recurring definition yields one occurrence per cursor
/// position while `cursor <= until`, every window keeping the definition's
/// duration. Expansion stops early if the cursor ever fails to advance
/// strictly forward, so the result is always finite.
///
/// # Examples
///
/// ```
/// # use study_core::recurrence::expand;
/// # use study_core::model::{Frequency, Recurrence, SessionCategory, SessionDraft};
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
/// let draft = SessionDraft {
///     title: "Weekly review".into(),
///     category: SessionCategory::Review,
///     start_time: start,
///     end_time: start + Duration::hours(1),
///     description: None,
///     course_id: None,
///     recurrence: Some(Recurrence {
///         frequency: Frequency::Daily,
///         until: start + Duration::days(6),
///     }),
///     reminder: None,
/// };
/// let definition = draft.validate(start)?;
///
/// assert_eq!(expand(&definition).len(), 7);
/// # Ok::<(), study_core::model::SessionValidationError>(())
/// ```
#[must_use]
pub fn expand(definition: &SessionDefinition) -> Vec<Occurrence> {
    let window = definition.window();

    let Some(recurrence) = definition.recurrence else {
        return vec![Occurrence {
            start_time: definition.start_time,
            end_time: definition.end_time,
        }];
    };

    let mut occurrences = Vec::new();
    let mut cursor = definition.start_time;
    while cursor <= recurrence.until {
        let Some(end_time) = cursor.checked_add_signed(window) else {
            break;
        };
        occurrences.push(Occurrence {
            start_time: cursor,
            end_time,
        });

        // Guard against a cursor that stalls; the series must stay finite.
        match next_occurrence(cursor, recurrence.frequency) {
            Some(next) if next > cursor => cursor = next,
            _ => break,
        }
    }

    occurrences
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Recurrence, SessionCategory, SessionDraft};
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn definition(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        recurrence: Option<Recurrence>,
    ) -> SessionDefinition {
        SessionDraft {
            title: "Linear algebra".into(),
            category: SessionCategory::ExamPrep,
            start_time: start,
            end_time: end,
            description: None,
            course_id: None,
            recurrence,
            reminder: None,
        }
        .validate(start)
        .unwrap()
    }

    #[test]
    fn daily_advances_one_day_keeping_time() {
        let next = next_occurrence(at(2024, 1, 1, 10, 30), Frequency::Daily).unwrap();
        assert_eq!(next, at(2024, 1, 2, 10, 30));
    }

    #[test]
    fn weekly_advances_seven_days() {
        let next = next_occurrence(at(2024, 1, 1, 10, 0), Frequency::Weekly).unwrap();
        assert_eq!(next, at(2024, 1, 8, 10, 0));
    }

    #[test]
    fn monthly_advances_same_day_of_month() {
        let next = next_occurrence(at(2024, 1, 15, 9, 0), Frequency::Monthly).unwrap();
        assert_eq!(next, at(2024, 2, 15, 9, 0));
    }

    #[test]
    fn monthly_clamps_to_last_day_of_shorter_month() {
        // 31st into a 30-day month lands on the 30th, not the 1st of the next.
        let next = next_occurrence(at(2024, 3, 31, 9, 0), Frequency::Monthly).unwrap();
        assert_eq!(next, at(2024, 4, 30, 9, 0));
    }

    #[test]
    fn monthly_clamps_to_leap_february() {
        let next = next_occurrence(at(2024, 1, 31, 9, 0), Frequency::Monthly).unwrap();
        assert_eq!(next, at(2024, 2, 29, 9, 0));
    }

    #[test]
    fn non_recurring_definition_yields_exactly_its_window() {
        let start = at(2024, 1, 1, 10, 0);
        let end = at(2024, 1, 1, 11, 30);
        let occurrences = expand(&definition(start, end, None));

        assert_eq!(
            occurrences,
            vec![Occurrence {
                start_time: start,
                end_time: end,
            }]
        );
    }

    #[test]
    fn daily_over_six_more_days_yields_seven_occurrences() {
        let start = at(2024, 1, 1, 10, 0);
        let end = at(2024, 1, 1, 11, 0);
        let recurrence = Recurrence {
            frequency: Frequency::Daily,
            until: start + Duration::days(6),
        };
        let occurrences = expand(&definition(start, end, Some(recurrence)));

        assert_eq!(occurrences.len(), 7);
        for (i, occurrence) in occurrences.iter().enumerate() {
            assert_eq!(occurrence.start_time, start + Duration::days(i as i64));
            assert_eq!(occurrence.end_time - occurrence.start_time, Duration::hours(1));
        }
    }

    #[test]
    fn weekly_series_lands_on_each_week() {
        let start = at(2024, 1, 1, 10, 0);
        let end = at(2024, 1, 1, 11, 0);
        let recurrence = Recurrence {
            frequency: Frequency::Weekly,
            until: at(2024, 1, 22, 10, 0),
        };
        let occurrences = expand(&definition(start, end, Some(recurrence)));

        let starts: Vec<_> = occurrences.iter().map(|o| o.start_time).collect();
        assert_eq!(
            starts,
            vec![
                at(2024, 1, 1, 10, 0),
                at(2024, 1, 8, 10, 0),
                at(2024, 1, 15, 10, 0),
                at(2024, 1, 22, 10, 0),
            ]
        );
    }

    #[test]
    fn until_equal_to_start_yields_single_occurrence() {
        let start = at(2024, 1, 1, 10, 0);
        let end = at(2024, 1, 1, 11, 0);
        let recurrence = Recurrence {
            frequency: Frequency::Monthly,
            until: start,
        };
        let occurrences = expand(&definition(start, end, Some(recurrence)));
        assert_eq!(occurrences.len(), 1);
    }

    #[test]
    fn until_between_occurrences_excludes_the_next_one() {
        let start = at(2024, 1, 1, 10, 0);
        let end = at(2024, 1, 1, 11, 0);
        let recurrence = Recurrence {
            frequency: Frequency::Weekly,
            until: at(2024, 1, 14, 0, 0),
        };
        let occurrences = expand(&definition(start, end, Some(recurrence)));
        assert_eq!(occurrences.len(), 2);
    }

    #[test]
    fn monthly_series_keeps_clamping_forward() {
        let start = at(2024, 1, 31, 9, 0);
        let end = at(2024, 1, 31, 10, 0);
        let recurrence = Recurrence {
            frequency: Frequency::Monthly,
            until: at(2024, 4, 30, 9, 0),
        };
        let occurrences = expand(&definition(start, end, Some(recurrence)));

        let starts: Vec<_> = occurrences.iter().map(|o| o.start_time).collect();
        assert_eq!(
            starts,
            vec![
                at(2024, 1, 31, 9, 0),
                at(2024, 2, 29, 9, 0),
                at(2024, 3, 29, 9, 0),
                at(2024, 4, 29, 9, 0),
            ]
        );
    }

    #[test]
    fn expansion_stops_when_the_calendar_cannot_advance() {
        let start = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let end = DateTime::<Utc>::MAX_UTC;
        let recurrence = Recurrence {
            frequency: Frequency::Daily,
            until: DateTime::<Utc>::MAX_UTC,
        };
        let occurrences = expand(&definition(start, end, Some(recurrence)));
        assert_eq!(occurrences.len(), 1);
    }
}
