//! Advisory overlap detection for entry edits. Overlap is allowed and is
//! settled by priority at resolution time; conflicts only warn the editor.

use chrono::{Days, NaiveTime};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

use crate::auth::Actor;
use crate::config::OvernightWindows;
use crate::error::ScheduleResult;
use crate::models::{ContentRef, DaysOfWeek, EventType, ScheduleEntry};
use crate::services::content_catalog;
use crate::services::schedule_rules::{TimeWindow, MINUTES_PER_DAY, MINUTES_PER_WEEK};
use crate::services::schedule_store::{self, EntryInput};

#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub entry_id: i32,
    pub content: ContentRef,
    pub content_name: Option<String>,
    pub thumbnail_url: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub days_of_week: DaysOfWeek,
    pub priority: i32,
    pub event_type: EventType,
}

/// Occupied minutes of the week, Sunday 00:00 = 0, as half-open ranges.
fn weekly_spans(entry: &ScheduleEntry, policy: OvernightWindows) -> Vec<(u32, u32)> {
    let (start, end) = TimeWindow::of(entry).minute_span(policy);
    let mut spans = Vec::new();

    for day in entry.days_of_week.days() {
        let offset = u32::from(day) * MINUTES_PER_DAY;
        let (from, to) = (offset + start, offset + end);
        if to <= MINUTES_PER_WEEK {
            spans.push((from, to));
        } else {
            // Saturday night spilling into Sunday morning.
            spans.push((from, MINUTES_PER_WEEK));
            spans.push((0, to - MINUTES_PER_WEEK));
        }
    }

    spans
}

fn date_ranges_intersect(a: &ScheduleEntry, b: &ScheduleEntry, policy: OvernightWindows) -> bool {
    // A window that wraps past midnight still plays on the day after end_date.
    let effective_end = |e: &ScheduleEntry| {
        let spills = policy == OvernightWindows::Wrap && TimeWindow::of(e).spans_midnight();
        e.end_date.map(|end| {
            if spills {
                end.checked_add_days(Days::new(1)).unwrap_or(end)
            } else {
                end
            }
        })
    };

    let starts_before_end = |x: &ScheduleEntry, y: &ScheduleEntry| match (x.start_date, effective_end(y)) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    };

    starts_before_end(a, b) && starts_before_end(b, a)
}

/// Whether two rules can be live at the same moment. The day and time
/// checks run jointly on the weekly timeline, so a late-night window that
/// wraps into the next weekday is compared against that weekday.
pub fn windows_overlap(a: &ScheduleEntry, b: &ScheduleEntry, policy: OvernightWindows) -> bool {
    if !date_ranges_intersect(a, b, policy) {
        return false;
    }
    // Clipped windows never leave their own day.
    if policy == OvernightWindows::Clip && !a.days_of_week.intersects(&b.days_of_week) {
        return false;
    }

    let a_spans = weekly_spans(a, policy);
    let b_spans = weekly_spans(b, policy);
    a_spans.iter().any(|(a_start, a_end)| {
        b_spans
            .iter()
            .any(|(b_start, b_end)| a_start < b_end && b_start < a_end)
    })
}

/// Existing entries the candidate would overlap with.
pub fn find_conflicts<'a>(
    existing: &'a [ScheduleEntry],
    candidate: &ScheduleEntry,
    exclude_entry_id: Option<i32>,
    policy: OvernightWindows,
) -> Vec<&'a ScheduleEntry> {
    existing
        .iter()
        .filter(|entry| entry.is_active)
        .filter(|entry| Some(entry.id) != exclude_entry_id)
        .filter(|entry| windows_overlap(entry, candidate, policy))
        .collect()
}

/// Validates `input` as an entry of `schedule_id` and reports which stored
/// entries it overlaps. Nothing is written.
pub fn detect_conflicts(
    conn: &mut SqliteConnection,
    actor: &Actor,
    schedule_id: i32,
    input: EntryInput,
    exclude_entry_id: Option<i32>,
    policy: OvernightWindows,
) -> ScheduleResult<Vec<Conflict>> {
    schedule_store::find_schedule(conn, actor.tenant_id, schedule_id)?;
    let candidate = input.into_entry(exclude_entry_id.unwrap_or(0), schedule_id)?;
    let existing = schedule_store::load_entries(conn, schedule_id)?;

    let overlapping = find_conflicts(&existing, &candidate, exclude_entry_id, policy);
    let labels = content_catalog::content_labels(
        conn,
        actor.tenant_id,
        overlapping.iter().map(|e| e.content),
    )?;

    Ok(overlapping
        .into_iter()
        .map(|e| Conflict {
            entry_id: e.id,
            content: e.content,
            content_name: labels.get(&e.content).map(|l| l.name.clone()),
            thumbnail_url: labels.get(&e.content).and_then(|l| l.thumbnail_url.clone()),
            start_time: e.start_time,
            end_time: e.end_time,
            days_of_week: e.days_of_week,
            priority: e.priority,
            event_type: e.event_type,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::models::ContentType;
    use crate::services::content_catalog::fixtures::insert_content;
    use crate::services::decision_cache::DecisionCache;
    use crate::services::schedule_rules::fixtures::{date, entry, on_days};
    use crate::services::schedule_store::fixtures::{editor, window};
    use crate::services::schedule_store::{ScheduleInput, ScheduleStore};

    const WRAP: OvernightWindows = OvernightWindows::Wrap;
    const CLIP: OvernightWindows = OvernightWindows::Clip;

    fn ids(conflicts: Vec<&ScheduleEntry>) -> Vec<i32> {
        conflicts.into_iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_overlapping_windows_on_shared_day() {
        let existing = vec![on_days(entry(1, "11:00", "14:00"), &[1, 2, 3, 4, 5])];
        let candidate = on_days(entry(0, "11:30", "12:30"), &[2]);
        assert_eq!(ids(find_conflicts(&existing, &candidate, None, WRAP)), vec![1]);
    }

    #[test]
    fn test_touching_windows_do_not_conflict() {
        let existing = vec![entry(1, "09:00", "12:00")];
        let candidate = entry(0, "12:00", "15:00");
        assert!(find_conflicts(&existing, &candidate, None, WRAP).is_empty());
    }

    #[test]
    fn test_disjoint_days_do_not_conflict() {
        let existing = vec![on_days(entry(1, "09:00", "17:00"), &[1, 3, 5])];
        let candidate = on_days(entry(0, "09:00", "17:00"), &[0, 6]);
        assert!(find_conflicts(&existing, &candidate, None, WRAP).is_empty());
    }

    #[test]
    fn test_disjoint_date_ranges_do_not_conflict() {
        let mut june = entry(1, "09:00", "17:00");
        june.start_date = Some(date("2024-06-01"));
        june.end_date = Some(date("2024-06-30"));
        let mut july = entry(0, "09:00", "17:00");
        july.start_date = Some(date("2024-07-01"));

        assert!(find_conflicts(&[june.clone()], &july, None, WRAP).is_empty());

        // An open start overlaps any range.
        july.start_date = None;
        july.end_date = Some(date("2024-07-31"));
        assert_eq!(ids(find_conflicts(&[june], &july, None, WRAP)), vec![1]);
    }

    #[test]
    fn test_inactive_and_excluded_entries_are_skipped() {
        let mut inactive = entry(1, "09:00", "17:00");
        inactive.is_active = false;
        let edited = entry(2, "09:00", "17:00");
        let candidate = entry(2, "10:00", "11:00");

        let existing = vec![inactive, edited];
        assert!(find_conflicts(&existing, &candidate, Some(2), WRAP).is_empty());
        assert_eq!(ids(find_conflicts(&existing, &candidate, None, WRAP)), vec![2]);
    }

    #[test]
    fn test_overnight_window_conflicts_next_morning_when_wrapping() {
        // Friday 22:00 until Saturday 02:00.
        let late = on_days(entry(1, "22:00", "02:00"), &[5]);
        let early_saturday = on_days(entry(0, "01:00", "03:00"), &[6]);

        assert_eq!(
            ids(find_conflicts(&[late.clone()], &early_saturday, None, WRAP)),
            vec![1]
        );
        assert!(find_conflicts(&[late], &early_saturday, None, CLIP).is_empty());
    }

    #[test]
    fn test_saturday_night_wraps_into_sunday() {
        let late = on_days(entry(1, "23:00", "01:00"), &[6]);
        let sunday_midnight = on_days(entry(0, "00:00", "00:30"), &[0]);
        assert_eq!(
            ids(find_conflicts(&[late], &sunday_midnight, None, WRAP)),
            vec![1]
        );
    }

    #[test]
    fn test_overnight_window_same_evening() {
        let late = on_days(entry(1, "22:00", "02:00"), &[5]);
        let evening = on_days(entry(0, "21:00", "22:30"), &[5]);
        assert_eq!(ids(find_conflicts(&[late.clone()], &evening, None, WRAP)), vec![1]);
        assert_eq!(ids(find_conflicts(&[late], &evening, None, CLIP)), vec![1]);
    }

    #[test]
    fn test_conflict_symmetry() {
        let pairs = vec![
            (entry(1, "11:00", "14:00"), entry(2, "11:30", "12:30")),
            (
                on_days(entry(1, "22:00", "02:00"), &[5]),
                on_days(entry(2, "01:00", "03:00"), &[6]),
            ),
            (entry(1, "09:00", "12:00"), entry(2, "12:00", "15:00")),
            (
                on_days(entry(1, "09:00", "17:00"), &[1]),
                on_days(entry(2, "09:00", "17:00"), &[2]),
            ),
        ];

        for policy in [WRAP, CLIP] {
            for (a, b) in &pairs {
                let a_vs_b = !find_conflicts(&[a.clone()], b, None, policy).is_empty();
                let b_vs_a = !find_conflicts(&[b.clone()], a, None, policy).is_empty();
                assert_eq!(a_vs_b, b_vs_a, "{:?} vs {:?}", a.id, b.id);
            }
        }
    }

    #[test]
    fn test_detect_conflicts_against_stored_entries() {
        let mut conn = test_connection();
        let menu = insert_content(&mut conn, ContentType::Playlist, 1, "lunch-menu", true);
        let specials = insert_content(&mut conn, ContentType::Playlist, 1, "specials", true);
        let cache = DecisionCache::new(60);

        let (schedule_id, lunch_id) = {
            let mut store = ScheduleStore::new(&mut conn, &cache);
            let schedule = store
                .create_schedule(
                    &editor(1),
                    ScheduleInput {
                        name: "Weekday Lunch".into(),
                        description: None,
                        timezone: None,
                    },
                )
                .unwrap();
            let lunch = store
                .create_entry(
                    &editor(1),
                    schedule.id,
                    window(menu, "11:00", "14:00", &[1, 2, 3, 4, 5]),
                )
                .unwrap();
            (schedule.id, lunch.id)
        };

        let conflicts = detect_conflicts(
            &mut conn,
            &editor(1),
            schedule_id,
            window(specials, "11:30", "12:30", &[2]),
            None,
            WRAP,
        )
        .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entry_id, lunch_id);
        assert_eq!(conflicts[0].content_name.as_deref(), Some("lunch-menu"));
        assert_eq!(
            conflicts[0].thumbnail_url.as_deref(),
            Some("https://cdn.example/lunch-menu.png")
        );

        // Editing the lunch entry itself is not a conflict with itself.
        let self_edit = detect_conflicts(
            &mut conn,
            &editor(1),
            schedule_id,
            window(menu, "10:00", "14:00", &[1]),
            Some(lunch_id),
            WRAP,
        )
        .unwrap();
        assert!(self_edit.is_empty());
    }
}
