use chrono::{Days, NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::OvernightWindows;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{ContentRef, Schedule, ScheduleEntry};
use crate::services::content_catalog::ContentLabel;
use crate::services::resolver::{self, Decision};
use crate::services::schedule_rules::{self, DayOpenings, TimeWindow, MINUTES_PER_DAY};

#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    #[serde(flatten)]
    pub entry: ScheduleEntry,
    pub content_name: Option<String>,
    pub thumbnail_url: Option<String>,
    pub spans_midnight: bool,
}

/// A run of consecutive minutes with the same resolved winner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineBlock {
    pub start_time: String,
    pub duration_minutes: i32,
    pub kind: &'static str,
    pub entry_id: Option<i32>,
    pub content: Option<ContentRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayPlan {
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub entries: Vec<PreviewEntry>,
    pub filler_applies: bool,
    pub timeline: Vec<TimelineBlock>,
}

/// Projects the seven local days starting at `start_date`.
pub fn preview_week(
    schedule: &Schedule,
    entries: &[ScheduleEntry],
    filler: Option<ContentRef>,
    start_date: NaiveDate,
    labels: &HashMap<ContentRef, ContentLabel>,
    policy: OvernightWindows,
) -> ScheduleResult<Vec<DayPlan>> {
    // The preview works on civil dates, but an unusable zone must still fail.
    resolver::parse_timezone(&schedule.timezone)?;

    (0..7u64)
        .map(|offset| {
            let date = start_date
                .checked_add_days(Days::new(offset))
                .ok_or_else(|| ScheduleError::validation("preview runs past the calendar"))?;
            Ok(plan_day(entries, filler, date, labels, policy))
        })
        .collect()
}

fn plan_day(
    all_entries: &[ScheduleEntry],
    filler: Option<ContentRef>,
    date: NaiveDate,
    labels: &HashMap<ContentRef, ContentLabel>,
    policy: OvernightWindows,
) -> DayPlan {
    let mut day_entries: Vec<&ScheduleEntry> = all_entries
        .iter()
        .filter(|entry| schedule_rules::applies_on(entry, date))
        .collect();
    day_entries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));

    let entries: Vec<PreviewEntry> = day_entries
        .into_iter()
        .map(|entry| {
            let label = labels.get(&entry.content);
            PreviewEntry {
                entry: entry.clone(),
                content_name: label.map(|l| l.name.clone()),
                thumbnail_url: label.and_then(|l| l.thumbnail_url.clone()),
                spans_midnight: TimeWindow::of(entry).spans_midnight(),
            }
        })
        .collect();

    DayPlan {
        date,
        day_of_week: schedule_rules::day_index(date),
        filler_applies: entries.is_empty(),
        entries,
        timeline: day_timeline(all_entries, filler, date, policy),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TimelineSlot {
    kind: &'static str,
    entry_id: Option<i32>,
    content: Option<ContentRef>,
}

impl From<Decision> for TimelineSlot {
    fn from(decision: Decision) -> Self {
        let kind = decision.kind();
        let (entry_id, content) = match decision {
            Decision::Entry(entry) => (Some(entry.id), Some(entry.content)),
            Decision::Filler(content) => (None, Some(content)),
            Decision::Blank { entry_id } => (Some(entry_id), None),
            Decision::None => (None, None),
        };
        TimelineSlot {
            kind,
            entry_id,
            content,
        }
    }
}

/// Resolves every local minute of `date` and merges equal neighbours.
fn day_timeline(
    entries: &[ScheduleEntry],
    filler: Option<ContentRef>,
    date: NaiveDate,
    policy: OvernightWindows,
) -> Vec<TimelineBlock> {
    let openings = DayOpenings::new(entries, date, policy);
    let timeline: Vec<TimelineSlot> = (0..MINUTES_PER_DAY)
        .filter_map(|minute| NaiveTime::from_num_seconds_from_midnight_opt(minute * 60, 0))
        .map(|time| resolver::settle(openings.live_at(time), filler).into())
        .collect();

    collapse_timeline(timeline)
}

fn collapse_timeline(timeline: Vec<TimelineSlot>) -> Vec<TimelineBlock> {
    let mut collapsed = Vec::new();
    let mut current: Option<(usize, TimelineSlot)> = None;

    for (minute, slot) in timeline.into_iter().enumerate() {
        match &current {
            Some((_, current_slot)) if *current_slot == slot => continue,
            Some((start_min, current_slot)) => {
                collapsed.push(create_block(*start_min, minute - *start_min, current_slot));
                current = Some((minute, slot));
            }
            None => current = Some((minute, slot)),
        }
    }

    if let Some((start_min, slot)) = current {
        let end = MINUTES_PER_DAY as usize;
        collapsed.push(create_block(start_min, end - start_min, &slot));
    }

    collapsed
}

fn create_block(start_min: usize, duration: usize, slot: &TimelineSlot) -> TimelineBlock {
    TimelineBlock {
        start_time: format!("{:02}:{:02}", start_min / 60, start_min % 60),
        duration_minutes: duration as i32,
        kind: slot.kind,
        entry_id: slot.entry_id,
        content: slot.content,
    }
}
