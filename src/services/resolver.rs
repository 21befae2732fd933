//! Picks the content a schedule plays at one instant.
//!
//! Resolution is a pure function of the schedule's entries, its filler and
//! the query instant. The instant is converted into the schedule's own
//! timezone first, so day-of-week and time-of-day comparisons follow the
//! local wall clock across DST changes.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::cmp::Ordering;

use crate::config::OvernightWindows;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{ContentRef, EventType, Schedule, ScheduleEntry};
use crate::services::schedule_rules;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// An entry won arbitration and its content should play.
    Entry(ScheduleEntry),
    /// Nothing is scheduled; the schedule's filler content plays.
    Filler(ContentRef),
    /// A `screen_off` entry won; the screen goes dark.
    Blank { entry_id: i32 },
    /// No entry and no filler. The caller falls back to a device default.
    None,
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Entry(_) => "entry",
            Decision::Filler(_) => "filler",
            Decision::Blank { .. } => "blank",
            Decision::None => "none",
        }
    }
}

pub fn parse_timezone(name: &str) -> ScheduleResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Local calendar date and wall-clock time of `at` in `tz`.
pub fn local_civil(at: DateTime<Utc>, tz: Tz) -> (NaiveDate, NaiveTime) {
    let local = at.with_timezone(&tz);
    (local.date_naive(), local.time())
}

/// Resolves what `schedule` plays at `at`.
///
/// Fails only when the schedule's timezone cannot be loaded; it never
/// silently falls back to UTC.
pub fn resolve(
    schedule: &Schedule,
    entries: &[ScheduleEntry],
    filler: Option<ContentRef>,
    at: DateTime<Utc>,
    policy: OvernightWindows,
) -> ScheduleResult<Decision> {
    let tz = parse_timezone(&schedule.timezone)?;
    let (date, time) = local_civil(at, tz);
    Ok(resolve_local(entries, filler, date, time, policy))
}

/// Resolution on an already-localised date and time.
pub fn resolve_local(
    entries: &[ScheduleEntry],
    filler: Option<ContentRef>,
    date: NaiveDate,
    time: NaiveTime,
    policy: OvernightWindows,
) -> Decision {
    settle(eligible_at(entries, date, time, policy), filler)
}

/// Arbitrates an already-filtered eligible set, falling back to `filler`.
pub fn settle<'a>(
    eligible: impl Iterator<Item = &'a ScheduleEntry>,
    filler: Option<ContentRef>,
) -> Decision {
    match pick_winner(eligible) {
        Some(winner) => decide(winner),
        None => match filler {
            Some(content) => Decision::Filler(content),
            None => Decision::None,
        },
    }
}

/// Maps an arbitration winner to a decision.
pub fn decide(winner: &ScheduleEntry) -> Decision {
    match winner.event_type {
        EventType::ScreenOff => Decision::Blank {
            entry_id: winner.id,
        },
        EventType::Content => Decision::Entry(winner.clone()),
    }
}

pub fn eligible_at<'a>(
    entries: &'a [ScheduleEntry],
    date: NaiveDate,
    time: NaiveTime,
    policy: OvernightWindows,
) -> impl Iterator<Item = &'a ScheduleEntry> + 'a {
    entries
        .iter()
        .filter(move |entry| schedule_rules::is_eligible_at(entry, date, time, policy))
}

/// Ordering where the greater entry wins: higher priority, then the earlier
/// start time, then the lower entry id.
pub fn arbitration_order(a: &ScheduleEntry, b: &ScheduleEntry) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.start_time.cmp(&a.start_time))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn pick_winner<'a>(
    candidates: impl Iterator<Item = &'a ScheduleEntry>,
) -> Option<&'a ScheduleEntry> {
    candidates.max_by(|a, b| arbitration_order(a, b))
}
