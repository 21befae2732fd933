//! Eligibility rules shared by the resolver, the conflict detector and the
//! week preview. Everything here works on schedule-local civil dates and
//! times; converting from an instant happens in the resolver.

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Timelike};

use crate::config::OvernightWindows;
use crate::models::{RepeatConfig, RepeatType, ScheduleEntry};

pub const MINUTES_PER_DAY: u32 = 1440;
pub const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;

/// Sunday = 0 through Saturday = 6.
pub fn day_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn seconds(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}

/// Half-open daily window `[start, end)`. An end before the start runs past
/// midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn of(entry: &ScheduleEntry) -> Self {
        Self {
            start: entry.start_time,
            end: entry.end_time,
        }
    }

    pub fn spans_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Covers `time` on the same calendar date the window opened.
    pub fn covers_same_day(&self, time: NaiveTime) -> bool {
        let t = seconds(time);
        if self.spans_midnight() {
            t >= seconds(self.start)
        } else {
            t >= seconds(self.start) && t < seconds(self.end)
        }
    }

    /// Covers `time` on the calendar date after the window opened.
    pub fn covers_next_day(&self, time: NaiveTime, policy: OvernightWindows) -> bool {
        policy == OvernightWindows::Wrap
            && self.spans_midnight()
            && seconds(time) < seconds(self.end)
    }

    /// Minutes after midnight of the opening day, `end > start` always.
    pub fn minute_span(&self, policy: OvernightWindows) -> (u32, u32) {
        let start = seconds(self.start) / 60;
        let end = seconds(self.end) / 60;
        match (self.spans_midnight(), policy) {
            (false, _) => (start, end),
            (true, OvernightWindows::Wrap) => (start, end + MINUTES_PER_DAY),
            (true, OvernightWindows::Clip) => (start, MINUTES_PER_DAY),
        }
    }
}

pub fn within_date_range(entry: &ScheduleEntry, date: NaiveDate) -> bool {
    entry.start_date.map_or(true, |start| date >= start)
        && entry.end_date.map_or(true, |end| date <= end)
}

/// Whether the entry's rule opens a window on `date`, ignoring time of day.
pub fn applies_on(entry: &ScheduleEntry, date: NaiveDate) -> bool {
    entry.is_active
        && entry.days_of_week.contains(day_index(date))
        && within_date_range(entry, date)
        && recurrence_allows(entry, date)
}

/// Whether the entry is live at a local date and time, including the spill
/// of a window opened the previous evening.
pub fn is_eligible_at(
    entry: &ScheduleEntry,
    date: NaiveDate,
    time: NaiveTime,
    policy: OvernightWindows,
) -> bool {
    let window = TimeWindow::of(entry);

    if window.covers_same_day(time) && applies_on(entry, date) {
        return true;
    }

    window.covers_next_day(time, policy)
        && date
            .pred_opt()
            .is_some_and(|previous| applies_on(entry, previous))
}

/// Day-level results for one local date. Sweeping many times of the same
/// date through this evaluates recurrence once per entry instead of once per
/// query.
pub struct DayOpenings<'a> {
    /// Entry, opens on the date, opened on the previous date.
    openings: Vec<(&'a ScheduleEntry, bool, bool)>,
    policy: OvernightWindows,
}

impl<'a> DayOpenings<'a> {
    pub fn new(entries: &'a [ScheduleEntry], date: NaiveDate, policy: OvernightWindows) -> Self {
        let previous = date.pred_opt();
        let openings = entries
            .iter()
            .map(|entry| {
                let today = applies_on(entry, date);
                let spill = policy == OvernightWindows::Wrap
                    && TimeWindow::of(entry).spans_midnight()
                    && previous.is_some_and(|day| applies_on(entry, day));
                (entry, today, spill)
            })
            .filter(|(_, today, spill)| *today || *spill)
            .collect();

        Self { openings, policy }
    }

    /// Entries live at `time` on the date, same as [`is_eligible_at`].
    pub fn live_at(&self, time: NaiveTime) -> impl Iterator<Item = &'a ScheduleEntry> + '_ {
        self.openings.iter().filter_map(move |(entry, today, spill)| {
            let window = TimeWindow::of(entry);
            let live = (*today && window.covers_same_day(time))
                || (*spill && window.covers_next_day(time, self.policy));
            live.then_some(*entry)
        })
    }
}

fn recurrence_allows(entry: &ScheduleEntry, date: NaiveDate) -> bool {
    let Some(repeat_type) = entry.repeat_type else {
        return true;
    };
    let default_config = RepeatConfig::default();
    let config = entry.repeat_config.as_ref().unwrap_or(&default_config);
    let Some(anchor) = config.anchor_date.or(entry.start_date) else {
        // Validation refuses unanchored recurrences.
        return false;
    };

    if date < anchor || config.until_date.is_some_and(|until| date > until) {
        return false;
    }
    if !matches_interval(repeat_type, config.interval, anchor, date) {
        return false;
    }

    match config.until_count {
        Some(limit) => occurrences_through(entry, repeat_type, config, anchor, date, limit) <= limit,
        None => true,
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(day_index(date)))
}

fn matches_interval(repeat_type: RepeatType, interval: u32, anchor: NaiveDate, date: NaiveDate) -> bool {
    let interval = i64::from(interval.max(1));
    match repeat_type {
        RepeatType::Daily => (date - anchor).num_days() % interval == 0,
        RepeatType::Weekly => {
            let weeks = (week_start(date) - week_start(anchor)).num_days() / 7;
            weeks % interval == 0
        }
    }
}

/// Counts occurrences from the anchor through `date`, stopping once `limit`
/// is exceeded.
fn occurrences_through(
    entry: &ScheduleEntry,
    repeat_type: RepeatType,
    config: &RepeatConfig,
    anchor: NaiveDate,
    date: NaiveDate,
    limit: u32,
) -> u32 {
    let counts = |day: NaiveDate| {
        day >= anchor
            && day <= date
            && entry.days_of_week.contains(day_index(day))
            && within_date_range(entry, day)
            && config.until_date.map_or(true, |until| day <= until)
    };
    let interval = u64::from(config.interval.max(1));
    let mut count = 0u32;

    match repeat_type {
        RepeatType::Daily => {
            let mut day = anchor;
            while day <= date && count <= limit {
                if counts(day) {
                    count += 1;
                }
                match day.checked_add_days(Days::new(interval)) {
                    Some(next) => day = next,
                    None => break,
                }
            }
        }
        RepeatType::Weekly => {
            let mut week = week_start(anchor);
            while week <= date && count <= limit {
                for offset in 0..7 {
                    if let Some(day) = week.checked_add_days(Days::new(offset)) {
                        if counts(day) {
                            count += 1;
                        }
                    }
                }
                match week.checked_add_days(Days::new(7 * interval)) {
                    Some(next) => week = next,
                    None => break,
                }
            }
        }
    }

    count
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::{ContentRef, ContentType, DaysOfWeek, EventType};

    pub fn time(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M").unwrap()
    }

    pub fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    /// Active content entry for a playlist, every day of the week.
    pub fn entry(id: i32, start: &str, end: &str) -> ScheduleEntry {
        ScheduleEntry {
            id,
            schedule_id: 1,
            content: ContentRef::new(ContentType::Playlist, id * 100),
            target_type: None,
            target_id: None,
            start_date: None,
            end_date: None,
            start_time: time(start),
            end_time: time(end),
            days_of_week: DaysOfWeek::ALL,
            priority: 0,
            is_active: true,
            event_type: EventType::Content,
            repeat_type: None,
            repeat_config: None,
            campaign_id: None,
        }
    }

    pub fn on_days(mut e: ScheduleEntry, days: &[u8]) -> ScheduleEntry {
        e.days_of_week = DaysOfWeek::from_days(days).unwrap();
        e
    }
}
