use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScheduleError;

// Content references

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Playlist,
    Layout,
    Media,
    Scene,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Playlist => "playlist",
            ContentType::Layout => "layout",
            ContentType::Media => "media",
            ContentType::Scene => "scene",
        }
    }
}

impl FromStr for ContentType {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playlist" => Ok(ContentType::Playlist),
            "layout" => Ok(ContentType::Layout),
            "media" => Ok(ContentType::Media),
            "scene" => Ok(ContentType::Scene),
            other => Err(ScheduleError::validation(format!(
                "unknown content type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_type: ContentType,
    pub content_id: i32,
}

impl ContentRef {
    pub fn new(content_type: ContentType, content_id: i32) -> Self {
        Self {
            content_type,
            content_id,
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type.as_str(), self.content_id)
    }
}

// Entry attributes

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    Content,
    ScreenOff,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Content => "content",
            EventType::ScreenOff => "screen_off",
        }
    }
}

impl FromStr for EventType {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(EventType::Content),
            "screen_off" => Ok(EventType::ScreenOff),
            other => Err(ScheduleError::validation(format!(
                "unknown event type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatType {
    Daily,
    Weekly,
}

impl RepeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatType::Daily => "daily",
            RepeatType::Weekly => "weekly",
        }
    }
}

impl FromStr for RepeatType {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(RepeatType::Daily),
            "weekly" => Ok(RepeatType::Weekly),
            other => Err(ScheduleError::validation(format!(
                "unknown repeat type '{}'",
                other
            ))),
        }
    }
}

fn default_interval() -> u32 {
    1
}

/// Recurrence layered on top of the day-of-week set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatConfig {
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Defaults to the entry's `start_date` when absent.
    #[serde(default)]
    pub anchor_date: Option<NaiveDate>,
    #[serde(default)]
    pub until_date: Option<NaiveDate>,
    #[serde(default)]
    pub until_count: Option<u32>,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            interval: 1,
            anchor_date: None,
            until_date: None,
            until_count: None,
        }
    }
}

/// Set of weekdays, Sunday = 0 through Saturday = 6, kept as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(0b0011_1110);
    pub const ALL: DaysOfWeek = DaysOfWeek(0b0111_1111);

    pub fn from_days(days: &[u8]) -> Result<Self, ScheduleError> {
        if days.is_empty() {
            return Err(ScheduleError::validation("days_of_week must not be empty"));
        }
        let mut mask = 0u8;
        for &day in days {
            if day > 6 {
                return Err(ScheduleError::validation(format!(
                    "invalid day index {} (expected 0-6, Sunday = 0)",
                    day
                )));
            }
            mask |= 1 << day;
        }
        Ok(DaysOfWeek(mask))
    }

    pub fn contains(&self, day: u8) -> bool {
        day <= 6 && self.0 & (1 << day) != 0
    }

    pub fn intersects(&self, other: &DaysOfWeek) -> bool {
        self.0 & other.0 != 0
    }

    pub fn days(&self) -> Vec<u8> {
        (0..7).filter(|d| self.contains(*d)).collect()
    }
}

impl TryFrom<Vec<u8>> for DaysOfWeek {
    type Error = ScheduleError;

    fn try_from(days: Vec<u8>) -> Result<Self, Self::Error> {
        DaysOfWeek::from_days(&days)
    }
}

impl From<DaysOfWeek> for Vec<u8> {
    fn from(days: DaysOfWeek) -> Self {
        days.days()
    }
}

// Schedule models
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::schedules)]
pub struct Schedule {
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub timezone: String,
    pub filler_content_type: Option<String>,
    pub filler_content_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Schedule {
    pub fn filler(&self) -> Result<Option<ContentRef>, ScheduleError> {
        match (&self.filler_content_type, self.filler_content_id) {
            (Some(kind), Some(content_id)) => {
                let content_type = kind.parse().map_err(|_| ScheduleError::CorruptRecord {
                    kind: "schedule",
                    id: self.id,
                    detail: format!("filler content type '{}'", kind),
                })?;
                Ok(Some(ContentRef::new(content_type, content_id)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::schedules)]
pub struct NewSchedule {
    pub tenant_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub timezone: String,
}

// Schedule Entry models
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::schedule_entries)]
pub struct ScheduleEntryRow {
    pub id: i32,
    pub schedule_id: i32,
    pub content_type: String,
    pub content_id: i32,
    pub target_type: Option<String>,
    pub target_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub days_of_week: String,
    pub priority: i32,
    pub is_active: bool,
    pub event_type: String,
    pub repeat_type: Option<String>,
    pub repeat_config: Option<String>,
    pub campaign_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::schedule_entries)]
#[diesel(treat_none_as_null = true)]
pub struct NewScheduleEntryRow {
    pub schedule_id: i32,
    pub content_type: String,
    pub content_id: i32,
    pub target_type: Option<String>,
    pub target_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub days_of_week: String,
    pub priority: i32,
    pub is_active: bool,
    pub event_type: String,
    pub repeat_type: Option<String>,
    pub repeat_config: Option<String>,
    pub campaign_id: Option<i32>,
    pub updated_at: NaiveDateTime,
}

/// One time-windowed rule of a schedule, decoded from its storage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: i32,
    pub schedule_id: i32,
    pub content: ContentRef,
    pub target_type: Option<String>,
    pub target_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub days_of_week: DaysOfWeek,
    pub priority: i32,
    pub is_active: bool,
    pub event_type: EventType,
    pub repeat_type: Option<RepeatType>,
    pub repeat_config: Option<RepeatConfig>,
    pub campaign_id: Option<i32>,
}

impl TryFrom<ScheduleEntryRow> for ScheduleEntry {
    type Error = ScheduleError;

    fn try_from(row: ScheduleEntryRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| ScheduleError::CorruptRecord {
            kind: "schedule entry",
            id: row.id,
            detail,
        };

        let content_type: ContentType = row
            .content_type
            .parse()
            .map_err(|e: ScheduleError| corrupt(e.to_string()))?;
        let event_type: EventType = row
            .event_type
            .parse()
            .map_err(|e: ScheduleError| corrupt(e.to_string()))?;
        let repeat_type = row
            .repeat_type
            .as_deref()
            .map(RepeatType::from_str)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let days: Vec<u8> = serde_json::from_str(&row.days_of_week)
            .map_err(|e| corrupt(format!("days_of_week: {}", e)))?;
        let days_of_week = DaysOfWeek::from_days(&days).map_err(|e| corrupt(e.to_string()))?;
        let repeat_config = row
            .repeat_config
            .as_deref()
            .map(serde_json::from_str::<RepeatConfig>)
            .transpose()
            .map_err(|e| corrupt(format!("repeat_config: {}", e)))?;

        Ok(ScheduleEntry {
            id: row.id,
            schedule_id: row.schedule_id,
            content: ContentRef::new(content_type, row.content_id),
            target_type: row.target_type,
            target_id: row.target_id,
            start_date: row.start_date,
            end_date: row.end_date,
            start_time: row.start_time,
            end_time: row.end_time,
            days_of_week,
            priority: row.priority,
            is_active: row.is_active,
            event_type,
            repeat_type,
            repeat_config,
            campaign_id: row.campaign_id,
        })
    }
}

// Device models
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::devices)]
pub struct Device {
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub group_id: Option<i32>,
    pub assigned_schedule_id: Option<i32>,
    pub default_scene_id: Option<i32>,
    pub last_seen_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::device_groups)]
pub struct DeviceGroup {
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    pub assigned_schedule_id: Option<i32>,
    pub default_scene_id: Option<i32>,
}

/// A device or screen-group that content is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Device(i32),
    Group(i32),
}

impl TargetRef {
    pub fn kind(&self) -> &'static str {
        match self {
            TargetRef::Device(_) => "device",
            TargetRef::Group(_) => "group",
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            TargetRef::Device(id) | TargetRef::Group(id) => *id,
        }
    }
}

// Campaign models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignSeverity {
    Emergency,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i32,
    pub name: String,
    pub severity: CampaignSeverity,
    pub status: CampaignStatus,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    pub content: ContentRef,
    #[serde(default)]
    pub priority: i32,
}

impl Campaign {
    /// Active status and inside its own `[starts_at, ends_at)` window.
    pub fn is_live(&self, at: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active
            && self.starts_at.map_or(true, |start| start <= at)
            && self.ends_at.map_or(true, |end| at < end)
    }

    pub fn is_emergency(&self) -> bool {
        self.severity == CampaignSeverity::Emergency
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::campaigns)]
pub struct CampaignRow {
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    pub severity: String,
    pub status: String,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub content_type: String,
    pub content_id: i32,
    pub priority: i32,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = ScheduleError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| ScheduleError::CorruptRecord {
            kind: "campaign",
            id: row.id,
            detail,
        };
        let severity: CampaignSeverity =
            serde_json::from_value(serde_json::Value::String(row.severity.clone()))
                .map_err(|_| corrupt(format!("severity '{}'", row.severity)))?;
        let status: CampaignStatus =
            serde_json::from_value(serde_json::Value::String(row.status.clone()))
                .map_err(|_| corrupt(format!("status '{}'", row.status)))?;
        let content_type: ContentType = row
            .content_type
            .parse()
            .map_err(|e: ScheduleError| corrupt(e.to_string()))?;

        Ok(Campaign {
            id: row.id,
            name: row.name,
            severity,
            status,
            starts_at: row.starts_at.map(|t| t.and_utc()),
            ends_at: row.ends_at.map(|t| t.and_utc()),
            content: ContentRef::new(content_type, row.content_id),
            priority: row.priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_of_week_rejects_out_of_range() {
        assert!(DaysOfWeek::from_days(&[0, 6]).is_ok());
        assert!(matches!(
            DaysOfWeek::from_days(&[7]),
            Err(ScheduleError::Validation(_))
        ));
        assert!(matches!(
            DaysOfWeek::from_days(&[]),
            Err(ScheduleError::Validation(_))
        ));
    }

    #[test]
    fn test_days_of_week_serde() {
        let days: DaysOfWeek = serde_json::from_str("[5,1,3,1]").unwrap();
        assert_eq!(days.days(), vec![1, 3, 5]);
        assert_eq!(serde_json::to_string(&days).unwrap(), "[1,3,5]");
        assert!(serde_json::from_str::<DaysOfWeek>("[9]").is_err());
        assert_eq!(DaysOfWeek::WEEKDAYS.days(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_entry_row_decodes() {
        let now = chrono::Utc::now().naive_utc();
        let row = ScheduleEntryRow {
            id: 3,
            schedule_id: 1,
            content_type: "playlist".into(),
            content_id: 42,
            target_type: None,
            target_id: None,
            start_date: None,
            end_date: None,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            days_of_week: "[1,2,3]".into(),
            priority: 2,
            is_active: true,
            event_type: "screen_off".into(),
            repeat_type: Some("weekly".into()),
            repeat_config: Some(r#"{"interval":2}"#.into()),
            campaign_id: None,
            created_at: now,
            updated_at: now,
        };

        let entry = ScheduleEntry::try_from(row.clone()).unwrap();
        assert_eq!(entry.content, ContentRef::new(ContentType::Playlist, 42));
        assert_eq!(entry.event_type, EventType::ScreenOff);
        assert_eq!(entry.repeat_type, Some(RepeatType::Weekly));
        assert_eq!(entry.repeat_config.unwrap().interval, 2);

        let broken = ScheduleEntryRow {
            content_type: "hologram".into(),
            ..row
        };
        assert!(matches!(
            ScheduleEntry::try_from(broken),
            Err(ScheduleError::CorruptRecord { id: 3, .. })
        ));
    }

    #[test]
    fn test_campaign_live_window() {
        let start = "2024-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let end = "2024-06-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let campaign = Campaign {
            id: 1,
            name: "Flash sale".into(),
            severity: CampaignSeverity::Normal,
            status: CampaignStatus::Active,
            starts_at: Some(start),
            ends_at: Some(end),
            content: ContentRef::new(ContentType::Scene, 9),
            priority: 0,
        };

        assert!(campaign.is_live(start));
        assert!(!campaign.is_live(end));
        assert!(!campaign.is_live(start - chrono::Duration::seconds(1)));

        let paused = Campaign {
            status: CampaignStatus::Paused,
            ..campaign
        };
        assert!(!paused.is_live(start));
    }
}
