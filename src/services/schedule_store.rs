use chrono::{NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Deserializer};

use crate::auth::Actor;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{
    ContentRef, ContentType, DaysOfWeek, EventType, NewSchedule, NewScheduleEntryRow, RepeatConfig,
    RepeatType, Schedule, ScheduleEntry, ScheduleEntryRow,
};
use crate::services::content_catalog;
use crate::services::decision_cache::DecisionCache;
use crate::services::resolver::parse_timezone;

const DEFAULT_START_TIME: &str = "09:00";
const DEFAULT_END_TIME: &str = "17:00";

#[derive(Debug, Deserialize)]
pub struct ScheduleInput {
    pub name: String,
    pub description: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    /// Absent keeps the description, `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub timezone: Option<String>,
}

/// Marks a field that was sent, even as `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Entry fields as an editor submits them. Omitted fields take defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryInput {
    pub content_type: ContentType,
    pub content_id: i32,
    pub target_type: Option<String>,
    pub target_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub days_of_week: Option<Vec<u8>>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub event_type: Option<EventType>,
    pub repeat_type: Option<RepeatType>,
    pub repeat_config: Option<RepeatConfig>,
    pub campaign_id: Option<i32>,
}

impl EntryInput {
    pub fn new(content: ContentRef) -> Self {
        Self {
            content_type: content.content_type,
            content_id: content.content_id,
            target_type: None,
            target_id: None,
            start_date: None,
            end_date: None,
            start_time: None,
            end_time: None,
            days_of_week: None,
            priority: None,
            is_active: None,
            event_type: None,
            repeat_type: None,
            repeat_config: None,
            campaign_id: None,
        }
    }

    /// Validates the input and fills in defaults. The returned entry carries
    /// the given ids; nothing is written.
    pub fn into_entry(self, id: i32, schedule_id: i32) -> ScheduleResult<ScheduleEntry> {
        let start_time = parse_wall_clock(self.start_time.as_deref().unwrap_or(DEFAULT_START_TIME))?;
        let end_time = parse_wall_clock(self.end_time.as_deref().unwrap_or(DEFAULT_END_TIME))?;
        if start_time == end_time {
            return Err(ScheduleError::validation(
                "start_time and end_time must differ",
            ));
        }

        let days_of_week = match &self.days_of_week {
            Some(days) => DaysOfWeek::from_days(days)?,
            None => DaysOfWeek::WEEKDAYS,
        };

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ScheduleError::validation(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }

        match (self.repeat_type, &self.repeat_config) {
            (None, Some(_)) => {
                return Err(ScheduleError::validation(
                    "repeat_config requires a repeat_type",
                ))
            }
            (Some(_), config) => {
                let default_config = RepeatConfig::default();
                let config = config.as_ref().unwrap_or(&default_config);
                if config.interval == 0 {
                    return Err(ScheduleError::validation("repeat interval must be at least 1"));
                }
                if config.until_count == Some(0) {
                    return Err(ScheduleError::validation("repeat until_count must be at least 1"));
                }
                if config.anchor_date.or(self.start_date).is_none() {
                    return Err(ScheduleError::validation(
                        "a recurring entry needs a start_date or repeat anchor_date",
                    ));
                }
            }
            (None, None) => {}
        }

        Ok(ScheduleEntry {
            id,
            schedule_id,
            content: ContentRef::new(self.content_type, self.content_id),
            target_type: self.target_type,
            target_id: self.target_id,
            start_date: self.start_date,
            end_date: self.end_date,
            start_time,
            end_time,
            days_of_week,
            priority: self.priority.unwrap_or(0),
            is_active: self.is_active.unwrap_or(true),
            event_type: self.event_type.unwrap_or_default(),
            repeat_type: self.repeat_type,
            repeat_config: self.repeat_config,
            campaign_id: self.campaign_id,
        })
    }
}

/// Parses a wall-clock `HH:MM` value.
pub fn parse_wall_clock(value: &str) -> ScheduleResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
        ScheduleError::validation(format!("malformed time '{}' (expected HH:MM)", value))
    })
}

fn validate_name(name: &str) -> ScheduleResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ScheduleError::validation("schedule name must not be empty"));
    }
    Ok(name.to_string())
}

fn validate_timezone(timezone: &str) -> ScheduleResult<String> {
    parse_timezone(timezone)
        .map(|_| timezone.to_string())
        .map_err(|_| ScheduleError::validation(format!("unknown timezone '{}'", timezone)))
}

fn entry_row(entry: &ScheduleEntry) -> ScheduleResult<NewScheduleEntryRow> {
    let days_of_week = serde_json::to_string(&entry.days_of_week.days())
        .map_err(|e| ScheduleError::validation(format!("days_of_week: {}", e)))?;
    let repeat_config = entry
        .repeat_config
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| ScheduleError::validation(format!("repeat_config: {}", e)))?;

    Ok(NewScheduleEntryRow {
        schedule_id: entry.schedule_id,
        content_type: entry.content.content_type.as_str().to_string(),
        content_id: entry.content.content_id,
        target_type: entry.target_type.clone(),
        target_id: entry.target_id,
        start_date: entry.start_date,
        end_date: entry.end_date,
        start_time: entry.start_time,
        end_time: entry.end_time,
        days_of_week,
        priority: entry.priority,
        is_active: entry.is_active,
        event_type: entry.event_type.as_str().to_string(),
        repeat_type: entry.repeat_type.map(|r| r.as_str().to_string()),
        repeat_config,
        campaign_id: entry.campaign_id,
        updated_at: Utc::now().naive_utc(),
    })
}

pub(crate) fn require_editor(actor: &Actor) -> ScheduleResult<()> {
    if actor.is_editor() {
        Ok(())
    } else {
        Err(ScheduleError::Forbidden(format!(
            "role {:?} cannot modify schedules",
            actor.role
        )))
    }
}

/// Schedule load scoped to a tenant.
pub fn find_schedule(
    conn: &mut SqliteConnection,
    tenant_id: i32,
    schedule_id: i32,
) -> ScheduleResult<Schedule> {
    use crate::schema::schedules::dsl;

    dsl::schedules
        .filter(dsl::id.eq(schedule_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .select(Schedule::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ScheduleError::not_found("schedule", schedule_id))
}

/// Entries of a schedule ordered by id.
pub fn load_entries(
    conn: &mut SqliteConnection,
    schedule_id: i32,
) -> ScheduleResult<Vec<ScheduleEntry>> {
    use crate::schema::schedule_entries::dsl;

    dsl::schedule_entries
        .filter(dsl::schedule_id.eq(schedule_id))
        .order(dsl::id.asc())
        .select(ScheduleEntryRow::as_select())
        .load::<ScheduleEntryRow>(conn)?
        .into_iter()
        .map(ScheduleEntry::try_from)
        .collect()
}

/// Durable CRUD for schedules and their entries. Every mutation invalidates
/// the affected schedule in the decision cache once it has committed.
pub struct ScheduleStore<'a> {
    conn: &'a mut SqliteConnection,
    cache: &'a DecisionCache,
}

impl<'a> ScheduleStore<'a> {
    pub fn new(conn: &'a mut SqliteConnection, cache: &'a DecisionCache) -> Self {
        Self { conn, cache }
    }

    pub fn list_schedules(&mut self, actor: &Actor) -> ScheduleResult<Vec<Schedule>> {
        use crate::schema::schedules::dsl;

        Ok(dsl::schedules
            .filter(dsl::tenant_id.eq(actor.tenant_id))
            .order(dsl::name.asc())
            .select(Schedule::as_select())
            .load(self.conn)?)
    }

    pub fn get_schedule(&mut self, actor: &Actor, schedule_id: i32) -> ScheduleResult<Schedule> {
        find_schedule(self.conn, actor.tenant_id, schedule_id)
    }

    pub fn create_schedule(&mut self, actor: &Actor, input: ScheduleInput) -> ScheduleResult<Schedule> {
        require_editor(actor)?;
        use crate::schema::schedules;

        let new_schedule = NewSchedule {
            tenant_id: actor.tenant_id,
            name: validate_name(&input.name)?,
            description: input.description,
            timezone: validate_timezone(input.timezone.as_deref().unwrap_or("UTC"))?,
        };

        let schedule = diesel::insert_into(schedules::table)
            .values(&new_schedule)
            .returning(Schedule::as_select())
            .get_result(self.conn)?;

        tracing::info!(
            "Created schedule {} '{}' for tenant {}",
            schedule.id,
            schedule.name,
            schedule.tenant_id
        );
        Ok(schedule)
    }

    pub fn update_schedule(
        &mut self,
        actor: &Actor,
        schedule_id: i32,
        update: ScheduleUpdate,
    ) -> ScheduleResult<Schedule> {
        require_editor(actor)?;
        use crate::schema::schedules::dsl;

        let name = update.name.as_deref().map(validate_name).transpose()?;
        let timezone = update.timezone.as_deref().map(validate_timezone).transpose()?;

        let schedule = self.conn.transaction(|conn| -> ScheduleResult<Schedule> {
            let current = find_schedule(conn, actor.tenant_id, schedule_id)?;
            diesel::update(dsl::schedules.filter(dsl::id.eq(schedule_id)))
                .set((
                    dsl::name.eq(name.unwrap_or(current.name)),
                    dsl::description.eq(update.description.unwrap_or(current.description)),
                    dsl::timezone.eq(timezone.unwrap_or(current.timezone)),
                    dsl::updated_at.eq(Utc::now().naive_utc()),
                ))
                .returning(Schedule::as_select())
                .get_result::<Schedule>(conn)
                .map_err(ScheduleError::from)
        })?;

        self.cache.invalidate(schedule_id);
        Ok(schedule)
    }

    /// Deletes a schedule, its entries, and every assignment pointing at it.
    pub fn delete_schedule(&mut self, actor: &Actor, schedule_id: i32) -> ScheduleResult<()> {
        require_editor(actor)?;
        use crate::schema::{device_groups, devices, schedule_entries, schedules};

        self.conn.transaction(|conn| -> ScheduleResult<()> {
            find_schedule(conn, actor.tenant_id, schedule_id)?;

            diesel::delete(
                schedule_entries::table.filter(schedule_entries::schedule_id.eq(schedule_id)),
            )
            .execute(conn)?;
            diesel::update(devices::table.filter(devices::assigned_schedule_id.eq(schedule_id)))
                .set(devices::assigned_schedule_id.eq(None::<i32>))
                .execute(conn)?;
            diesel::update(
                device_groups::table.filter(device_groups::assigned_schedule_id.eq(schedule_id)),
            )
            .set(device_groups::assigned_schedule_id.eq(None::<i32>))
            .execute(conn)?;
            diesel::delete(schedules::table.filter(schedules::id.eq(schedule_id))).execute(conn)?;
            Ok(())
        })?;

        self.cache.forget(schedule_id);
        tracing::info!("Deleted schedule {}", schedule_id);
        Ok(())
    }

    pub fn list_entries(&mut self, actor: &Actor, schedule_id: i32) -> ScheduleResult<Vec<ScheduleEntry>> {
        find_schedule(self.conn, actor.tenant_id, schedule_id)?;
        load_entries(self.conn, schedule_id)
    }

    pub fn create_entry(
        &mut self,
        actor: &Actor,
        schedule_id: i32,
        input: EntryInput,
    ) -> ScheduleResult<ScheduleEntry> {
        require_editor(actor)?;
        use crate::schema::schedule_entries;

        let draft = input.into_entry(0, schedule_id)?;
        let row = entry_row(&draft)?;

        let entry = self.conn.transaction(|conn| -> ScheduleResult<ScheduleEntry> {
            find_schedule(conn, actor.tenant_id, schedule_id)?;
            content_catalog::ensure_assignable(conn, actor, draft.content)?;

            let stored = diesel::insert_into(schedule_entries::table)
                .values(&row)
                .returning(ScheduleEntryRow::as_select())
                .get_result::<ScheduleEntryRow>(conn)?;
            ScheduleEntry::try_from(stored)
        })?;

        self.cache.invalidate(schedule_id);
        tracing::info!("Created entry {} on schedule {}", entry.id, schedule_id);
        Ok(entry)
    }

    /// Replaces an entry's fields. Omitted fields take the same defaults as
    /// on create.
    pub fn update_entry(
        &mut self,
        actor: &Actor,
        schedule_id: i32,
        entry_id: i32,
        input: EntryInput,
    ) -> ScheduleResult<ScheduleEntry> {
        require_editor(actor)?;
        use crate::schema::schedule_entries::dsl;

        let draft = input.into_entry(entry_id, schedule_id)?;
        let row = entry_row(&draft)?;

        let entry = self.conn.transaction(|conn| -> ScheduleResult<ScheduleEntry> {
            find_schedule(conn, actor.tenant_id, schedule_id)?;
            content_catalog::ensure_assignable(conn, actor, draft.content)?;

            let stored = diesel::update(
                dsl::schedule_entries
                    .filter(dsl::id.eq(entry_id))
                    .filter(dsl::schedule_id.eq(schedule_id)),
            )
            .set(&row)
            .returning(ScheduleEntryRow::as_select())
            .get_result::<ScheduleEntryRow>(conn)
            .optional()?
            .ok_or_else(|| ScheduleError::not_found("entry", entry_id))?;
            ScheduleEntry::try_from(stored)
        })?;

        self.cache.invalidate(schedule_id);
        tracing::info!("Updated entry {} on schedule {}", entry_id, schedule_id);
        Ok(entry)
    }

    pub fn delete_entry(&mut self, actor: &Actor, schedule_id: i32, entry_id: i32) -> ScheduleResult<()> {
        require_editor(actor)?;
        use crate::schema::schedule_entries::dsl;

        self.conn.transaction(|conn| -> ScheduleResult<()> {
            find_schedule(conn, actor.tenant_id, schedule_id)?;
            let deleted = diesel::delete(
                dsl::schedule_entries
                    .filter(dsl::id.eq(entry_id))
                    .filter(dsl::schedule_id.eq(schedule_id)),
            )
            .execute(conn)?;
            if deleted == 0 {
                return Err(ScheduleError::not_found("entry", entry_id));
            }
            Ok(())
        })?;

        self.cache.invalidate(schedule_id);
        tracing::info!("Deleted entry {} from schedule {}", entry_id, schedule_id);
        Ok(())
    }

    pub fn set_filler_content(
        &mut self,
        actor: &Actor,
        schedule_id: i32,
        content: ContentRef,
    ) -> ScheduleResult<Schedule> {
        require_editor(actor)?;
        self.write_filler(actor, schedule_id, Some(content))
    }

    pub fn clear_filler_content(&mut self, actor: &Actor, schedule_id: i32) -> ScheduleResult<Schedule> {
        require_editor(actor)?;
        self.write_filler(actor, schedule_id, None)
    }

    fn write_filler(
        &mut self,
        actor: &Actor,
        schedule_id: i32,
        content: Option<ContentRef>,
    ) -> ScheduleResult<Schedule> {
        use crate::schema::schedules::dsl;

        let schedule = self.conn.transaction(|conn| -> ScheduleResult<Schedule> {
            find_schedule(conn, actor.tenant_id, schedule_id)?;
            if let Some(content) = content {
                content_catalog::ensure_assignable(conn, actor, content)?;
            }

            diesel::update(dsl::schedules.filter(dsl::id.eq(schedule_id)))
                .set((
                    dsl::filler_content_type.eq(content.map(|c| c.content_type.as_str().to_string())),
                    dsl::filler_content_id.eq(content.map(|c| c.content_id)),
                    dsl::updated_at.eq(Utc::now().naive_utc()),
                ))
                .returning(Schedule::as_select())
                .get_result::<Schedule>(conn)
                .map_err(ScheduleError::from)
        })?;

        self.cache.invalidate(schedule_id);
        Ok(schedule)
    }
}
