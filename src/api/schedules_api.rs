use crate::auth::Actor;
use crate::error::ScheduleError;
use crate::models::{ContentRef, Schedule, ScheduleEntry};
use crate::services::conflict_detector::{self, Conflict};
use crate::services::content_catalog;
use crate::services::resolver::{self, Decision};
use crate::services::schedule_store::{
    self, EntryInput, ScheduleInput, ScheduleStore, ScheduleUpdate,
};
use crate::services::week_preview::{self, DayPlan};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct EntryResponse {
    pub entry: ScheduleEntry,
    /// Existing entries the saved window overlaps. Advisory only.
    pub conflicts: Vec<Conflict>,
}

#[derive(Deserialize)]
pub struct ConflictCheckRequest {
    #[serde(flatten)]
    pub entry: EntryInput,
    pub exclude_entry_id: Option<i32>,
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub start_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub schedule_id: i32,
    pub at: DateTime<Utc>,
    pub decision: Decision,
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Schedule>>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedules = ScheduleStore::new(&mut conn, &state.cache)
        .list_schedules(&actor)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(schedules))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<Schedule>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedule = ScheduleStore::new(&mut conn, &state.cache)
        .get_schedule(&actor, schedule_id)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(schedule))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(input): Json<ScheduleInput>,
) -> Result<Json<Schedule>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedule = ScheduleStore::new(&mut conn, &state.cache)
        .create_schedule(&actor, input)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(schedule))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Json(update): Json<ScheduleUpdate>,
) -> Result<Json<Schedule>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedule = ScheduleStore::new(&mut conn, &state.cache)
        .update_schedule(&actor, schedule_id, update)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    ScheduleStore::new(&mut conn, &state.cache)
        .delete_schedule(&actor, schedule_id)
        .map_err(ScheduleError::into_status)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_entries(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<Vec<ScheduleEntry>>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let entries = ScheduleStore::new(&mut conn, &state.cache)
        .list_entries(&actor, schedule_id)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(entries))
}

pub async fn create_entry(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Json(input): Json<EntryInput>,
) -> Result<Json<EntryResponse>, StatusCode> {
    let policy = state.config.resolution.overnight_windows;
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let conflicts = conflict_detector::detect_conflicts(
        &mut conn,
        &actor,
        schedule_id,
        input.clone(),
        None,
        policy,
    )
    .map_err(ScheduleError::into_status)?;

    let entry = ScheduleStore::new(&mut conn, &state.cache)
        .create_entry(&actor, schedule_id, input)
        .map_err(ScheduleError::into_status)?;

    if !conflicts.is_empty() {
        tracing::debug!(
            "Entry {} overlaps {} existing entries",
            entry.id,
            conflicts.len()
        );
    }

    Ok(Json(EntryResponse { entry, conflicts }))
}

pub async fn update_entry(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((schedule_id, entry_id)): Path<(i32, i32)>,
    Json(input): Json<EntryInput>,
) -> Result<Json<EntryResponse>, StatusCode> {
    let policy = state.config.resolution.overnight_windows;
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let entry = ScheduleStore::new(&mut conn, &state.cache)
        .update_entry(&actor, schedule_id, entry_id, input.clone())
        .map_err(ScheduleError::into_status)?;

    let conflicts = conflict_detector::detect_conflicts(
        &mut conn,
        &actor,
        schedule_id,
        input,
        Some(entry_id),
        policy,
    )
    .map_err(ScheduleError::into_status)?;

    Ok(Json(EntryResponse { entry, conflicts }))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((schedule_id, entry_id)): Path<(i32, i32)>,
) -> Result<StatusCode, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    ScheduleStore::new(&mut conn, &state.cache)
        .delete_entry(&actor, schedule_id, entry_id)
        .map_err(ScheduleError::into_status)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn find_conflicts(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Json(req): Json<ConflictCheckRequest>,
) -> Result<Json<Vec<Conflict>>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let conflicts = conflict_detector::detect_conflicts(
        &mut conn,
        &actor,
        schedule_id,
        req.entry,
        req.exclude_entry_id,
        state.config.resolution.overnight_windows,
    )
    .map_err(ScheduleError::into_status)?;

    Ok(Json(conflicts))
}

pub async fn set_filler(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Json(content): Json<ContentRef>,
) -> Result<Json<Schedule>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedule = ScheduleStore::new(&mut conn, &state.cache)
        .set_filler_content(&actor, schedule_id, content)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(schedule))
}

pub async fn clear_filler(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<Schedule>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedule = ScheduleStore::new(&mut conn, &state.cache)
        .clear_filler_content(&actor, schedule_id)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(schedule))
}

pub async fn preview_week(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<Vec<DayPlan>>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let schedule = schedule_store::find_schedule(&mut conn, actor.tenant_id, schedule_id)
        .map_err(ScheduleError::into_status)?;
    let entries = schedule_store::load_entries(&mut conn, schedule_id)
        .map_err(ScheduleError::into_status)?;
    let filler = schedule.filler().map_err(ScheduleError::into_status)?;
    let labels = content_catalog::content_labels(
        &mut conn,
        actor.tenant_id,
        entries.iter().map(|e| e.content),
    )
    .map_err(ScheduleError::into_status)?;

    let start_date = match query.start_date {
        Some(date) => date,
        None => {
            let tz = resolver::parse_timezone(&schedule.timezone)
                .map_err(ScheduleError::into_status)?;
            Utc::now().with_timezone(&tz).date_naive()
        }
    };

    let week = week_preview::preview_week(
        &schedule,
        &entries,
        filler,
        start_date,
        &labels,
        state.config.resolution.overnight_windows,
    )
    .map_err(ScheduleError::into_status)?;

    Ok(Json(week))
}

pub async fn resolve_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, StatusCode> {
    let at = query.at.unwrap_or_else(Utc::now);

    let decision = state
        .engine
        .resolve_schedule(actor.tenant_id, schedule_id, at)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(ResolveResponse {
        schedule_id,
        at,
        decision,
    }))
}
