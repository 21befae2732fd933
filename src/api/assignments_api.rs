use crate::auth::Actor;
use crate::error::ScheduleError;
use crate::models::Device;
use crate::services::assignment_service::{self, AssignmentRequest, AssignmentSummary};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct DefaultSceneRequest {
    pub scene_id: Option<i32>,
}

pub async fn assign_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<i32>,
    Json(req): Json<AssignmentRequest>,
) -> Result<Json<AssignmentSummary>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let summary = assignment_service::assign_schedule(&mut conn, &actor, schedule_id, &req)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(summary))
}

pub async fn unassign_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<AssignmentRequest>,
) -> Result<Json<AssignmentSummary>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let summary = assignment_service::unassign_schedule(&mut conn, &actor, &req)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(summary))
}

pub async fn set_default_scene(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(device_id): Path<i32>,
    Json(req): Json<DefaultSceneRequest>,
) -> Result<Json<Device>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let device = assignment_service::set_default_scene(&mut conn, &actor, device_id, req.scene_id)
        .map_err(ScheduleError::into_status)?;

    Ok(Json(device))
}
