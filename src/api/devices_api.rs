use crate::auth::Actor;
use crate::error::ScheduleError;
use crate::models::TargetRef;
use crate::services::assignment_service;
use crate::services::campaign_overlay::TargetResolution;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct DecisionQuery {
    pub at: Option<DateTime<Utc>>,
}

/// Operator view of what a device or group plays at an instant.
pub async fn target_decision(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((kind, id)): Path<(String, i32)>,
    Query(query): Query<DecisionQuery>,
) -> Result<Json<TargetResolution>, StatusCode> {
    let target = match kind.as_str() {
        "device" | "devices" => TargetRef::Device(id),
        "group" | "groups" => TargetRef::Group(id),
        _ => return Err(StatusCode::NOT_FOUND),
    };
    let at = query.at.unwrap_or_else(Utc::now);

    let resolution = state
        .engine
        .resolve_for_target(actor.tenant_id, target, at)
        .await
        .map_err(ScheduleError::into_status)?;

    Ok(Json(resolution))
}

/// Device poll. Authenticated by the device's own secret instead of a JWT.
pub async fn device_decision(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<TargetResolution>, StatusCode> {
    let secret = headers
        .get("X-Device-Secret")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let device = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let device = assignment_service::authenticate_device(&mut conn, device_id, secret)
            .map_err(ScheduleError::into_status)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if let Err(e) = assignment_service::touch_device(&mut conn, device.id) {
            tracing::warn!("Failed to record poll of device {}: {}", device.id, e);
        }
        device
    };

    let resolution = state
        .engine
        .resolve_for_target(device.tenant_id, TargetRef::Device(device.id), Utc::now())
        .await
        .map_err(ScheduleError::into_status)?;

    Ok(Json(resolution))
}
