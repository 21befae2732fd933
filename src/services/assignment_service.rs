use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::auth::Actor;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{ContentRef, ContentType, Device, DeviceGroup, TargetRef};
use crate::services::content_catalog;
use crate::services::schedule_store::{find_schedule, require_editor};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentRequest {
    #[serde(default)]
    pub device_ids: Vec<i32>,
    #[serde(default)]
    pub group_ids: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssignmentSummary {
    pub schedule_id: Option<i32>,
    pub devices: usize,
    pub groups: usize,
}

/// Everything resolution needs to know about a target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetContext {
    pub target: TargetRef,
    pub tenant_id: i32,
    pub device_id: Option<i32>,
    pub group_id: Option<i32>,
    pub schedule_id: Option<i32>,
    pub default_scene: Option<ContentRef>,
}

fn unique(ids: &[i32]) -> Vec<i32> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Fails with the first id that is unknown to the tenant.
fn ensure_devices_exist(conn: &mut SqliteConnection, tenant_id: i32, ids: &[i32]) -> ScheduleResult<()> {
    use crate::schema::devices::dsl;

    let found: BTreeSet<i32> = dsl::devices
        .filter(dsl::tenant_id.eq(tenant_id))
        .filter(dsl::id.eq_any(ids))
        .select(dsl::id)
        .load::<i32>(conn)?
        .into_iter()
        .collect();

    match ids.iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(ScheduleError::not_found("device", *missing)),
        None => Ok(()),
    }
}

fn ensure_groups_exist(conn: &mut SqliteConnection, tenant_id: i32, ids: &[i32]) -> ScheduleResult<()> {
    use crate::schema::device_groups::dsl;

    let found: BTreeSet<i32> = dsl::device_groups
        .filter(dsl::tenant_id.eq(tenant_id))
        .filter(dsl::id.eq_any(ids))
        .select(dsl::id)
        .load::<i32>(conn)?
        .into_iter()
        .collect();

    match ids.iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(ScheduleError::not_found("group", *missing)),
        None => Ok(()),
    }
}

fn set_assignment(
    conn: &mut SqliteConnection,
    actor: &Actor,
    schedule_id: Option<i32>,
    request: &AssignmentRequest,
) -> ScheduleResult<AssignmentSummary> {
    use crate::schema::{device_groups, devices};

    let device_ids = unique(&request.device_ids);
    let group_ids = unique(&request.group_ids);

    conn.transaction(|conn| -> ScheduleResult<AssignmentSummary> {
        if let Some(schedule_id) = schedule_id {
            find_schedule(conn, actor.tenant_id, schedule_id)?;
        }
        ensure_devices_exist(conn, actor.tenant_id, &device_ids)?;
        ensure_groups_exist(conn, actor.tenant_id, &group_ids)?;

        let devices = diesel::update(
            devices::table
                .filter(devices::tenant_id.eq(actor.tenant_id))
                .filter(devices::id.eq_any(&device_ids)),
        )
        .set(devices::assigned_schedule_id.eq(schedule_id))
        .execute(conn)?;

        let groups = diesel::update(
            device_groups::table
                .filter(device_groups::tenant_id.eq(actor.tenant_id))
                .filter(device_groups::id.eq_any(&group_ids)),
        )
        .set(device_groups::assigned_schedule_id.eq(schedule_id))
        .execute(conn)?;

        Ok(AssignmentSummary {
            schedule_id,
            devices,
            groups,
        })
    })
}

/// Points every listed device and group at `schedule_id`. All or nothing.
pub fn assign_schedule(
    conn: &mut SqliteConnection,
    actor: &Actor,
    schedule_id: i32,
    request: &AssignmentRequest,
) -> ScheduleResult<AssignmentSummary> {
    require_editor(actor)?;
    let summary = set_assignment(conn, actor, Some(schedule_id), request)?;
    tracing::info!(
        "Assigned schedule {} to {} devices and {} groups",
        schedule_id,
        summary.devices,
        summary.groups
    );
    Ok(summary)
}

pub fn unassign_schedule(
    conn: &mut SqliteConnection,
    actor: &Actor,
    request: &AssignmentRequest,
) -> ScheduleResult<AssignmentSummary> {
    require_editor(actor)?;
    let summary = set_assignment(conn, actor, None, request)?;
    tracing::info!(
        "Cleared schedule assignment of {} devices and {} groups",
        summary.devices,
        summary.groups
    );
    Ok(summary)
}

/// Sets or clears the scene a device falls back to when nothing else plays.
pub fn set_default_scene(
    conn: &mut SqliteConnection,
    actor: &Actor,
    device_id: i32,
    scene_id: Option<i32>,
) -> ScheduleResult<Device> {
    require_editor(actor)?;
    use crate::schema::devices::dsl;

    if let Some(scene_id) = scene_id {
        content_catalog::ensure_assignable(conn, actor, ContentRef::new(ContentType::Scene, scene_id))?;
    }

    diesel::update(
        dsl::devices
            .filter(dsl::id.eq(device_id))
            .filter(dsl::tenant_id.eq(actor.tenant_id)),
    )
    .set(dsl::default_scene_id.eq(scene_id))
    .returning(Device::as_select())
    .get_result::<Device>(conn)
    .optional()?
    .ok_or_else(|| ScheduleError::not_found("device", device_id))
}

fn find_device(conn: &mut SqliteConnection, tenant_id: i32, device_id: i32) -> ScheduleResult<Device> {
    use crate::schema::devices::dsl;

    dsl::devices
        .filter(dsl::id.eq(device_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .select(Device::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ScheduleError::not_found("device", device_id))
}

fn find_group(conn: &mut SqliteConnection, tenant_id: i32, group_id: i32) -> ScheduleResult<DeviceGroup> {
    use crate::schema::device_groups::dsl;

    dsl::device_groups
        .filter(dsl::id.eq(group_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .select(DeviceGroup::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ScheduleError::not_found("group", group_id))
}

fn scene(id: Option<i32>) -> Option<ContentRef> {
    id.map(|id| ContentRef::new(ContentType::Scene, id))
}

/// Loads the assignment chain of a target. A device's own schedule wins over
/// its group's; the same holds for the default scene.
pub fn target_context(
    conn: &mut SqliteConnection,
    tenant_id: i32,
    target: TargetRef,
) -> ScheduleResult<TargetContext> {
    match target {
        TargetRef::Device(device_id) => {
            let device = find_device(conn, tenant_id, device_id)?;
            let group = match device.group_id {
                Some(group_id) => Some(find_group(conn, tenant_id, group_id)?),
                None => None,
            };
            let group_schedule = group.as_ref().and_then(|g| g.assigned_schedule_id);
            let group_scene = group.as_ref().and_then(|g| g.default_scene_id);

            Ok(TargetContext {
                target,
                tenant_id,
                device_id: Some(device.id),
                group_id: device.group_id,
                schedule_id: device.assigned_schedule_id.or(group_schedule),
                default_scene: scene(device.default_scene_id.or(group_scene)),
            })
        }
        TargetRef::Group(group_id) => {
            let group = find_group(conn, tenant_id, group_id)?;
            Ok(TargetContext {
                target,
                tenant_id,
                device_id: None,
                group_id: Some(group.id),
                schedule_id: group.assigned_schedule_id,
                default_scene: scene(group.default_scene_id),
            })
        }
    }
}

/// The device when `secret` matches its key.
pub fn authenticate_device(
    conn: &mut SqliteConnection,
    device_id: i32,
    secret: &str,
) -> ScheduleResult<Option<Device>> {
    use crate::schema::devices::dsl;

    Ok(dsl::devices
        .filter(dsl::id.eq(device_id))
        .filter(dsl::secret_key.eq(secret))
        .select(Device::as_select())
        .first(conn)
        .optional()?)
}

pub fn touch_device(conn: &mut SqliteConnection, device_id: i32) -> ScheduleResult<()> {
    use crate::schema::devices::dsl;

    diesel::update(dsl::devices.filter(dsl::id.eq(device_id)))
        .set(dsl::last_seen_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}
