pub(crate) mod db_source;
mod http_source;

use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::{CampaignSourceKind, CampaignsConfig};
use crate::db::DbPool;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::Campaign;

pub use db_source::DbCampaignSource;
pub use http_source::HttpCampaignSource;

/// Who a campaign lookup is for. A device also matches campaigns aimed at
/// its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetScope {
    pub tenant_id: i32,
    pub device_id: Option<i32>,
    pub group_id: Option<i32>,
}

/// The campaign collaborator. Implementations may be slow or unavailable;
/// callers bound every call with a timeout.
#[async_trait]
pub trait CampaignSource: Send + Sync {
    /// Active campaigns aimed at the scope's device or group.
    async fn active_campaigns_for(&self, scope: &TargetScope) -> ScheduleResult<Vec<Campaign>>;

    /// Campaigns of a tenant by id, whatever their status.
    async fn campaigns_by_id(&self, tenant_id: i32, ids: &[i32]) -> ScheduleResult<Vec<Campaign>>;
}

/// Greater wins: higher priority, then the earlier start, then the lower id.
/// A campaign without a start counts as the earliest.
pub fn campaign_order(a: &Campaign, b: &Campaign) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.starts_at.cmp(&a.starts_at))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn build_source(config: &CampaignsConfig, pool: DbPool) -> ScheduleResult<Arc<dyn CampaignSource>> {
    match config.source {
        CampaignSourceKind::Database => Ok(Arc::new(DbCampaignSource::new(pool))),
        CampaignSourceKind::Http => {
            let endpoint = config.endpoint_url.clone().ok_or_else(|| {
                ScheduleError::validation("campaigns.endpoint_url is required for the http source")
            })?;
            Ok(Arc::new(HttpCampaignSource::new(reqwest::Client::new(), endpoint)))
        }
    }
}
