use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::collections::BTreeMap;

use super::{CampaignSource, TargetScope};
use crate::db::DbPool;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{Campaign, CampaignRow, TargetRef};

/// Reads campaigns from the local `campaigns` tables.
pub struct DbCampaignSource {
    pool: DbPool,
}

impl DbCampaignSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs a blocking query off the async runtime so the caller's timeout
    /// can fire while SQLite is busy.
    async fn with_conn<T, F>(&self, query: F) -> ScheduleResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> ScheduleResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> ScheduleResult<T> {
            let mut conn = pool.get()?;
            query(&mut *conn)
        })
        .await
        .map_err(|e| ScheduleError::CollaboratorUnavailable(format!("campaign query task: {}", e)))?
    }
}

fn targeted_rows(
    conn: &mut SqliteConnection,
    tenant_id: i32,
    target: TargetRef,
) -> QueryResult<Vec<CampaignRow>> {
    use crate::schema::{campaign_targets, campaigns};

    campaigns::table
        .inner_join(campaign_targets::table)
        .filter(campaigns::tenant_id.eq(tenant_id))
        .filter(campaigns::status.eq("active"))
        .filter(campaign_targets::target_type.eq(target.kind()))
        .filter(campaign_targets::target_id.eq(target.id()))
        .select(CampaignRow::as_select())
        .load(conn)
}

pub(crate) fn load_targeted(
    conn: &mut SqliteConnection,
    scope: &TargetScope,
) -> ScheduleResult<Vec<Campaign>> {
    let targets = scope
        .device_id
        .map(TargetRef::Device)
        .into_iter()
        .chain(scope.group_id.map(TargetRef::Group));

    // A campaign aimed at both the device and its group is returned once.
    let mut rows = BTreeMap::new();
    for target in targets {
        for row in targeted_rows(conn, scope.tenant_id, target)? {
            rows.insert(row.id, row);
        }
    }

    rows.into_values().map(Campaign::try_from).collect()
}

pub(crate) fn load_by_id(
    conn: &mut SqliteConnection,
    tenant_id: i32,
    ids: &[i32],
) -> ScheduleResult<Vec<Campaign>> {
    use crate::schema::campaigns::dsl;

    dsl::campaigns
        .filter(dsl::tenant_id.eq(tenant_id))
        .filter(dsl::id.eq_any(ids))
        .order(dsl::id.asc())
        .select(CampaignRow::as_select())
        .load::<CampaignRow>(conn)?
        .into_iter()
        .map(Campaign::try_from)
        .collect()
}

#[async_trait]
impl CampaignSource for DbCampaignSource {
    async fn active_campaigns_for(&self, scope: &TargetScope) -> ScheduleResult<Vec<Campaign>> {
        let scope = scope.clone();
        self.with_conn(move |conn| load_targeted(conn, &scope)).await
    }

    async fn campaigns_by_id(&self, tenant_id: i32, ids: &[i32]) -> ScheduleResult<Vec<Campaign>> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| load_by_id(conn, tenant_id, &ids)).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::{CampaignSeverity, CampaignStatus, ContentRef};
    use chrono::NaiveDateTime;

    pub struct NewCampaign<'a> {
        pub tenant_id: i32,
        pub name: &'a str,
        pub severity: CampaignSeverity,
        pub status: CampaignStatus,
        pub starts_at: Option<NaiveDateTime>,
        pub ends_at: Option<NaiveDateTime>,
        pub content: ContentRef,
        pub priority: i32,
    }

    fn label<T: serde::Serialize>(value: T) -> String {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::String(s)) => s,
            other => panic!("unexpected label {:?}", other),
        }
    }

    pub fn insert_campaign(
        conn: &mut SqliteConnection,
        campaign: NewCampaign,
        targets: &[TargetRef],
    ) -> i32 {
        use crate::schema::{campaign_targets, campaigns};

        let id: i32 = diesel::insert_into(campaigns::table)
            .values((
                campaigns::tenant_id.eq(campaign.tenant_id),
                campaigns::name.eq(campaign.name),
                campaigns::severity.eq(label(campaign.severity)),
                campaigns::status.eq(label(campaign.status)),
                campaigns::starts_at.eq(campaign.starts_at),
                campaigns::ends_at.eq(campaign.ends_at),
                campaigns::content_type.eq(campaign.content.content_type.as_str()),
                campaigns::content_id.eq(campaign.content.content_id),
                campaigns::priority.eq(campaign.priority),
            ))
            .returning(campaigns::id)
            .get_result(conn)
            .expect("insert campaign");

        for target in targets {
            diesel::insert_into(campaign_targets::table)
                .values((
                    campaign_targets::campaign_id.eq(id),
                    campaign_targets::target_type.eq(target.kind()),
                    campaign_targets::target_id.eq(target.id()),
                ))
                .execute(conn)
                .expect("insert campaign target");
        }
        id
    }

    pub fn active(tenant_id: i32, name: &str, content: ContentRef) -> NewCampaign<'_> {
        NewCampaign {
            tenant_id,
            name,
            severity: CampaignSeverity::Normal,
            status: CampaignStatus::Active,
            starts_at: None,
            ends_at: None,
            content,
            priority: 0,
        }
    }
}
