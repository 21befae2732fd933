use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{CampaignSource, TargetScope};
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::Campaign;

/// Asks an external campaign service. Both lookups POST a JSON query to the
/// configured endpoint and expect a JSON array of campaigns back.
pub struct HttpCampaignSource {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "query", rename_all = "snake_case")]
enum CampaignQuery<'a> {
    Targeted(&'a TargetScope),
    ById {
        tenant_id: i32,
        campaign_ids: &'a [i32],
    },
}

impl HttpCampaignSource {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    async fn query(&self, query: &CampaignQuery<'_>) -> ScheduleResult<Vec<Campaign>> {
        let unavailable = |e: reqwest::Error| ScheduleError::CollaboratorUnavailable(e.to_string());

        let res = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await
            .map_err(unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            return Err(ScheduleError::CollaboratorUnavailable(format!(
                "campaign service returned {}: {}",
                status, error_text
            )));
        }

        res.json::<Vec<Campaign>>().await.map_err(unavailable)
    }
}

#[async_trait]
impl CampaignSource for HttpCampaignSource {
    async fn active_campaigns_for(&self, scope: &TargetScope) -> ScheduleResult<Vec<Campaign>> {
        self.query(&CampaignQuery::Targeted(scope)).await
    }

    async fn campaigns_by_id(&self, tenant_id: i32, ids: &[i32]) -> ScheduleResult<Vec<Campaign>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.query(&CampaignQuery::ById {
            tenant_id,
            campaign_ids: ids,
        })
        .await
    }
}
