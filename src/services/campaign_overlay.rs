//! Content resolution for a device or group. Campaigns are consulted first,
//! then the assigned schedule, then the target's default scene.

use chrono::{DateTime, Utc};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OvernightWindows;
use crate::db::DbPool;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{Campaign, ContentRef, Schedule, ScheduleEntry, TargetRef};
use crate::services::assignment_service::{self, TargetContext};
use crate::services::campaigns::{campaign_order, CampaignSource, TargetScope};
use crate::services::decision_cache::{CachedOutcome, DecisionCache, Lookup};
use crate::services::resolver::{self, Decision};
use crate::services::schedule_store::{find_schedule, load_entries};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TargetDecision {
    /// A campaign aimed at the target preempts its schedule.
    Campaign {
        campaign_id: i32,
        emergency: bool,
        content: ContentRef,
    },
    /// An eligible schedule entry linked to a live campaign.
    CampaignEntry {
        campaign_id: i32,
        schedule_id: i32,
        decision: Decision,
    },
    Schedule {
        schedule_id: i32,
        decision: Decision,
    },
    DefaultScene {
        content: ContentRef,
    },
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetResolution {
    pub target: TargetRef,
    pub at: DateTime<Utc>,
    pub decision: TargetDecision,
    /// The campaign service could not be consulted; the answer comes from
    /// the schedule tiers alone.
    pub degraded: bool,
}

/// Outcome of a schedule at an instant, before any campaign is consulted.
pub fn schedule_outcome(
    schedule: &Schedule,
    entries: &[ScheduleEntry],
    at: DateTime<Utc>,
    policy: OvernightWindows,
) -> ScheduleResult<CachedOutcome> {
    let decision = resolver::resolve(schedule, entries, schedule.filler()?, at, policy)?;

    let tz = resolver::parse_timezone(&schedule.timezone)?;
    let (date, time) = resolver::local_civil(at, tz);
    let campaign_candidates = resolver::eligible_at(entries, date, time, policy)
        .filter(|entry| entry.campaign_id.is_some())
        .cloned()
        .collect();

    Ok(CachedOutcome {
        decision,
        campaign_candidates,
    })
}

/// Winner among the candidates whose campaign is live.
pub fn campaign_entry_winner<'a>(
    candidates: &'a [ScheduleEntry],
    live_campaigns: &HashSet<i32>,
) -> Option<&'a ScheduleEntry> {
    resolver::pick_winner(candidates.iter().filter(|entry| {
        entry
            .campaign_id
            .is_some_and(|id| live_campaigns.contains(&id))
    }))
}

pub struct ResolutionEngine {
    pool: DbPool,
    cache: Arc<DecisionCache>,
    campaigns: Arc<dyn CampaignSource>,
    campaign_timeout: Duration,
    policy: OvernightWindows,
}

impl ResolutionEngine {
    pub fn new(
        pool: DbPool,
        cache: Arc<DecisionCache>,
        campaigns: Arc<dyn CampaignSource>,
        campaign_timeout: Duration,
        policy: OvernightWindows,
    ) -> Self {
        Self {
            pool,
            cache,
            campaigns,
            campaign_timeout,
            policy,
        }
    }

    /// Schedule resolution through the decision cache.
    fn cached_outcome(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: i32,
        schedule_id: i32,
        at: DateTime<Utc>,
    ) -> ScheduleResult<CachedOutcome> {
        let ticket = match self.cache.lookup(schedule_id, at) {
            Lookup::Hit(outcome) => return Ok(outcome),
            Lookup::Miss(ticket) => ticket,
        };

        let schedule = find_schedule(conn, tenant_id, schedule_id)?;
        let entries = load_entries(conn, schedule_id)?;
        let outcome = schedule_outcome(&schedule, &entries, at, self.policy)?;

        if !self.cache.store(ticket, outcome.clone()) {
            tracing::debug!("Schedule {} changed while resolving; not cached", schedule_id);
        }
        Ok(outcome)
    }

    /// What a schedule plays at `at`, ignoring campaigns.
    pub fn resolve_schedule(
        &self,
        tenant_id: i32,
        schedule_id: i32,
        at: DateTime<Utc>,
    ) -> ScheduleResult<Decision> {
        let mut conn = self.pool.get()?;
        // Cached outcomes are keyed by schedule alone.
        find_schedule(&mut conn, tenant_id, schedule_id)?;
        Ok(self.cached_outcome(&mut conn, tenant_id, schedule_id, at)?.decision)
    }

    /// Runs one campaign lookup under the configured timeout. Failures are
    /// logged and reported as `None`.
    async fn consult<T>(
        &self,
        lookup: impl Future<Output = ScheduleResult<T>>,
        degraded: &mut bool,
    ) -> Option<T> {
        let error = match tokio::time::timeout(self.campaign_timeout, lookup).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => ScheduleError::CollaboratorUnavailable(format!(
                "no answer within {}ms",
                self.campaign_timeout.as_millis()
            )),
        };

        tracing::warn!("Campaign lookup failed, using schedule tiers: {}", error);
        *degraded = true;
        None
    }

    pub async fn resolve_for_target(
        &self,
        tenant_id: i32,
        target: TargetRef,
        at: DateTime<Utc>,
    ) -> ScheduleResult<TargetResolution> {
        let context = {
            let mut conn = self.pool.get()?;
            assignment_service::target_context(&mut conn, tenant_id, target)?
        };

        let mut degraded = false;
        let decision = self.decide(&context, at, &mut degraded).await?;

        tracing::debug!(
            "Resolved {} {} at {}: {:?} (degraded: {})",
            target.kind(),
            target.id(),
            at,
            decision,
            degraded
        );

        Ok(TargetResolution {
            target,
            at,
            decision,
            degraded,
        })
    }

    async fn decide(
        &self,
        context: &TargetContext,
        at: DateTime<Utc>,
        degraded: &mut bool,
    ) -> ScheduleResult<TargetDecision> {
        let scope = TargetScope {
            tenant_id: context.tenant_id,
            device_id: context.device_id,
            group_id: context.group_id,
        };

        let targeted: Vec<Campaign> = self
            .consult(self.campaigns.active_campaigns_for(&scope), degraded)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|campaign| campaign.is_live(at))
            .collect();

        let emergency = targeted
            .iter()
            .filter(|campaign| campaign.is_emergency())
            .max_by(|a, b| campaign_order(a, b));
        if let Some(campaign) = emergency.or_else(|| targeted.iter().max_by(|a, b| campaign_order(a, b))) {
            if campaign.is_emergency() {
                tracing::info!(
                    "Emergency campaign {} preempts {} {}",
                    campaign.id,
                    context.target.kind(),
                    context.target.id()
                );
            }
            return Ok(TargetDecision::Campaign {
                campaign_id: campaign.id,
                emergency: campaign.is_emergency(),
                content: campaign.content,
            });
        }

        if let Some(schedule_id) = context.schedule_id {
            let outcome = {
                let mut conn = self.pool.get()?;
                self.cached_outcome(&mut conn, context.tenant_id, schedule_id, at)?
            };

            if let Some(decision) = self
                .campaign_entry(context.tenant_id, schedule_id, &outcome, at, degraded)
                .await
            {
                return Ok(decision);
            }

            if outcome.decision != Decision::None {
                return Ok(TargetDecision::Schedule {
                    schedule_id,
                    decision: outcome.decision,
                });
            }
        }

        Ok(match context.default_scene {
            Some(content) => TargetDecision::DefaultScene { content },
            None => TargetDecision::None,
        })
    }

    async fn campaign_entry(
        &self,
        tenant_id: i32,
        schedule_id: i32,
        outcome: &CachedOutcome,
        at: DateTime<Utc>,
        degraded: &mut bool,
    ) -> Option<TargetDecision> {
        if outcome.campaign_candidates.is_empty() {
            return None;
        }

        let mut ids: Vec<i32> = outcome
            .campaign_candidates
            .iter()
            .filter_map(|entry| entry.campaign_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let live: HashSet<i32> = self
            .consult(self.campaigns.campaigns_by_id(tenant_id, &ids), degraded)
            .await?
            .into_iter()
            .filter(|campaign| campaign.is_live(at))
            .map(|campaign| campaign.id)
            .collect();

        let winner = campaign_entry_winner(&outcome.campaign_candidates, &live)?;
        Some(TargetDecision::CampaignEntry {
            campaign_id: winner.campaign_id?,
            schedule_id,
            decision: resolver::decide(winner),
        })
    }
}
