use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::models::ScheduleEntry;
use crate::services::resolver::Decision;

/// What one schedule resolved to during one time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOutcome {
    pub decision: Decision,
    /// Eligible entries linked to a campaign. The overlay checks whether
    /// those campaigns are live on every request.
    pub campaign_candidates: Vec<ScheduleEntry>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    cached: Option<(i64, CachedOutcome)>,
}

#[derive(Debug, Default)]
struct Slots {
    by_schedule: HashMap<i32, Slot>,
    /// Bumped by [`DecisionCache::forget`]. Tickets issued before a removal
    /// cannot recreate the removed slot.
    removals: u64,
}

/// Proof that a miss was observed at a given generation of a schedule.
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    schedule_id: i32,
    bucket: i64,
    generation: u64,
    removals: u64,
}

pub enum Lookup {
    Hit(CachedOutcome),
    Miss(Ticket),
}

/// Per-schedule cache of resolution outcomes keyed by schedule id and time
/// bucket. Each schedule keeps only the bucket it last stored, and an
/// outcome is only ever served for the bucket it was computed in.
///
/// Every mutation of a schedule must call [`DecisionCache::invalidate`].
/// Invalidation bumps the schedule's generation, so an outcome computed from
/// entries read before the edit is discarded instead of stored.
#[derive(Debug)]
pub struct DecisionCache {
    bucket_secs: i64,
    slots: RwLock<Slots>,
}

impl DecisionCache {
    pub fn new(bucket_secs: i64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1),
            slots: RwLock::new(Slots::default()),
        }
    }

    pub fn bucket_for(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.bucket_secs)
    }

    pub fn lookup(&self, schedule_id: i32, at: DateTime<Utc>) -> Lookup {
        let bucket = self.bucket_for(at);
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);

        let generation = match slots.by_schedule.get(&schedule_id) {
            Some(slot) => {
                if let Some((cached_bucket, outcome)) = &slot.cached {
                    if *cached_bucket == bucket {
                        return Lookup::Hit(outcome.clone());
                    }
                }
                slot.generation
            }
            None => 0,
        };

        Lookup::Miss(Ticket {
            schedule_id,
            bucket,
            generation,
            removals: slots.removals,
        })
    }

    /// Stores an outcome unless the schedule changed since the ticket was
    /// issued. The latest store replaces whatever bucket was cached, so a
    /// query for some other instant costs the regular traffic at most one
    /// miss.
    pub fn store(&self, ticket: Ticket, outcome: CachedOutcome) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.removals != ticket.removals {
            return false;
        }

        let slot = slots.by_schedule.entry(ticket.schedule_id).or_default();
        if slot.generation != ticket.generation {
            return false;
        }
        slot.cached = Some((ticket.bucket, outcome));
        true
    }

    pub fn invalidate(&self, schedule_id: i32) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.by_schedule.entry(schedule_id).or_default();
        slot.generation += 1;
        slot.cached = None;
        tracing::debug!("Invalidated decision cache for schedule {}", schedule_id);
    }

    /// Drops all state for a deleted schedule.
    pub fn forget(&self, schedule_id: i32) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.by_schedule.remove(&schedule_id);
        slots.removals += 1;
        tracing::debug!("Dropped decision cache slot for schedule {}", schedule_id);
    }

    #[cfg(test)]
    pub fn is_cached(&self, schedule_id: i32) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .by_schedule
            .get(&schedule_id)
            .is_some_and(|slot| slot.cached.is_some())
    }

    #[cfg(test)]
    pub fn tracked_schedules(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.by_schedule.len()
    }
}
