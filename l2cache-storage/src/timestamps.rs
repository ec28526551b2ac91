//! Update timestamps ledger.
//!
//! Records, per table space, the last time it was (or is about to be)
//! modified. The query cache consults the ledger to decide whether a cached
//! result set was computed after every space it depends on last changed.
//!
//! Preinvalidation stamps a space with a timestamp in the future (now plus
//! the region timeout) so that results cached while the modifying
//! transaction is in flight are never considered fresh. Invalidation after
//! commit stamps the real completion time.

use std::sync::{Arc, Mutex, MutexGuard};

use l2cache_core::{CacheResult, RegionError, Timestamp, UnknownSpacePolicy};

use crate::region::TimestampsRegion;
use crate::stats::{CacheStats, StatsRecorder};

pub struct UpdateTimestampsCache {
    region: Arc<dyn TimestampsRegion>,
    policy: UnknownSpacePolicy,
    // Serializes pre-invalidation, invalidation and freshness checks.
    guard: Mutex<()>,
    stats: StatsRecorder,
}

impl UpdateTimestampsCache {
    pub fn new(region: Arc<dyn TimestampsRegion>, policy: UnknownSpacePolicy) -> Self {
        tracing::info!(region = %region.name(), "Starting update timestamps cache at region");
        Self {
            region,
            policy,
            guard: Mutex::new(()),
            stats: StatsRecorder::new(),
        }
    }

    pub fn region(&self) -> &Arc<dyn TimestampsRegion> {
        &self.region
    }

    pub fn unknown_space_policy(&self) -> UnknownSpacePolicy {
        self.policy
    }

    /// Mark spaces as about to change. Called before a transaction writes.
    pub fn preinvalidate<S: AsRef<str>>(&self, spaces: &[S]) -> CacheResult<()> {
        let _guard = self.lock()?;
        let ts = self.region.next_timestamp().saturating_add(self.region.timeout());
        for space in spaces {
            let space = space.as_ref();
            tracing::debug!(space, timestamp = ts, "Pre-invalidating space");
            self.region.put(space.to_string(), ts)?;
            self.stats.record_put();
        }
        Ok(())
    }

    /// Mark spaces as changed. Called once the modifying transaction is done.
    pub fn invalidate<S: AsRef<str>>(&self, spaces: &[S]) -> CacheResult<()> {
        let _guard = self.lock()?;
        let ts = self.region.next_timestamp();
        for space in spaces {
            let space = space.as_ref();
            tracing::debug!(space, timestamp = ts, "Invalidating space");
            self.region.put(space.to_string(), ts)?;
            self.stats.record_put();
        }
        Ok(())
    }

    /// Whether results computed at `timestamp` are still valid for all of
    /// `spaces`. A space stamped at or after `timestamp` makes them stale.
    pub fn is_up_to_date<S: AsRef<str>>(
        &self,
        spaces: &[S],
        timestamp: Timestamp,
    ) -> CacheResult<bool> {
        let _guard = self.lock()?;
        for space in spaces {
            let space = space.as_ref();
            match self.region.get(&space.to_string())? {
                None => match self.policy {
                    UnknownSpacePolicy::AssumeFresh => {
                        tracing::trace!(space, "No update timestamp recorded for space");
                        self.stats.record_miss();
                    }
                    UnknownSpacePolicy::AssumeStale => {
                        tracing::debug!(space, "No update timestamp recorded, assuming stale");
                        self.stats.record_miss();
                        return Ok(false);
                    }
                },
                Some(last_update) => {
                    self.stats.record_hit();
                    tracing::trace!(space, last_update, timestamp, "Checking space");
                    if last_update >= timestamp {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    pub fn clear(&self) -> CacheResult<()> {
        self.region.evict_all()
    }

    pub fn destroy(&self) -> CacheResult<()> {
        self.region.destroy()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(&*self.region)
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, ()>> {
        self.guard.lock().map_err(|_| {
            RegionError::LockPoisoned {
                region: self.region.name().to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for UpdateTimestampsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateTimestampsCache")
            .field("region", &self.region.name())
            .field("policy", &self.policy)
            .finish()
    }
}
