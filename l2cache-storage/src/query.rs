//! Query result cache.
//!
//! Results are stored disassembled, next to the timestamp of the session
//! that produced them. A lookup only succeeds when the update timestamps
//! ledger shows none of the query's table spaces changed since then.
//! Natural-key lookups skip the freshness check and are instead dropped when
//! a referenced row can no longer be resolved.

use std::fmt;
use std::sync::Arc;

use l2cache_core::{
    CacheResult, CacheSettings, QueryKey, SessionContext, Timestamp, TypeDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::region::{QueryResultsRegion, RegionFactory};
use crate::stats::{CacheStats, StatsRecorder};
use crate::timestamps::UpdateTimestampsCache;

/// Region name used for the default query cache.
pub const DEFAULT_QUERY_RESULTS_REGION: &str = "l2cache.StandardQueryCache";

/// Stored form of one cached result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultEntry {
    /// Session timestamp at which the results were computed.
    pub timestamp: Timestamp,
    /// Disassembled rows. Single-column rows are stored as the bare value,
    /// wider rows as an array of columns.
    pub rows: Vec<Value>,
}

/// Cache of query result sets.
pub trait QueryCache: Send + Sync {
    fn region_name(&self) -> &str;

    /// Cache `result`. Returns whether anything was stored; empty
    /// natural-key results are never cached.
    fn put(
        &self,
        key: &QueryKey,
        result_types: &[Arc<dyn TypeDescriptor>],
        result: &[Value],
        natural_key_lookup: bool,
        session: &dyn SessionContext,
    ) -> CacheResult<bool>;

    /// Cached rows for `key`, reassembled, or `None` on a miss.
    fn get(
        &self,
        key: &QueryKey,
        result_types: &[Arc<dyn TypeDescriptor>],
        natural_key_lookup: bool,
        spaces: &[String],
        session: &dyn SessionContext,
    ) -> CacheResult<Option<Vec<Value>>>;

    fn clear(&self) -> CacheResult<()>;

    fn destroy(&self) -> CacheResult<()>;

    fn stats(&self) -> CacheStats;
}

/// Query cache backed by a [`QueryResultsRegion`] and an
/// [`UpdateTimestampsCache`].
pub struct StandardQueryCache {
    region: Arc<dyn QueryResultsRegion>,
    update_timestamps: Arc<UpdateTimestampsCache>,
    stats: StatsRecorder,
}

impl StandardQueryCache {
    pub fn new(
        region: Arc<dyn QueryResultsRegion>,
        update_timestamps: Arc<UpdateTimestampsCache>,
    ) -> Self {
        tracing::info!(region = %region.name(), "Starting query cache at region");
        Self {
            region,
            update_timestamps,
            stats: StatsRecorder::new(),
        }
    }

    pub fn update_timestamps(&self) -> &Arc<UpdateTimestampsCache> {
        &self.update_timestamps
    }

    fn disassemble_row(
        row: &Value,
        result_types: &[Arc<dyn TypeDescriptor>],
        session: &dyn SessionContext,
    ) -> CacheResult<Value> {
        match result_types {
            [single] => single.disassemble(row, session),
            _ => {
                let columns = columns_of(row, result_types.len())?;
                let cached = result_types
                    .iter()
                    .zip(columns)
                    .map(|(ty, column)| ty.disassemble(column, session))
                    .collect::<CacheResult<Vec<_>>>()?;
                Ok(Value::Array(cached))
            }
        }
    }

    fn assemble_row(
        cached: &Value,
        result_types: &[Arc<dyn TypeDescriptor>],
        session: &dyn SessionContext,
    ) -> CacheResult<Value> {
        match result_types {
            [single] => single.assemble(cached, session),
            _ => {
                let columns = columns_of(cached, result_types.len())?;
                let row = result_types
                    .iter()
                    .zip(columns)
                    .map(|(ty, column)| ty.assemble(column, session))
                    .collect::<CacheResult<Vec<_>>>()?;
                Ok(Value::Array(row))
            }
        }
    }
}

fn columns_of(row: &Value, width: usize) -> CacheResult<&Vec<Value>> {
    match row {
        Value::Array(columns) if columns.len() == width => Ok(columns),
        other => Err(l2cache_core::AssemblyError::TypeMismatch {
            type_name: format!("row of {} columns", width),
            value: other.to_string(),
        }
        .into()),
    }
}

impl fmt::Debug for StandardQueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardQueryCache")
            .field("region", &self.region.name())
            .finish()
    }
}

impl QueryCache for StandardQueryCache {
    fn region_name(&self) -> &str {
        self.region.name()
    }

    fn put(
        &self,
        key: &QueryKey,
        result_types: &[Arc<dyn TypeDescriptor>],
        result: &[Value],
        natural_key_lookup: bool,
        session: &dyn SessionContext,
    ) -> CacheResult<bool> {
        if natural_key_lookup && result.is_empty() {
            return Ok(false);
        }

        let timestamp = session.timestamp();
        tracing::debug!(
            region = %self.region.name(),
            timestamp,
            rows = result.len(),
            "Caching query results"
        );

        let rows = result
            .iter()
            .map(|row| Self::disassemble_row(row, result_types, session))
            .collect::<CacheResult<Vec<_>>>()?;
        self.region
            .put(key.clone(), QueryResultEntry { timestamp, rows })?;
        self.stats.record_put();
        Ok(true)
    }

    fn get(
        &self,
        key: &QueryKey,
        result_types: &[Arc<dyn TypeDescriptor>],
        natural_key_lookup: bool,
        spaces: &[String],
        session: &dyn SessionContext,
    ) -> CacheResult<Option<Vec<Value>>> {
        tracing::debug!(region = %self.region.name(), "Checking cached query results");

        let entry = match self.region.get(key)? {
            Some(entry) => entry,
            None => {
                tracing::debug!("Query results were not found in cache");
                self.stats.record_miss();
                return Ok(None);
            }
        };

        if !natural_key_lookup
            && !self
                .update_timestamps
                .is_up_to_date(spaces, entry.timestamp)?
        {
            tracing::debug!(
                timestamp = entry.timestamp,
                spaces = ?spaces,
                "Cached query results were not up to date"
            );
            self.stats.record_miss();
            return Ok(None);
        }

        tracing::debug!("Returning cached query results");
        let assembled = entry
            .rows
            .iter()
            .map(|cached| Self::assemble_row(cached, result_types, session))
            .collect::<CacheResult<Vec<_>>>();

        match assembled {
            Ok(rows) => {
                self.stats.record_hit();
                Ok(Some(rows))
            }
            Err(e) if natural_key_lookup && e.is_unresolvable_object() => {
                // The referenced row was deleted since the natural-key
                // lookup was cached.
                tracing::debug!(error = %e, "Could not reassemble cached result set");
                self.region.evict(key)?;
                self.stats.record_eviction();
                self.stats.record_miss();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn clear(&self) -> CacheResult<()> {
        self.region.evict_all()
    }

    fn destroy(&self) -> CacheResult<()> {
        self.region.destroy()
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(&*self.region)
    }
}

/// Builds query caches for the [`CacheManager`](crate::CacheManager).
pub trait QueryCacheFactory: Send + Sync {
    fn build_query_cache(
        &self,
        region_name: &str,
        update_timestamps: Arc<UpdateTimestampsCache>,
        settings: &CacheSettings,
        region_factory: &dyn RegionFactory,
    ) -> CacheResult<Arc<dyn QueryCache>>;
}

/// Factory for [`StandardQueryCache`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardQueryCacheFactory;

impl QueryCacheFactory for StandardQueryCacheFactory {
    fn build_query_cache(
        &self,
        region_name: &str,
        update_timestamps: Arc<UpdateTimestampsCache>,
        settings: &CacheSettings,
        region_factory: &dyn RegionFactory,
    ) -> CacheResult<Arc<dyn QueryCache>> {
        let region = region_factory.build_query_results_region(region_name, settings)?;
        Ok(Arc::new(StandardQueryCache::new(region, update_timestamps)))
    }
}
