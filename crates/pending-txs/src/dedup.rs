//! Per-filter record of transaction hashes already delivered to a caller.

use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};

use alloy_primitives::B256;
use metrics::counter;
use moka::sync::Cache;
use parking_lot::Mutex;

use crate::{
    config::DedupConfig,
    error::CacheError,
    types::TransactionRecord,
};

/// Storage backing at-most-once delivery per filter id.
pub trait DedupStore: Send + Sync {
    /// Marks every hash in `hashes` as delivered under `filter_id` and reports,
    /// position by position, which of them had not been delivered before.
    ///
    /// The read and the update happen as one step per `filter_id`; concurrent
    /// calls for the same id never both report a hash as new.
    fn observe(&self, filter_id: &str, hashes: &[B256]) -> Result<Vec<bool>, CacheError>;
}

pub type SharedDedupStore = Arc<dyn DedupStore>;

/// Cache key for a caller-supplied filter id.
pub fn cache_key(filter_id: &str) -> String {
    format!("eth/pending/set/{filter_id}")
}

/// Failed dedup pass; hands the candidates back untouched.
#[derive(Debug)]
pub struct Degraded {
    pub error: CacheError,
    pub candidates: Vec<TransactionRecord>,
}

/// Drops the candidates already delivered under `filter_id` and records the
/// rest as delivered.
pub fn dedup(
    store: &dyn DedupStore,
    filter_id: &str,
    candidates: Vec<TransactionRecord>,
) -> Result<Vec<TransactionRecord>, Degraded> {
    let hashes: Vec<B256> = candidates.iter().map(TransactionRecord::hash).collect();
    match store.observe(filter_id, &hashes) {
        Ok(fresh) => Ok(candidates
            .into_iter()
            .zip(fresh)
            .filter_map(|(record, is_new)| is_new.then_some(record))
            .collect()),
        Err(error) => Err(Degraded { error, candidates }),
    }
}

type SeenSet = Arc<Mutex<HashSet<B256>>>;

/// In-memory [`DedupStore`] with a sliding TTL.
///
/// Each filter id owns a seen-set guarded by its own lock. Entries are
/// evicted once idle for the configured TTL; every poll under the id restarts
/// the window. This type is cheaply cloneable and can be shared across tasks.
#[derive(Clone, Debug)]
pub struct DedupCache {
    entries: Cache<String, SeenSet>,
}

impl DedupCache {
    pub fn new(config: &DedupConfig) -> Self {
        Self::with_ttl(config.ttl(), config.max_filters)
    }

    pub fn with_ttl(ttl: Duration, max_filters: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_filters)
                .time_to_idle(ttl)
                .build(),
        }
    }

    /// Number of hashes currently recorded for `filter_id`.
    pub fn seen_count(&self, filter_id: &str) -> usize {
        self.entries
            .get(&cache_key(filter_id))
            .map(|seen| seen.lock().len())
            .unwrap_or_default()
    }
}

impl DedupStore for DedupCache {
    fn observe(&self, filter_id: &str, hashes: &[B256]) -> Result<Vec<bool>, CacheError> {
        let seen = self
            .entries
            .get_with(cache_key(filter_id), || Arc::new(Mutex::new(HashSet::new())));
        let mut seen = seen.lock();

        let fresh: Vec<bool> = hashes.iter().map(|hash| seen.insert(*hash)).collect();
        let suppressed = fresh.iter().filter(|is_new| !**is_new).count();
        if suppressed > 0 {
            counter!("pending_txs_dedup_suppressed_total").increment(suppressed as u64);
        }
        Ok(fresh)
    }
}
