//! Entry point of a poll: reconcile against the node, then deduplicate
//! against what the caller has already received.

use std::time::{
    Duration,
    Instant,
};

use alloy_primitives::B256;
use metrics::{
    counter,
    histogram,
};
use tracing::{
    debug,
    instrument,
    warn,
};

use crate::{
    config::PollerConfig,
    dedup::{
        Degraded,
        SharedDedupStore,
        dedup,
    },
    error::{
        NodeError,
        PollError,
    },
    node::SharedNodeClient,
    reconciler::{
        FilterReconciler,
        PollPath,
        Reconciled,
    },
    types::{
        Query,
        Response,
        TransactionRecord,
    },
};

/// Serves polls. Cheap to clone; clones share the node client and dedup store.
#[derive(Clone)]
pub struct QueryExecutor {
    reconciler: FilterReconciler,
    dedup: SharedDedupStore,
    poll_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(node: SharedNodeClient, dedup: SharedDedupStore, config: &PollerConfig) -> Self {
        Self {
            reconciler: FilterReconciler::new(
                node,
                config.recovery_policy,
                config.max_concurrent_lookups,
            ),
            dedup,
            poll_timeout: config.poll_timeout(),
        }
    }

    /// Runs one poll.
    ///
    /// Transactions are deduplicated under the filter id the caller sent. The
    /// dedup step runs after every node call has completed, so a poll that is
    /// dropped or times out leaves the cache as it was.
    #[instrument(
        name = "executor::poll",
        skip_all,
        fields(filter_id = query.active_filter().unwrap_or_default(), from = ?query.from)
    )]
    pub async fn poll(&self, query: Query) -> Result<Response, PollError> {
        let started = Instant::now();
        let result = self.run(&query).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        counter!("pending_txs_polls_total", "outcome" => outcome).increment(1);
        histogram!("pending_txs_poll_duration_seconds").record(started.elapsed());
        result
    }

    async fn run(&self, query: &Query) -> Result<Response, PollError> {
        let Reconciled {
            filter_id,
            transactions,
            path,
        } = tokio::time::timeout(self.poll_timeout, self.reconciler.poll(query))
            .await
            .map_err(|_| {
                warn!(timeout = ?self.poll_timeout, "poll deadline exceeded");
                PollError::Transport(NodeError::Timeout)
            })??;

        let seen: Vec<B256> = transactions.iter().map(TransactionRecord::hash).collect();
        let transactions = match query.active_filter() {
            Some(requested) => self.deduplicate(requested, transactions),
            None => transactions,
        };

        if path != PollPath::Incremental {
            self.seed(&filter_id, &seen);
        }

        debug!(%filter_id, delivered = transactions.len(), ?path, "poll complete");
        Ok(Response {
            filter_id,
            transactions,
        })
    }

    fn deduplicate(
        &self,
        filter_id: &str,
        candidates: Vec<TransactionRecord>,
    ) -> Vec<TransactionRecord> {
        match dedup(self.dedup.as_ref(), filter_id, candidates) {
            Ok(fresh) => fresh,
            Err(Degraded { error, candidates }) => {
                warn!(%error, filter_id, "dedup unavailable, returning undeduplicated results");
                counter!("pending_txs_dedup_degraded_total").increment(1);
                candidates
            }
        }
    }

    /// Records the hashes returned alongside a newly issued filter id.
    fn seed(&self, filter_id: &str, hashes: &[B256]) {
        if hashes.is_empty() {
            return;
        }
        if let Err(error) = self.dedup.observe(filter_id, hashes) {
            warn!(%error, filter_id, "failed to seed dedup entry for new filter");
            counter!("pending_txs_dedup_degraded_total").increment(1);
        }
    }
}
