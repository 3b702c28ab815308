//! Filter lifecycle: decides between a full pending-block read and an
//! incremental read of filter changes, and recreates filters the node has
//! dropped.
//!
//! ```text
//! NoFilter ──init──▶ FilterActive ──"filter not found"──▶ FilterExpired ──init──▶ FilterActive
//! ```

use alloy_primitives::{
    Address,
    B256,
};
use futures::{
    StreamExt,
    TryStreamExt,
    stream,
};
use metrics::counter;
use tracing::{
    debug,
    info,
    instrument,
};

use crate::{
    assembler::{
        assemble_batch,
        assemble_with_policy,
        filter_by_sender,
    },
    config::RecoveryPolicy,
    error::{
        NodeError,
        PollError,
    },
    node::{
        NodeTransaction,
        SharedNodeClient,
    },
    types::{
        Query,
        TransactionRecord,
    },
};

/// How a poll obtained its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPath {
    /// No filter was supplied; a new one was created.
    Initialized,
    /// The supplied filter was live and its changes were read.
    Incremental,
    /// The node no longer knew the supplied filter; a new one was created.
    Recovered { expired: String },
}

/// Result of a reconciliation, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub filter_id: String,
    pub transactions: Vec<TransactionRecord>,
    pub path: PollPath,
}

/// Drives a [`NodeClient`](crate::node::NodeClient) through the filter lifecycle.
#[derive(Clone)]
pub struct FilterReconciler {
    node: SharedNodeClient,
    policy: RecoveryPolicy,
    max_concurrent_lookups: usize,
}

impl FilterReconciler {
    pub fn new(node: SharedNodeClient, policy: RecoveryPolicy, max_concurrent_lookups: usize) -> Self {
        Self {
            node,
            policy,
            max_concurrent_lookups: max_concurrent_lookups.max(1),
        }
    }

    #[instrument(
        name = "reconciler::poll",
        skip_all,
        fields(filter_id = query.active_filter().unwrap_or_default()),
        level = "debug"
    )]
    pub async fn poll(&self, query: &Query) -> Result<Reconciled, PollError> {
        let Some(filter_id) = query.active_filter() else {
            return self.init(query.from, PollPath::Initialized).await;
        };

        match self.node.filter_changes(filter_id).await {
            Ok(hashes) => {
                let transactions = self.incremental(hashes, query.from).await?;
                Ok(Reconciled {
                    filter_id: filter_id.to_string(),
                    transactions,
                    path: PollPath::Incremental,
                })
            }
            Err(NodeError::FilterNotFound) => {
                info!(filter_id, "filter expired on node, creating a new one");
                counter!("pending_txs_filter_recoveries_total").increment(1);
                let path = PollPath::Recovered {
                    expired: filter_id.to_string(),
                };
                self.init(query.from, path).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads the whole pending block and installs a new filter.
    #[instrument(name = "reconciler::init", skip(self), level = "debug")]
    async fn init(&self, from: Option<Address>, path: PollPath) -> Result<Reconciled, PollError> {
        let (snapshot, filter_id) = tokio::try_join!(
            self.node.pending_block(),
            self.node.new_pending_transaction_filter(),
        )?;
        debug!(
            %filter_id,
            transactions = snapshot.transactions.len(),
            "read pending block"
        );

        let transactions = assemble_batch(snapshot.transactions, snapshot.timestamp, self.policy)?;
        Ok(Reconciled {
            filter_id,
            transactions: filter_by_sender(transactions, from),
            path,
        })
    }

    /// Fetches each changed hash and keeps the ones still pending.
    #[instrument(
        name = "reconciler::incremental",
        skip(self, hashes),
        fields(changes = hashes.len()),
        level = "debug"
    )]
    async fn incremental(
        &self,
        hashes: Vec<B256>,
        from: Option<Address>,
    ) -> Result<Vec<TransactionRecord>, PollError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let header = self.node.pending_block_header().await?;
        let node = &self.node;
        let fetched: Vec<(B256, Option<NodeTransaction>)> = stream::iter(hashes)
            .map(|hash| async move {
                node.transaction_by_hash(hash)
                    .await
                    .map(|transaction| (hash, transaction))
            })
            .buffered(self.max_concurrent_lookups)
            .try_collect()
            .await?;

        let mut transactions = Vec::with_capacity(fetched.len());
        for (hash, fetched) in fetched {
            match fetched {
                Some(NodeTransaction {
                    transaction,
                    is_pending: true,
                }) => {
                    if let Some(record) =
                        assemble_with_policy(transaction, header.timestamp, self.policy)?
                    {
                        transactions.push(record);
                    }
                }
                Some(_) => {
                    debug!(%hash, "transaction left the pending pool, skipping");
                    counter!("pending_txs_skipped_total", "reason" => "included").increment(1);
                }
                None => {
                    debug!(%hash, "transaction unknown to node, skipping");
                    counter!("pending_txs_skipped_total", "reason" => "not_found").increment(1);
                }
            }
        }

        Ok(filter_by_sender(transactions, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::MockNode,
        test_utils::TestSigner,
    };
    use alloy_primitives::U256;
    use std::sync::Arc;

    fn reconciler(node: &MockNode, policy: RecoveryPolicy) -> FilterReconciler {
        FilterReconciler::new(Arc::new(node.clone()), policy, 4)
    }

    fn hashes(records: &[TransactionRecord]) -> Vec<B256> {
        records.iter().map(TransactionRecord::hash).collect()
    }

    #[tokio::test]
    async fn fresh_poll_returns_pending_block_and_new_filter() {
        let node = MockNode::new();
        node.set_timestamp(100);
        let signer = TestSigner::new(1);
        let t1 = signer.legacy(0, Some(1));
        let t2 = signer.legacy(1, None);
        node.add_pending(t1.clone());
        node.add_pending(t2.clone());

        let result = reconciler(&node, RecoveryPolicy::Skip)
            .poll(&Query::fresh())
            .await
            .unwrap();

        assert_eq!(result.path, PollPath::Initialized);
        assert!(node.has_filter(&result.filter_id));
        assert_eq!(hashes(&result.transactions), vec![t1.hash, t2.hash]);
        assert!(result.transactions.iter().all(|r| r.timestamp() == 100));
        assert!(result.transactions.iter().all(|r| r.from() == signer.address()));
    }

    #[tokio::test]
    async fn incremental_poll_skips_transactions_that_left_the_pool() {
        let node = MockNode::new();
        let signer = TestSigner::new(2);
        let t1 = signer.legacy(0, Some(1));
        node.add_pending(t1.clone());
        let reconciler = reconciler(&node, RecoveryPolicy::Skip);
        let first = reconciler.poll(&Query::fresh()).await.unwrap();

        let t3 = signer.legacy(1, Some(1));
        node.add_pending(t3.clone());
        node.push_changes(&first.filter_id, [t1.hash]);
        node.include(t1.hash);
        node.set_timestamp(200);

        let second = reconciler
            .poll(&Query::with_filter(first.filter_id.clone()))
            .await
            .unwrap();

        assert_eq!(second.path, PollPath::Incremental);
        assert_eq!(second.filter_id, first.filter_id);
        assert_eq!(hashes(&second.transactions), vec![t3.hash]);
        assert_eq!(second.transactions[0].timestamp(), 200);
    }

    #[tokio::test]
    async fn unknown_hashes_are_skipped() {
        let node = MockNode::new();
        let reconciler = reconciler(&node, RecoveryPolicy::Skip);
        let first = reconciler.poll(&Query::fresh()).await.unwrap();

        let tx = TestSigner::new(3).legacy(0, Some(1));
        node.add_pending(tx.clone());
        node.evict(tx.hash);

        let second = reconciler
            .poll(&Query::with_filter(first.filter_id))
            .await
            .unwrap();
        assert!(second.transactions.is_empty());
    }

    #[tokio::test]
    async fn no_changes_keeps_filter_and_returns_nothing() {
        let node = MockNode::new();
        let reconciler = reconciler(&node, RecoveryPolicy::Skip);
        let first = reconciler.poll(&Query::fresh()).await.unwrap();

        let second = reconciler
            .poll(&Query::with_filter(first.filter_id.clone()))
            .await
            .unwrap();

        assert_eq!(second.filter_id, first.filter_id);
        assert!(second.transactions.is_empty());
        assert_eq!(node.filters_created(), 1);
    }

    #[tokio::test]
    async fn expired_filter_is_recreated_transparently() {
        let node = MockNode::new();
        let signer = TestSigner::new(4);
        let pending = signer.legacy(0, Some(1));
        node.add_pending(pending.clone());

        let result = reconciler(&node, RecoveryPolicy::Skip)
            .poll(&Query::with_filter("0xdead"))
            .await
            .unwrap();

        assert_eq!(
            result.path,
            PollPath::Recovered {
                expired: "0xdead".into()
            }
        );
        assert_ne!(result.filter_id, "0xdead");
        assert!(node.has_filter(&result.filter_id));
        assert_eq!(hashes(&result.transactions), vec![pending.hash]);
    }

    #[tokio::test]
    async fn transport_errors_are_surfaced() {
        let node = MockNode::new();
        node.fail_transport(Some("connection reset"));

        let err = reconciler(&node, RecoveryPolicy::Skip)
            .poll(&Query::with_filter("0x1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PollError::Transport(NodeError::Transport(ref message)) if message == "connection reset"
        ));
        assert_eq!(node.filters_created(), 0);
    }

    #[tokio::test]
    async fn sender_filter_applies_to_both_paths() {
        let node = MockNode::new();
        let alice = TestSigner::new(5);
        let bob = TestSigner::new(6);
        node.add_pending(alice.legacy(0, Some(1)));
        node.add_pending(bob.legacy(0, Some(1)));
        let reconciler = reconciler(&node, RecoveryPolicy::Skip);

        let first = reconciler
            .poll(&Query::fresh().from_sender(alice.address()))
            .await
            .unwrap();
        assert_eq!(first.transactions.len(), 1);
        assert_eq!(first.transactions[0].from(), alice.address());

        node.add_pending(alice.eip1559(1, 1));
        node.add_pending(bob.legacy(1, Some(1)));
        let second = reconciler
            .poll(&Query::with_filter(first.filter_id).from_sender(bob.address()))
            .await
            .unwrap();
        assert_eq!(second.transactions.len(), 1);
        assert_eq!(second.transactions[0].from(), bob.address());
    }

    #[tokio::test]
    async fn unrecoverable_sender_follows_policy() {
        let node = MockNode::new();
        let signer = TestSigner::new(7);
        let good = signer.legacy(0, Some(1));
        let mut bad = signer.legacy(1, Some(1));
        bad.r = U256::ZERO;
        node.add_pending(good.clone());
        node.add_pending(bad.clone());

        let skipped = reconciler(&node, RecoveryPolicy::Skip)
            .poll(&Query::fresh())
            .await
            .unwrap();
        assert_eq!(hashes(&skipped.transactions), vec![good.hash]);

        let aborted = reconciler(&node, RecoveryPolicy::Abort)
            .poll(&Query::fresh())
            .await
            .unwrap_err();
        assert!(matches!(
            aborted,
            PollError::SignatureRecovery { hash, .. } if hash == bad.hash
        ));
    }
}
