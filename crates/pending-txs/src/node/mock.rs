//! In-memory node used to drive the poller in tests.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use alloy_primitives::B256;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    NodeClient,
    NodeTransaction,
};
use crate::{
    error::NodeError,
    types::{
        PendingBlockHeader,
        PendingBlockSnapshot,
        RawTransaction,
    },
};

/// Scripted node. Transactions added with [`MockNode::add_pending`] show up in
/// the pending block and in every live filter, the way a real node's
/// pending-transaction filters accumulate hashes.
#[derive(Debug, Clone, Default)]
pub struct MockNode {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    timestamp: u64,
    pending: Vec<B256>,
    transactions: HashMap<B256, NodeTransaction>,
    filters: HashMap<String, Vec<B256>>,
    next_filter: u64,
    filters_created: usize,
    transport_failure: Option<String>,
    delay: Option<Duration>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pending block timestamp.
    pub fn set_timestamp(&self, timestamp: u64) {
        self.inner.lock().timestamp = timestamp;
    }

    /// Adds `tx` to the pending pool and notifies every live filter.
    pub fn add_pending(&self, tx: RawTransaction) {
        let mut state = self.inner.lock();
        let hash = tx.hash;
        state.pending.push(hash);
        state.transactions.insert(
            hash,
            NodeTransaction {
                transaction: tx,
                is_pending: true,
            },
        );
        for changes in state.filters.values_mut() {
            changes.push(hash);
        }
    }

    /// Moves `hash` out of the pending pool into a block.
    pub fn include(&self, hash: B256) {
        let mut state = self.inner.lock();
        state.pending.retain(|h| *h != hash);
        if let Some(tx) = state.transactions.get_mut(&hash) {
            tx.is_pending = false;
        }
    }

    /// Forgets `hash` entirely, as if it was evicted from the pool.
    pub fn evict(&self, hash: B256) {
        let mut state = self.inner.lock();
        state.pending.retain(|h| *h != hash);
        state.transactions.remove(&hash);
    }

    /// Queues raw hashes on a filter without touching the pool.
    pub fn push_changes(&self, filter_id: &str, hashes: impl IntoIterator<Item = B256>) {
        self.inner
            .lock()
            .filters
            .entry(filter_id.to_string())
            .or_default()
            .extend(hashes);
    }

    /// Drops a filter so the next poll on it gets "filter not found".
    pub fn expire_filter(&self, filter_id: &str) {
        self.inner.lock().filters.remove(filter_id);
    }

    /// Makes every call fail with a transport error until cleared with `None`.
    pub fn fail_transport(&self, message: Option<&str>) {
        self.inner.lock().transport_failure = message.map(str::to_string);
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.inner.lock().delay = delay;
    }

    pub fn filters_created(&self) -> usize {
        self.inner.lock().filters_created
    }

    pub fn has_filter(&self, filter_id: &str) -> bool {
        self.inner.lock().filters.contains_key(filter_id)
    }

    async fn enter(&self) -> Result<(), NodeError> {
        let (delay, failure) = {
            let state = self.inner.lock();
            (state.delay, state.transport_failure.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(NodeError::Transport(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn new_pending_transaction_filter(&self) -> Result<String, NodeError> {
        self.enter().await?;
        let mut state = self.inner.lock();
        state.next_filter += 1;
        state.filters_created += 1;
        let filter_id = format!("{:#x}", state.next_filter);
        state.filters.insert(filter_id.clone(), Vec::new());
        Ok(filter_id)
    }

    async fn filter_changes(&self, filter_id: &str) -> Result<Vec<B256>, NodeError> {
        self.enter().await?;
        self.inner
            .lock()
            .filters
            .get_mut(filter_id)
            .map(std::mem::take)
            .ok_or(NodeError::FilterNotFound)
    }

    async fn pending_block_header(&self) -> Result<PendingBlockHeader, NodeError> {
        self.enter().await?;
        Ok(PendingBlockHeader {
            timestamp: self.inner.lock().timestamp,
        })
    }

    async fn pending_block(&self) -> Result<PendingBlockSnapshot, NodeError> {
        self.enter().await?;
        let state = self.inner.lock();
        let transactions = state
            .pending
            .iter()
            .filter_map(|hash| state.transactions.get(hash))
            .map(|tx| tx.transaction.clone())
            .collect();
        Ok(PendingBlockSnapshot {
            timestamp: state.timestamp,
            transactions,
        })
    }

    async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<NodeTransaction>, NodeError> {
        self.enter().await?;
        Ok(self.inner.lock().transactions.get(&hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestSigner;

    #[tokio::test]
    async fn filters_accumulate_new_pending_transactions() {
        let node = MockNode::new();
        let signer = TestSigner::new(1);
        let before = signer.legacy(0, Some(1));
        node.add_pending(before.clone());

        let filter = node.new_pending_transaction_filter().await.unwrap();
        let after = signer.legacy(1, Some(1));
        node.add_pending(after.clone());

        assert_eq!(node.filter_changes(&filter).await.unwrap(), vec![after.hash]);
        assert!(node.filter_changes(&filter).await.unwrap().is_empty());

        let block = node.pending_block().await.unwrap();
        assert_eq!(block.transactions, vec![before, after]);
    }

    #[tokio::test]
    async fn expired_filter_reports_not_found() {
        let node = MockNode::new();
        let filter = node.new_pending_transaction_filter().await.unwrap();
        node.expire_filter(&filter);

        assert!(matches!(
            node.filter_changes(&filter).await,
            Err(NodeError::FilterNotFound)
        ));
    }

    #[tokio::test]
    async fn included_transactions_are_no_longer_pending() {
        let node = MockNode::new();
        let tx = TestSigner::new(2).legacy(0, None);
        node.add_pending(tx.clone());
        node.include(tx.hash);

        let fetched = node.transaction_by_hash(tx.hash).await.unwrap().unwrap();
        assert!(!fetched.is_pending);
        assert!(node.pending_block().await.unwrap().transactions.is_empty());

        node.evict(tx.hash);
        assert!(node.transaction_by_hash(tx.hash).await.unwrap().is_none());
    }
}
