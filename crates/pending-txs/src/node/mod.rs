//! Seam to the Ethereum node whose pending pool is being polled.

use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::{
    error::NodeError,
    types::{
        PendingBlockHeader,
        PendingBlockSnapshot,
        RawTransaction,
    },
};

pub mod mock;
pub mod rpc;

pub use mock::MockNode;
pub use rpc::RpcNodeClient;

/// A transaction fetched by hash, with whether it is still in the pending pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTransaction {
    pub transaction: RawTransaction,
    /// `false` once the transaction was included in a block.
    pub is_pending: bool,
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Installs a pending-transaction filter on the node.
    async fn new_pending_transaction_filter(&self) -> Result<String, NodeError>;

    /// Hashes that entered the pending pool since the filter was last polled.
    ///
    /// Must return [`NodeError::FilterNotFound`] when the node has dropped the
    /// filter, and only then.
    async fn filter_changes(&self, filter_id: &str) -> Result<Vec<B256>, NodeError>;

    /// Header of the pending block.
    async fn pending_block_header(&self) -> Result<PendingBlockHeader, NodeError>;

    /// Pending block with full transaction bodies.
    async fn pending_block(&self) -> Result<PendingBlockSnapshot, NodeError>;

    /// `None` when the node does not know the hash.
    async fn transaction_by_hash(&self, hash: B256)
    -> Result<Option<NodeTransaction>, NodeError>;
}

pub type SharedNodeClient = Arc<dyn NodeClient>;
