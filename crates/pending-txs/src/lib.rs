//! Incremental poller over an Ethereum node's pending transaction pool.
//!
//! A caller polls with the filter id it received last time and gets back only
//! the pending transactions it has not seen yet, each paired with its
//! recovered sender and the pending-block timestamp:
//!
//! - [`FilterReconciler`] creates node filters, reads their changes and
//!   recreates them when the node has dropped them.
//! - [`DedupCache`] remembers, per filter id, which hashes were already
//!   delivered, with a sliding TTL.
//! - [`QueryExecutor`] ties both together behind a single `poll`.
//! - [`PendingTxServer`] exposes the executor over HTTP.

pub mod assembler;
pub mod config;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod node;
pub mod reconciler;
pub mod sender_recovery;
pub mod server;
pub mod types;

#[cfg(any(test, feature = "test"))]
pub mod test_utils;

pub use config::{
    DedupConfig,
    PollerConfig,
    RecoveryPolicy,
};
pub use dedup::{
    DedupCache,
    DedupStore,
};
pub use error::{
    FailureKind,
    PollError,
    Result,
};
pub use executor::QueryExecutor;
pub use node::{
    NodeClient,
    RpcNodeClient,
};
pub use reconciler::FilterReconciler;
pub use server::{
    PendingTxServer,
    PendingTxServerBuilder,
};
pub use types::{
    Query,
    Response,
    TransactionRecord,
};
