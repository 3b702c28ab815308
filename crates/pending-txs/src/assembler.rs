//! Builds [`TransactionRecord`]s from node transactions.

use alloy_primitives::Address;
use metrics::counter;
use tracing::warn;

use crate::{
    config::RecoveryPolicy,
    error::{
        PollError,
        RecoveryError,
    },
    sender_recovery::recover_sender,
    types::{
        RawTransaction,
        TransactionRecord,
    },
};

/// Pairs `raw` with its recovered sender and `timestamp`.
pub fn assemble(raw: RawTransaction, timestamp: u64) -> Result<TransactionRecord, RecoveryError> {
    let from = recover_sender(&raw)?;
    Ok(TransactionRecord::new(raw, from, timestamp))
}

/// Assembles one transaction, applying `policy` when recovery fails.
///
/// Returns `Ok(None)` for a transaction dropped under [`RecoveryPolicy::Skip`].
pub fn assemble_with_policy(
    raw: RawTransaction,
    timestamp: u64,
    policy: RecoveryPolicy,
) -> Result<Option<TransactionRecord>, PollError> {
    let hash = raw.hash;
    match assemble(raw, timestamp) {
        Ok(record) => Ok(Some(record)),
        Err(source) => {
            counter!("pending_txs_recovery_failures_total").increment(1);
            match policy {
                RecoveryPolicy::Abort => Err(PollError::SignatureRecovery { hash, source }),
                RecoveryPolicy::Skip => {
                    warn!(%hash, err = %source, "dropping transaction with unrecoverable sender");
                    Ok(None)
                }
            }
        }
    }
}

/// Assembles every transaction of a batch independently.
pub fn assemble_batch(
    raws: Vec<RawTransaction>,
    timestamp: u64,
    policy: RecoveryPolicy,
) -> Result<Vec<TransactionRecord>, PollError> {
    let mut records = Vec::with_capacity(raws.len());
    for raw in raws {
        if let Some(record) = assemble_with_policy(raw, timestamp, policy)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Keeps the records sent by `from`. Addresses compare by value, so the hex
/// casing the caller used is irrelevant.
pub fn filter_by_sender(
    records: Vec<TransactionRecord>,
    from: Option<Address>,
) -> Vec<TransactionRecord> {
    match from {
        Some(from) => records
            .into_iter()
            .filter(|record| record.from() == from)
            .collect(),
        None => records,
    }
}
