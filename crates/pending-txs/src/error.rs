use alloy_primitives::{
    B256,
    U256,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = PollError> = std::result::Result<T, E>;

/// Failures reported by a [`NodeClient`](crate::node::NodeClient).
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node no longer knows the filter, usually because it sat idle past
    /// the node's filter timeout.
    #[error("filter not found")]
    FilterNotFound,
    #[error("node request timed out")]
    Timeout,
    #[error("node transport error: {0}")]
    Transport(String),
    #[error("node returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed node response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Reasons a transaction signature cannot be resolved to a sender.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("unsupported transaction type {0:#x}")]
    UnsupportedType(u8),
    #[error("invalid signature v value {0}")]
    InvalidV(U256),
    #[error("chain id {declared} does not match chain id {derived} encoded in v")]
    ChainIdMismatch { declared: u64, derived: u64 },
    #[error("typed transaction is missing its chain id")]
    MissingChainId,
    #[error("transaction is missing field `{0}`")]
    MissingField(&'static str),
    #[error("signature r or s is zero")]
    ZeroSignatureValue,
    #[error("signature s value is not in the lower half of the curve order")]
    HighS,
    #[error("public key recovery failed: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// Raised by a [`DedupStore`](crate::dedup::DedupStore) that cannot serve a
/// request. Polls degrade to undeduplicated results instead of failing.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a failed poll.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("transport failure: {0}")]
    Transport(#[from] NodeError),
    #[error("cannot recover sender of transaction {hash}: {source}")]
    SignatureRecovery {
        hash: B256,
        #[source]
        source: RecoveryError,
    },
}

impl PollError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::SignatureRecovery { .. } => FailureKind::SignatureRecovery,
        }
    }
}

/// Tag carried by failure envelopes so callers can tell failures apart
/// without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    SignatureRecovery,
    InvalidQuery,
    UnknownNetwork,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::SignatureRecovery => "signature_recovery",
            Self::InvalidQuery => "invalid_query",
            Self::UnknownNetwork => "unknown_network",
        }
    }
}

/// Errors raised while configuring or running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("bind or socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("node client error: {0}")]
    Node(#[from] NodeError),
}
