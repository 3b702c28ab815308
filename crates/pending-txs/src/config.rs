use std::{
    fs,
    net::SocketAddr,
    path::Path,
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};
use url::Url;

use crate::error::ServiceError;

/// What to do with a transaction whose sender cannot be recovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Fail the whole poll.
    Abort,
    /// Drop the transaction, log a warning and continue.
    #[default]
    Skip,
}

/// Runtime configuration for the poller service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Address the HTTP server listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Ethereum JSON-RPC endpoint of the node whose mempool is polled.
    #[serde(default = "default_node_http")]
    pub node_http: Url,
    /// When set, only this network id is served under `/api/v1.1/{networkID}`.
    #[serde(default)]
    pub network_id: Option<u64>,
    /// Timeout applied to every node request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for a whole poll, in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Upper bound on concurrent transaction lookups during an incremental poll.
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,
    #[serde(default)]
    pub dedup: DedupConfig,
}

/// Configuration of the per-filter delivered-hash cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Idle time after which a filter's seen-set is forgotten. Every poll
    /// under the filter restarts the window.
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of filters tracked at once.
    #[serde(default = "default_dedup_max_filters")]
    pub max_filters: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_node_http() -> Url {
    Url::parse("http://127.0.0.1:8545").expect("static URL")
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_poll_timeout_ms() -> u64 {
    15_000
}

fn default_max_concurrent_lookups() -> usize {
    16
}

// 2.5x the two minute filter baseline.
fn default_dedup_ttl_secs() -> u64 {
    300
}

fn default_dedup_max_filters() -> u64 {
    100_000
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
            max_filters: default_dedup_max_filters(),
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            node_http: default_node_http(),
            network_id: None,
            request_timeout_ms: default_request_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
            recovery_policy: RecoveryPolicy::default(),
            dedup: DedupConfig::default(),
        }
    }
}

impl PollerConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ServiceError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            ServiceError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Validates a configuration loaded from CLI flags or disk.
    pub fn validate(self) -> Result<Self, ServiceError> {
        if self.request_timeout_ms == 0 || self.poll_timeout_ms == 0 {
            return Err(ServiceError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_lookups == 0 {
            return Err(ServiceError::InvalidConfig(
                "max_concurrent_lookups must be at least 1".to_string(),
            ));
        }
        if self.dedup.ttl_secs == 0 {
            return Err(ServiceError::InvalidConfig(
                "dedup.ttl_secs must be greater than zero".to_string(),
            ));
        }

        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_config_takes_defaults() {
        let config: PollerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.recovery_policy, RecoveryPolicy::Skip);
        assert_eq!(config.dedup.ttl(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_config_overrides_fields() {
        let config: PollerConfig = serde_json::from_str(
            r#"{
                "node_http": "http://node:8545",
                "network_id": 1,
                "recovery_policy": "abort",
                "dedup": { "ttl_secs": 60 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.node_http.as_str(), "http://node:8545/");
        assert_eq!(config.network_id, Some(1));
        assert_eq!(config.recovery_policy, RecoveryPolicy::Abort);
        assert_eq!(config.dedup.ttl_secs, 60);
        assert_eq!(config.dedup.max_filters, default_dedup_max_filters());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = PollerConfig {
            poll_timeout_ms: 0,
            ..PollerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServiceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_lookup_concurrency_is_rejected() {
        let config = PollerConfig {
            max_concurrent_lookups: 0,
            ..PollerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
