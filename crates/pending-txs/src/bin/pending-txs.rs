use std::{
    net::SocketAddr,
    path::PathBuf,
};

use clap::Parser;
use pending_txs::{
    PendingTxServer,
    PollerConfig,
    RecoveryPolicy,
};
use tracing_subscriber::{
    EnvFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use url::Url;

#[derive(Debug, Parser)]
#[command(author, version, about = "Incremental pending transaction poller", long_about = None)]
struct Cli {
    /// JSON config file. Flags below override its values.
    #[arg(long, env = "PENDING_TXS_CONFIG_FILE_PATH")]
    config_file_path: Option<PathBuf>,
    /// Address for the HTTP server (e.g. 0.0.0.0:8080)
    #[arg(long = "listen", env = "PENDING_TXS_LISTEN")]
    listen_addr: Option<SocketAddr>,
    /// Ethereum node JSON-RPC endpoint
    #[arg(long, env = "PENDING_TXS_NODE_URL")]
    node_url: Option<Url>,
    /// Only serve this network id under /api/v1.1/{networkID}
    #[arg(long, env = "PENDING_TXS_NETWORK_ID")]
    network_id: Option<u64>,
    /// What to do with transactions whose sender cannot be recovered
    #[arg(long, env = "PENDING_TXS_RECOVERY_POLICY", value_enum)]
    recovery_policy: Option<RecoveryPolicy>,
    /// Idle seconds before a filter's delivered hashes are forgotten
    #[arg(long, env = "PENDING_TXS_DEDUP_TTL_SECS")]
    dedup_ttl_secs: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<PollerConfig> {
        let mut config = match &self.config_file_path {
            Some(path) => PollerConfig::from_file(path)?,
            None => PollerConfig::default(),
        };

        if let Some(addr) = self.listen_addr {
            config.bind_addr = addr;
        }
        if let Some(url) = self.node_url {
            config.node_http = url;
        }
        if let Some(network_id) = self.network_id {
            config.network_id = Some(network_id);
        }
        if let Some(policy) = self.recovery_policy {
            config.recovery_policy = policy;
        }
        if let Some(ttl) = self.dedup_ttl_secs {
            config.dedup.ttl_secs = ttl;
        }

        Ok(config.validate()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Cli::parse().into_config()?;
    if config.recovery_policy == RecoveryPolicy::Abort {
        tracing::warn!("recovery policy is abort: one bad signature fails the whole poll");
    }

    PendingTxServer::builder(config).build()?.serve().await?;
    Ok(())
}
