//! [`NodeClient`] over Ethereum HTTP JSON-RPC.

use std::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::{
        Duration,
        Instant,
    },
};

use alloy_primitives::B256;
use async_trait::async_trait;
use metrics::{
    counter,
    histogram,
};
use reqwest::Client;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::Value;
use tracing::{
    debug,
    instrument,
};
use url::Url;

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

/// Talks to a node's JSON-RPC endpoint. Every request is bounded by the
/// timeout passed to [`RpcNodeClient::new`].
#[derive(Debug)]
pub struct RpcNodeClient {
    http: Client,
    endpoint: Url,
    request_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    jsonrpc: String,
    result: Option<R>,
    error: Option<JsonRpcError>,
    id: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Whether a JSON-RPC error message is the node's "filter not found" reply.
///
/// Anything else, including other wordings, stays a regular RPC error so that
/// transport problems are never mistaken for filter expiry.
pub fn is_filter_not_found(message: &str) -> bool {
    message.trim().eq_ignore_ascii_case("filter not found")
}

impl RpcNodeClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, NodeError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one JSON-RPC call. `Ok(None)` means the node answered `null`.
    #[instrument(name = "node::request", skip(self, params), level = "debug")]
    async fn request<P, R>(&self, method: &'static str, params: P) -> Result<Option<R>, NodeError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let result = self.send(method, params).await;
        histogram!("pending_txs_node_request_duration_seconds", "method" => method)
            .record(started.elapsed());
        if let Err(err) = &result {
            debug!(%err, "node request failed");
            counter!("pending_txs_node_request_errors_total", "method" => method).increment(1);
        }
        result
    }

    async fn send<P, R>(&self, method: &'static str, params: P) -> Result<Option<R>, NodeError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NodeError::Transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse<R> = response.json().await?;

        if body.jsonrpc != "2.0" {
            return Err(NodeError::Malformed(format!(
                "invalid JSON-RPC version: expected '2.0', got '{}'",
                body.jsonrpc
            )));
        }
        if body.id != Value::from(id) {
            return Err(NodeError::Malformed(format!(
                "request/response id mismatch: expected {id}, got {}",
                body.id
            )));
        }
        if let Some(error) = body.error {
            return Err(NodeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result)
    }
}

fn missing_result(method: &str) -> NodeError {
    NodeError::Malformed(format!("{method} returned no result"))
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn new_pending_transaction_filter(&self) -> Result<String, NodeError> {
        const METHOD: &str = "eth_newPendingTransactionFilter";
        self.request(METHOD, Vec::<Value>::new())
            .await?
            .ok_or_else(|| missing_result(METHOD))
    }

    async fn filter_changes(&self, filter_id: &str) -> Result<Vec<B256>, NodeError> {
        match self.request("eth_getFilterChanges", (filter_id,)).await {
            Ok(hashes) => Ok(hashes.unwrap_or_default()),
            Err(NodeError::Rpc { message, .. }) if is_filter_not_found(&message) => {
                Err(NodeError::FilterNotFound)
            }
            Err(err) => Err(err),
        }
    }

    async fn pending_block_header(&self) -> Result<PendingBlockHeader, NodeError> {
        const METHOD: &str = "eth_getBlockByNumber";
        self.request(METHOD, ("pending", false))
            .await?
            .ok_or_else(|| missing_result(METHOD))
    }

    async fn pending_block(&self) -> Result<PendingBlockSnapshot, NodeError> {
        const METHOD: &str = "eth_getBlockByNumber";
        self.request(METHOD, ("pending", true))
            .await?
            .ok_or_else(|| missing_result(METHOD))
    }

    async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<NodeTransaction>, NodeError> {
        let Some(value) = self
            .request::<_, Value>("eth_getTransactionByHash", (hash,))
            .await?
        else {
            return Ok(None);
        };

        let is_pending = value.get("blockNumber").is_none_or(Value::is_null);
        let transaction: RawTransaction = serde_json::from_value(value)
            .map_err(|err| NodeError::Malformed(format!("transaction {hash}: {err}")))?;

        Ok(Some(NodeTransaction {
            transaction,
            is_pending,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_not_found_matching() {
        assert!(is_filter_not_found("filter not found"));
        assert!(is_filter_not_found("Filter not found"));
        assert!(is_filter_not_found("  FILTER NOT FOUND "));

        assert!(!is_filter_not_found("filter not found: try again"));
        assert!(!is_filter_not_found("connection reset"));
        assert!(!is_filter_not_found("header not found"));
    }

    #[test]
    fn request_ids_increase() {
        let client = RpcNodeClient::new(
            Url::parse("http://127.0.0.1:8545").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        let first = client.next_request_id();
        assert_eq!(client.next_request_id(), first + 1);
    }
}
