//! HTTP surface of the poller.

use std::{
    str::FromStr,
    sync::Arc,
};

use alloy_primitives::{
    Address,
    B256,
};
use axum::{
    Json,
    Router,
    extract::{
        Path,
        Query as QueryParams,
        Request,
        State,
    },
    http::StatusCode,
    middleware::{
        self,
        Next,
    },
    response::{
        IntoResponse,
        Response as HttpResponse,
    },
    routing::get,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::json;
use tokio::signal;
use tracing::{
    Instrument,
    debug,
    info,
    info_span,
    warn,
};

use crate::{
    config::PollerConfig,
    dedup::{
        DedupCache,
        SharedDedupStore,
    },
    error::{
        FailureKind,
        NodeError,
        PollError,
        ServiceError,
    },
    executor::QueryExecutor,
    node::{
        RpcNodeClient,
        SharedNodeClient,
    },
    types::{
        Query,
        Response,
    },
};

/// Wires configuration, node client and dedup store into a server.
pub struct PendingTxServerBuilder {
    config: PollerConfig,
    node: Option<SharedNodeClient>,
    dedup: Option<SharedDedupStore>,
}

impl PendingTxServerBuilder {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            node: None,
            dedup: None,
        }
    }

    /// Replaces the JSON-RPC client built from `node_http`.
    pub fn with_node(mut self, node: SharedNodeClient) -> Self {
        self.node = Some(node);
        self
    }

    /// Replaces the in-memory dedup cache.
    pub fn with_dedup_store(mut self, dedup: SharedDedupStore) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn build(self) -> Result<PendingTxServer, ServiceError> {
        let config = self.config.validate()?;
        let node: SharedNodeClient = match self.node {
            Some(node) => node,
            None => {
                Arc::new(RpcNodeClient::new(
                    config.node_http.clone(),
                    config.request_timeout(),
                )?)
            }
        };
        let dedup: SharedDedupStore = match self.dedup {
            Some(dedup) => dedup,
            None => Arc::new(DedupCache::new(&config.dedup)),
        };

        let state = AppState {
            executor: QueryExecutor::new(node.clone(), dedup, &config),
            node,
            network_id: config.network_id,
        };
        Ok(PendingTxServer { config, state })
    }
}

pub struct PendingTxServer {
    config: PollerConfig,
    state: AppState,
}

impl PendingTxServer {
    pub fn builder(config: PollerConfig) -> PendingTxServerBuilder {
        PendingTxServerBuilder::new(config)
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub async fn serve(self) -> Result<(), ServiceError> {
        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            %addr,
            node = %self.config.node_http,
            policy = ?self.config.recovery_policy,
            "pending transaction poller listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("pending transaction poller shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
    }
}

#[derive(Clone)]
struct AppState {
    executor: QueryExecutor,
    node: SharedNodeClient,
    network_id: Option<u64>,
}

impl AppState {
    fn check_network(&self, network_id: &str) -> Result<(), ApiError> {
        let Some(served) = self.network_id else {
            return Ok(());
        };
        match network_id.parse::<u64>() {
            Ok(requested) if requested == served => Ok(()),
            _ => {
                Err(ApiError::new(
                    FailureKind::UnknownNetwork,
                    format!("network {network_id} is not served"),
                ))
            }
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route(
            "/api/v1.1/{network_id}/transactions/pending",
            get(pending_transactions),
        )
        .route("/api/v1.1/{network_id}/transactions/filter", get(new_filter))
        .route(
            "/api/v1.1/{network_id}/transactions/changes/{filter_id}",
            get(filter_changes),
        )
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

async fn trace_request(request: Request, next: Next) -> HttpResponse {
    let span = info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
    );
    async move { next.run(request).await }
        .instrument(span)
        .await
}

async fn service_info() -> Json<serde_json::Value> {
    Json(json!({
        "description": "Incremental pending transaction poller",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingParams {
    filter_id: Option<String>,
    from: Option<String>,
}

impl PendingParams {
    fn into_query(self) -> Result<Query, ApiError> {
        let from = match self.from.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                Some(Address::from_str(raw).map_err(|err| {
                    ApiError::new(
                        FailureKind::InvalidQuery,
                        format!("invalid from address {raw:?}: {err}"),
                    )
                })?)
            }
        };
        Ok(Query {
            filter_id: self.filter_id,
            from,
        })
    }
}

async fn pending_transactions(
    State(state): State<AppState>,
    Path(network_id): Path<String>,
    QueryParams(params): QueryParams<PendingParams>,
) -> Result<Json<Response>, ApiError> {
    state.check_network(&network_id)?;
    let query = params.into_query()?;
    let response = state.executor.poll(query).await?;
    Ok(Json(response))
}

/// Successful envelope of the raw filter endpoints.
#[derive(Debug, Serialize)]
struct Success<T> {
    success: bool,
    result: T,
}

impl<T> Success<T> {
    fn new(result: T) -> Json<Self> {
        Json(Self {
            success: true,
            result,
        })
    }
}

async fn new_filter(
    State(state): State<AppState>,
    Path(network_id): Path<String>,
) -> Result<Json<Success<String>>, ApiError> {
    state.check_network(&network_id)?;
    let filter_id = state.node.new_pending_transaction_filter().await?;
    debug!(%filter_id, "created raw filter");
    Ok(Success::new(filter_id))
}

async fn filter_changes(
    State(state): State<AppState>,
    Path((network_id, filter_id)): Path<(String, String)>,
) -> Result<Json<Success<Vec<B256>>>, ApiError> {
    state.check_network(&network_id)?;
    let hashes = state.node.filter_changes(&filter_id).await?;
    Ok(Success::new(hashes))
}

/// Failure envelope: `{"success": false, "kind": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    kind: FailureKind,
    message: String,
}

impl ApiError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            FailureKind::Transport => StatusCode::BAD_GATEWAY,
            FailureKind::SignatureRecovery => StatusCode::INTERNAL_SERVER_ERROR,
            FailureKind::InvalidQuery => StatusCode::BAD_REQUEST,
            FailureKind::UnknownNetwork => StatusCode::NOT_FOUND,
        }
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        PollError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.kind.as_str(), message = %self.message, "request failed");
        }
        let body = json!({
            "success": false,
            "kind": self.kind,
            "message": self.message,
        });
        (status, Json(body)).into_response()
    }
}
