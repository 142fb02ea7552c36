//! ==============================================================================
//! poll.rs - http polling fallback transport
//! ==============================================================================
//!
//! purpose:
//!     request/response access to the current weight for clients whose
//!     websocket cannot connect. every handler here only reads shared state.
//!
//! routes:
//!     GET /weight   -> {"weight": 70, "lastUpdate": "2024-..."}
//!     GET /status   -> device link state, subscriber count, last reading
//!     GET /peso     -> legacy probe of the scale's own http endpoint
//!
//! ==============================================================================

use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::config::{ProbeConfig, ProbeTarget};
use crate::device::DeviceLink;
use crate::domain::{ConnectionState, PollResponse, ProbeResponse};
use crate::hub::BroadcastHub;
use crate::probe;
use crate::store::WeightStore;

/// port assumed when `/peso?host=` is given without a port
const DEFAULT_PROBE_PORT: u16 = 3000;

/// stateless read accessor over the weight store
#[derive(Debug, Clone)]
pub struct PollEndpoint {
    store: WeightStore,
}

impl PollEndpoint {
    pub fn new(store: WeightStore) -> Self {
        Self { store }
    }

    pub fn current(&self) -> PollResponse {
        PollResponse::from(self.store.get())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub device: ConnectionState,
    pub subscribers: usize,
    #[serde(flatten)]
    pub reading: PollResponse,
    pub connection_attempts: u64,
}

/// everything the poll listener's handlers read from
#[derive(Debug, Clone)]
pub struct PollState {
    pub endpoint: PollEndpoint,
    pub link: DeviceLink,
    pub hub: BroadcastHub,
    pub probe: ProbeConfig,
    pub http: reqwest::Client,
}

pub fn poll_router(state: PollState) -> Router {
    Router::new()
        .route("/weight", get(weight_handler))
        .route("/status", get(status_handler))
        .route("/peso", get(peso_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn weight_handler(State(state): State<PollState>) -> Json<PollResponse> {
    let current = state.endpoint.current();
    tracing::debug!("[HTTP] GET /weight -> {}", current.weight);
    Json(current)
}

async fn status_handler(State(state): State<PollState>) -> Json<BridgeStatus> {
    let status = BridgeStatus {
        device: state.link.state(),
        subscribers: state.hub.subscriber_count(),
        reading: state.endpoint.current(),
        connection_attempts: state.link.connection_attempts(),
    };
    tracing::debug!("[HTTP] GET /status -> device {}, {} subscriber(s)", status.device, status.subscribers);
    Json(status)
}

#[derive(Debug, Deserialize)]
struct ProbeParams {
    host: Option<String>,
    port: Option<u16>,
}

/// GET /peso?host=..&port=..
/// explicit query parameters replace the configured candidates
async fn peso_handler(
    State(state): State<PollState>,
    Query(params): Query<ProbeParams>,
) -> Json<ProbeResponse> {
    let candidates = match params.host.filter(|h| !h.trim().is_empty()) {
        Some(host) => vec![ProbeTarget::new(host, params.port.unwrap_or(DEFAULT_PROBE_PORT))],
        None => state.probe.candidates.clone(),
    };
    let timeout: Duration = state.probe.timeout();
    let response = probe::probe(&state.http, &candidates, timeout).await;
    match &response.error {
        Some(error) => tracing::warn!("[HTTP] GET /peso failed: {}", error),
        None => tracing::info!("[HTTP] GET /peso -> {}", response.peso),
    }
    Json(response)
}
