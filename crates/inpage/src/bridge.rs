//! HTTP bridge between the out-of-page test driver and the agent.
//!
//! The driver POSTs one [`AgentRequest`] per call to `/call` and receives
//! `{"value": ...}` on success or `{"value": {"error", "message"}}` with a
//! matching HTTP status on failure, mirroring WebDriver response shapes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use log::{info, warn};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::agent::InPageAgent;
use crate::error::{AgentError, HostError};
use crate::protocol::{dispatch, AgentRequest};

/// Shared state for the bridge server
pub struct BridgeState {
    agent: InPageAgent,
    /// Identifies this agent instance to the driver
    session_id: String,
}

impl BridgeState {
    pub fn new(agent: InPageAgent) -> Self {
        Self {
            agent,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

type SharedState = Arc<BridgeState>;

type BridgeResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn bridge_value(value: Value) -> Json<Value> {
    Json(json!({ "value": value }))
}

fn bridge_error(error: &str, message: &str) -> (StatusCode, Json<Value>) {
    let status = match error {
        "invalid argument" | "invalid selector" => StatusCode::BAD_REQUEST,
        "timeout" => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(json!({
            "value": {
                "error": error,
                "message": message,
            }
        })),
    )
}

fn agent_error(err: &AgentError) -> (StatusCode, Json<Value>) {
    let kind = match err {
        AgentError::Timeout(_) => "timeout",
        AgentError::Predicate(_) | AgentError::Callback(_) => "callback error",
        AgentError::Host(HostError::InvalidQuery { .. }) => "invalid selector",
        AgentError::Host(_) => "host error",
        AgentError::Encode(_) => "unknown error",
    };
    bridge_error(kind, &err.to_string())
}

/// GET /status: bridge status
async fn status(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "value": {
            "ready": true,
            "sessionId": state.session_id,
            "message": "inpage agent bridge"
        }
    }))
}

/// POST /call: run one agent request
async fn call(State(state): State<SharedState>, Json(body): Json<Value>) -> BridgeResult {
    let request: AgentRequest = serde_json::from_value(body)
        .map_err(|e| bridge_error("invalid argument", &e.to_string()))?;
    let method = request.method();

    match dispatch(&state.agent, request).await {
        Ok(value) => Ok(bridge_value(value)),
        Err(e) => {
            warn!("[bridge] {} failed: {}", method, e);
            Err(agent_error(&e))
        }
    }
}

/// Build the axum router with all bridge routes
pub fn build_router(agent: InPageAgent) -> Router {
    // The driver page may live on another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status))
        .route("/call", post(call))
        .layer(cors)
        .with_state(Arc::new(BridgeState::new(agent)))
}

/// Serve the bridge on `addr` until the listener fails.
pub async fn serve(agent: InPageAgent, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(agent);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[bridge] Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
