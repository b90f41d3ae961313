use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use lockwarden_infrastructure::ConnectionState;

use crate::dto::{HealthResponse, NodeHealthResponse};
use crate::state::AppState;

/// Reports per-node connection state; healthy while a majority is connected.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let nodes: Vec<NodeHealthResponse> = state
        .storage_nodes
        .iter()
        .map(|node| NodeHealthResponse {
            name: node.name().to_owned(),
            state: node.state().as_str(),
        })
        .collect();
    let connected = state
        .storage_nodes
        .iter()
        .filter(|node| node.state() == ConnectionState::Connected)
        .count();
    let required = state.lock_client.majority();

    let (status_code, status) = if connected >= required {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            connected,
            required,
            nodes,
        }),
    )
}
