//! Cluster API request handlers.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use vigil_types::{Node, NodeId};

use crate::AppState;
use crate::error::ApiError;

// -----------------------------------------------------------------------
// GET /cluster/status
// -----------------------------------------------------------------------

/// Current membership map, keyed by node ID.
pub(crate) async fn cluster_status(State(state): State<AppState>) -> Json<BTreeMap<NodeId, Node>> {
    Json(state.coordinator.status().await)
}

// -----------------------------------------------------------------------
// GET /cluster/find/{key}
// -----------------------------------------------------------------------

/// Report which node is responsible for `key`.
pub(crate) async fn find_node(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<String, ApiError> {
    let node_id = state.coordinator.find(&key).await?;
    Ok(format!("Key '{key}' is assigned to node: {node_id}"))
}

// -----------------------------------------------------------------------
// GET /cluster/rebalance
// -----------------------------------------------------------------------

/// Rebuild the ring from the ALIVE nodes and describe the result.
pub(crate) async fn rebalance(State(state): State<AppState>) -> String {
    state.coordinator.rebalance().await.to_string()
}

// -----------------------------------------------------------------------
// GET /cluster/me
// -----------------------------------------------------------------------

/// This coordinator's own node ID.
pub(crate) async fn local_node(State(state): State<AppState>) -> String {
    state.coordinator.local_node_id().to_string()
}

// -----------------------------------------------------------------------
// POST /cluster/heartbeat/{node_id}
// -----------------------------------------------------------------------

/// Record a heartbeat and return the node's record.
pub(crate) async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Node>, ApiError> {
    let node_id = parse_node_id(node_id)?;
    Ok(Json(state.coordinator.record_heartbeat(node_id).await))
}

// -----------------------------------------------------------------------
// DELETE /cluster/nodes/{node_id}
// -----------------------------------------------------------------------

/// Remove a node from the registry and the ring.
pub(crate) async fn remove_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let node_id = parse_node_id(node_id)?;
    state.coordinator.remove_node(&node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -----------------------------------------------------------------------
// POST /cluster/merge
// -----------------------------------------------------------------------

/// Response body for `POST /cluster/merge`.
#[derive(Serialize)]
pub(crate) struct MergeResponse {
    pub adopted: usize,
}

/// Adopt records from another coordinator's status map.
pub(crate) async fn merge(
    State(state): State<AppState>,
    Json(remote): Json<BTreeMap<NodeId, Node>>,
) -> Result<Json<MergeResponse>, ApiError> {
    for (key, node) in &remote {
        parse_node_id(key.to_string())?;
        if *key != node.id {
            return Err(ApiError::InvalidRequest {
                message: format!("entry '{key}' carries node id '{}'", node.id),
            });
        }
    }

    let adopted = state
        .coordinator
        .merge(remote.into_values().collect())
        .await;
    Ok(Json(MergeResponse { adopted }))
}

/// Reject blank node IDs.
fn parse_node_id(raw: String) -> Result<NodeId, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::InvalidRequest {
            message: "node id must not be blank".to_string(),
        });
    }
    Ok(NodeId::from(raw))
}
