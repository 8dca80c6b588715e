//! HTTP API for the Vigil cluster coordinator.
//!
//! Provides an [`ApiServer`] that exposes an axum-based HTTP API over a
//! [`ClusterCoordinator`]. Supported operations:
//!
//! - `GET /cluster/status`: membership map `node id → {id, heartbeat, timestamp, state}`
//! - `GET /cluster/find/{key}`: node responsible for a key (plain text)
//! - `GET /cluster/rebalance`: rebuild the ring from ALIVE nodes (plain text)
//! - `GET /cluster/me`: this coordinator's own node ID (plain text)
//! - `POST /cluster/heartbeat/{node_id}`: liveness report from a node
//! - `DELETE /cluster/nodes/{node_id}`: explicit removal of a node
//! - `POST /cluster/merge`: adopt newer records from another coordinator
//!
//! [`HttpGossip`] is the matching client side, used by the gossip loop to
//! push to and pull from peer coordinators.

mod client;
mod error;
mod handlers;


use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use vigil_cluster::ClusterCoordinator;

pub use client::{HttpGossip, REQUEST_TIMEOUT};
pub use error::ApiError;

/// Shared application state for all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    /// The coordinator every request is served from.
    pub coordinator: Arc<ClusterCoordinator>,
}

/// HTTP server backed by a [`ClusterCoordinator`].
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Create a new server for the given coordinator.
    pub fn new(coordinator: Arc<ClusterCoordinator>) -> Self {
        let router = Self::build_router(AppState { coordinator });
        Self { router }
    }

    /// Build the axum [`Router`] for the cluster API.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/cluster/status", get(handlers::cluster_status))
            .route("/cluster/find/{key}", get(handlers::find_node))
            .route("/cluster/rebalance", get(handlers::rebalance))
            .route("/cluster/me", get(handlers::local_node))
            .route("/cluster/heartbeat/{node_id}", post(handlers::heartbeat))
            .route("/cluster/nodes/{node_id}", delete(handlers::remove_node))
            .route("/cluster/merge", post(handlers::merge))
            .with_state(state)
    }

    /// Return the inner [`Router`] (useful for testing with `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve the API with graceful shutdown triggered by the given future.
    ///
    /// When `shutdown` completes, the server stops accepting new connections
    /// and waits for in-flight requests to finish.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "cluster API listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
