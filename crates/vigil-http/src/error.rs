//! API error type and its mapping to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;
use vigil_cluster::ClusterError;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An error from the coordinator.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Malformed request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },
}

impl ApiError {
    /// Map to an HTTP status code.
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Cluster(ClusterError::NoAvailableNode) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cluster(ClusterError::UnknownNode(_)) => StatusCode::NOT_FOUND,
            Self::Cluster(ClusterError::PeerUnreachable { .. }) => StatusCode::BAD_GATEWAY,
            Self::Cluster(ClusterError::InvalidConfiguration(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!(%status, error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}
