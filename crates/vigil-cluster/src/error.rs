//! Error types for the cluster crate.

use vigil_types::NodeId;

/// Errors produced by the registry, detector and coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// The node has never heartbeated (or was removed).
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// No alive node owns a position on the ring.
    #[error("no available node")]
    NoAvailableNode,

    /// A gossip peer could not be reached or answered badly.
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable {
        /// The peer address.
        peer: String,
        /// Transport error description.
        reason: String,
    },

    /// A configuration value was rejected before the coordinator started.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
