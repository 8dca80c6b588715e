//! Shared types and identifiers for Vigil.
//!
//! This crate defines the core types used across the Vigil workspace:
//! the node identifier ([`NodeId`]), the liveness record reported by the
//! status endpoint ([`Node`], [`NodeState`]) and the events broadcast by the
//! coordinator ([`ClusterEvent`]).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable, unique identifier of a cluster node (typically `host:port`).
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Liveness state of a node as determined by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Node is heartbeating within the suspect timeout.
    Alive,
    /// Node has been silent for at least the suspect timeout.
    Suspect,
    /// Node has been silent for at least the dead timeout.
    Dead,
}

impl NodeState {
    /// Upper-case name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "ALIVE",
            Self::Suspect => "SUSPECT",
            Self::Dead => "DEAD",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness record for one node.
///
/// This is the value type of the `/cluster/status` map and of membership
/// merges between coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// Heartbeat counter, never decreases.
    pub heartbeat: u64,
    /// Unix milliseconds of the last observed heartbeat.
    pub timestamp: u64,
    /// Current liveness state.
    pub state: NodeState,
}

impl Node {
    /// A freshly registered node: heartbeat 0, alive, seen at `now_ms`.
    pub fn new(id: NodeId, now_ms: u64) -> Self {
        Self {
            id,
            heartbeat: 0,
            timestamp: now_ms,
            state: NodeState::Alive,
        }
    }

    /// Whether this node currently participates in key routing.
    pub fn is_alive(&self) -> bool {
        self.state == NodeState::Alive
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events broadcast by the coordinator to interested observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// A heartbeat arrived for a previously unknown node.
    NodeJoined(NodeId),
    /// A suspect or dead node heartbeated again.
    NodeRecovered(NodeId),
    /// A node crossed the suspect timeout.
    NodeSuspect(NodeId),
    /// A node crossed the dead timeout.
    NodeDead(NodeId),
    /// A node was explicitly removed from the registry.
    NodeRemoved(NodeId),
    /// The ring was rebuilt from the alive set.
    RingRebuilt {
        /// Physical nodes on the new ring.
        nodes: usize,
        /// Virtual positions on the new ring.
        positions: usize,
    },
}
