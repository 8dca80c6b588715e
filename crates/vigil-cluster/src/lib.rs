//! Cluster liveness tracking and key routing.
//!
//! This crate provides:
//!
//! - [`NodeRegistry`]: authoritative table of nodes, heartbeats and states.
//! - [`detector`]: timeout-based ALIVE → SUSPECT → DEAD evaluation and the
//!   periodic tick task.
//! - [`ClusterCoordinator`]: heartbeat ingestion, status snapshots, key
//!   lookup against the consistent hash ring and explicit rebalance.
//! - [`gossip`]: push-pull membership exchange with seed coordinators.

mod clock;
pub mod coordinator;
pub mod detector;
mod error;
pub mod gossip;
pub mod registry;


pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{ClusterCoordinator, CoordinatorConfig, RebalanceSummary};
pub use detector::{DetectorConfig, DetectorHandle, FailureDetector, StateChange};
pub use error::ClusterError;
pub use gossip::{GossipConfig, GossipHandle, GossipRound, GossipTransport};
pub use registry::{HeartbeatOutcome, HeartbeatReceipt, MergedNode, NodeRegistry};
