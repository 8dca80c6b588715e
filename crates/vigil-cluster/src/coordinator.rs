//! Cluster coordinator: liveness registry plus routing ring.
//!
//! [`ClusterCoordinator`] is the shared, read-mostly structure the HTTP layer
//! talks to. It ingests heartbeats, runs the failure detector, answers
//! `find(key)` against the ring and rebuilds the ring on demand.
//!
//! The ring view is refreshed lazily: heartbeats, detector transitions and
//! removals either bump the registry generation or set the dirty flag, and
//! the next read brings the view up to date before answering.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use vigil_ring::Ring;
use vigil_types::{ClusterEvent, Node, NodeId, NodeState};

use crate::clock::Clock;
use crate::detector::{DetectorConfig, FailureDetector, StateChange};
use crate::error::ClusterError;
use crate::registry::{HeartbeatOutcome, NodeRegistry};

/// Configuration for a [`ClusterCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Virtual positions placed on the ring for every node.
    pub vnodes_per_node: u16,
    /// Failure detector timings.
    pub detector: DetectorConfig,
}

impl CoordinatorConfig {
    /// Create a config suitable for fast test execution.
    pub fn test_config() -> Self {
        Self {
            vnodes_per_node: 64,
            detector: DetectorConfig::test_config(),
        }
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.vnodes_per_node == 0 {
            return Err(ClusterError::InvalidConfiguration(
                "vnodes per node must be positive".to_string(),
            ));
        }
        self.detector.validate()
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            vnodes_per_node: 100,
            detector: DetectorConfig::default_config(),
        }
    }
}

/// Outcome of [`ClusterCoordinator::rebalance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceSummary {
    /// Alive nodes placed on the new ring.
    pub nodes: usize,
    /// Virtual positions on the new ring.
    pub positions: usize,
}

impl fmt::Display for RebalanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hash ring rebuilt from {} ALIVE node(s) with {} virtual position(s).",
            self.nodes, self.positions
        )
    }
}

/// The ring plus the liveness view it routes with.
#[derive(Debug)]
struct RingView {
    ring: Ring,
    /// Nodes that may receive keys. Positions of other nodes are skipped.
    alive: HashSet<NodeId>,
    /// Registry generation this view was synced to.
    synced_generation: u64,
}

impl RingView {
    fn find(&self, key: &str) -> Result<NodeId, ClusterError> {
        self.ring
            .find(key, |id| self.alive.contains(id))
            .cloned()
            .ok_or(ClusterError::NoAvailableNode)
    }
}

/// Shared cluster coordinator.
///
/// Holds the node registry, the routing ring and a broadcast channel through
/// which other components can subscribe to cluster events.
pub struct ClusterCoordinator {
    /// This coordinator's own node identifier.
    local_node_id: NodeId,
    config: CoordinatorConfig,
    registry: NodeRegistry,
    detector: FailureDetector,
    /// Routing ring, replaced or patched only under the write lock.
    ring: RwLock<RingView>,
    /// Set when a detector transition or removal invalidated the ring view.
    dirty: AtomicBool,
    clock: Arc<dyn Clock>,
    /// Broadcast channel for cluster events.
    event_tx: broadcast::Sender<ClusterEvent>,
}

impl ClusterCoordinator {
    /// Create a coordinator after validating `config`.
    pub fn new(
        local_node_id: NodeId,
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, ClusterError> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(256);
        let registry = NodeRegistry::new();
        let ring = RingView {
            ring: Ring::new(config.vnodes_per_node),
            alive: HashSet::new(),
            synced_generation: registry.generation(),
        };

        Ok(Arc::new(Self {
            local_node_id,
            detector: FailureDetector::new(config.detector.clone()),
            config,
            registry,
            ring: RwLock::new(ring),
            dirty: AtomicBool::new(false),
            clock,
            event_tx,
        }))
    }

    /// Subscribe to cluster events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.event_tx.subscribe()
    }

    /// Return this coordinator's own node ID.
    pub fn local_node_id(&self) -> &NodeId {
        &self.local_node_id
    }

    /// Return the coordinator's configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Return the underlying node registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn emit(&self, event: ClusterEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Ingest a heartbeat from `node_id`.
    ///
    /// Registers unknown nodes and revives suspect or dead ones. Returns the
    /// node record after the heartbeat.
    pub async fn record_heartbeat(&self, node_id: NodeId) -> Node {
        let now = self.clock.now_ms();
        let receipt = self.registry.record_heartbeat(node_id, now).await;
        let node_id = &receipt.node.id;

        match receipt.outcome {
            HeartbeatOutcome::Joined => {
                self.mark_dirty();
                info!(%node_id, "node joined cluster");
                self.emit(ClusterEvent::NodeJoined(node_id.clone()));
            }
            HeartbeatOutcome::Recovered(previous) => {
                self.mark_dirty();
                info!(%node_id, from = %previous, "node recovered to ALIVE");
                self.emit(ClusterEvent::NodeRecovered(node_id.clone()));
            }
            HeartbeatOutcome::Refreshed => {
                debug!(%node_id, heartbeat = receipt.node.heartbeat, "heartbeat");
            }
        }

        receipt.node
    }

    /// Run the failure detector once at the current time.
    ///
    /// Any transition marks the ring dirty and is broadcast to subscribers.
    pub async fn tick(&self) -> Vec<StateChange> {
        let now = self.clock.now_ms();
        let changes = self.detector.scan(&self.registry, now).await;

        if !changes.is_empty() {
            self.mark_dirty();
        }

        for change in &changes {
            let node_id = &change.node_id;
            match change.to {
                NodeState::Suspect => {
                    info!(%node_id, from = %change.from, "node is now SUSPECT");
                    self.emit(ClusterEvent::NodeSuspect(node_id.clone()));
                }
                NodeState::Dead => {
                    info!(%node_id, from = %change.from, "node declared DEAD");
                    self.emit(ClusterEvent::NodeDead(node_id.clone()));
                }
                NodeState::Alive => {}
            }
        }

        changes
    }

    /// Current liveness of every known node, keyed by ID.
    ///
    /// States are re-evaluated against the clock before the snapshot is taken.
    pub async fn status(&self) -> BTreeMap<NodeId, Node> {
        self.tick().await;
        self.registry.snapshot().await
    }

    /// Find the alive node responsible for `key`.
    pub async fn find(&self, key: &str) -> Result<NodeId, ClusterError> {
        self.tick().await;

        {
            let view = self.ring.read().await;
            if !self.is_stale(&view) {
                return view.find(key);
            }
        }

        let mut view = self.ring.write().await;
        self.refresh(&mut view).await;
        let view = view.downgrade();
        view.find(key)
    }

    fn is_stale(&self, view: &RingView) -> bool {
        self.dirty.load(Ordering::Acquire) || view.synced_generation != self.registry.generation()
    }

    /// Bring the ring view up to date with the registry.
    ///
    /// Alive nodes missing from the ring are added and unregistered nodes
    /// are removed. Suspect and dead nodes keep their positions and are
    /// skipped during lookup until the next [`rebalance`](Self::rebalance).
    async fn refresh(&self, view: &mut RingView) {
        // Clear before reading so a concurrent invalidation is not lost.
        self.dirty.store(false, Ordering::Release);
        let generation = self.registry.generation();
        let nodes = self.registry.snapshot().await;

        let stale: Vec<NodeId> = view
            .ring
            .node_ids()
            .filter(|id| !nodes.contains_key(*id))
            .cloned()
            .collect();
        for id in &stale {
            view.ring.remove_node(id);
        }

        let alive: HashSet<NodeId> = nodes
            .values()
            .filter(|n| n.is_alive())
            .map(|n| n.id.clone())
            .collect();
        for id in &alive {
            view.ring.add_node(id.clone());
        }

        view.alive = alive;
        view.synced_generation = generation;

        debug!(
            generation,
            alive = view.alive.len(),
            nodes = view.ring.node_count(),
            positions = view.ring.vnode_count(),
            "ring view refreshed"
        );
    }

    /// Rebuild the ring from scratch using only the currently alive nodes.
    ///
    /// With no alive node the ring ends up empty and every `find` fails with
    /// [`ClusterError::NoAvailableNode`] until a node heartbeats.
    pub async fn rebalance(&self) -> RebalanceSummary {
        self.tick().await;

        let mut view = self.ring.write().await;
        self.dirty.store(false, Ordering::Release);
        let generation = self.registry.generation();
        let alive = self.registry.alive_ids().await;

        let ring = Ring::build(alive.iter().cloned(), self.config.vnodes_per_node);
        let summary = RebalanceSummary {
            nodes: ring.node_count(),
            positions: ring.vnode_count(),
        };

        *view = RingView {
            ring,
            alive: alive.into_iter().collect(),
            synced_generation: generation,
        };
        drop(view);

        info!(
            nodes = summary.nodes,
            positions = summary.positions,
            "hash ring rebuilt from ALIVE nodes"
        );
        self.emit(ClusterEvent::RingRebuilt {
            nodes: summary.nodes,
            positions: summary.positions,
        });

        summary
    }

    /// Explicitly remove a node from the registry and the ring.
    pub async fn remove_node(&self, node_id: &NodeId) -> Result<Node, ClusterError> {
        let node = self.registry.remove(node_id).await?;
        self.mark_dirty();

        info!(%node_id, "node removed from cluster");
        self.emit(ClusterEvent::NodeRemoved(node_id.clone()));
        Ok(node)
    }

    /// Merge node records reported by another coordinator.
    ///
    /// Adopted records are announced like local changes: unknown nodes as
    /// joins, and state changes as recoveries or detector transitions.
    /// Returns how many records were adopted.
    pub async fn merge(&self, remote: Vec<Node>) -> usize {
        let now = self.clock.now_ms();
        let adopted = self.registry.merge(remote, now).await;

        if adopted.is_empty() {
            return 0;
        }
        self.mark_dirty();

        for merged in &adopted {
            let node_id = &merged.node.id;
            let to = merged.node.state;
            let event = match merged.previous {
                None => ClusterEvent::NodeJoined(node_id.clone()),
                Some(from) if from == to => continue,
                Some(_) => match to {
                    NodeState::Alive => ClusterEvent::NodeRecovered(node_id.clone()),
                    NodeState::Suspect => ClusterEvent::NodeSuspect(node_id.clone()),
                    NodeState::Dead => ClusterEvent::NodeDead(node_id.clone()),
                },
            };
            debug!(%node_id, state = %to, "adopted remote record");
            self.emit(event);
        }

        info!(adopted = adopted.len(), "merged remote membership");
        adopted.len()
    }

    /// Return a clone of the current ring, refreshed against the registry.
    pub async fn ring(&self) -> Ring {
        let mut view = self.ring.write().await;
        if self.is_stale(&view) {
            self.refresh(&mut view).await;
        }
        view.ring.clone()
    }
}

impl fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("local_node_id", &self.local_node_id)
            .field("vnodes_per_node", &self.config.vnodes_per_node)
            .finish_non_exhaustive()
    }
}
