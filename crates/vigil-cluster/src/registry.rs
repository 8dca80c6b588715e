//! Authoritative table of known nodes.
//!
//! [`NodeRegistry`] owns every [`Node`] record. Heartbeats create and refresh
//! records, the failure detector moves their state forward, and every
//! mutation bumps a generation counter so that the coordinator can tell
//! whether its ring view is stale without comparing node tables.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use vigil_types::{Node, NodeId, NodeState};

use crate::detector::StateChange;
use crate::error::ClusterError;

/// What a heartbeat did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The node was unknown and has been registered.
    Joined,
    /// The node was suspect or dead and is alive again.
    Recovered(NodeState),
    /// The node was already alive; counter and timestamp moved.
    Refreshed,
}

/// Result of [`NodeRegistry::record_heartbeat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatReceipt {
    /// The node record after the heartbeat.
    pub node: Node,
    /// How the record changed.
    pub outcome: HeartbeatOutcome,
}

/// A record adopted by [`NodeRegistry::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedNode {
    /// The record as stored after the merge.
    pub node: Node,
    /// Local state before the merge, `None` if the node was unknown.
    pub previous: Option<NodeState>,
}

/// Node table guarded by a single read-write lock.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, Node>>,
    /// Bumped on every mutation while the write lock is held.
    generation: AtomicU64,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation. Changes whenever any node record changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a heartbeat from `node_id` observed at `now_ms`.
    ///
    /// Unknown nodes are registered alive with heartbeat 0. Known nodes get
    /// their counter incremented, their timestamp refreshed and their state
    /// reset to alive. Never fails.
    pub async fn record_heartbeat(&self, node_id: NodeId, now_ms: u64) -> HeartbeatReceipt {
        let mut nodes = self.nodes.write().await;

        let receipt = match nodes.entry(node_id) {
            Entry::Vacant(slot) => {
                let node = Node::new(slot.key().clone(), now_ms);
                slot.insert(node.clone());
                HeartbeatReceipt {
                    node,
                    outcome: HeartbeatOutcome::Joined,
                }
            }
            Entry::Occupied(mut slot) => {
                let node = slot.get_mut();
                let previous = node.state;
                node.heartbeat = node.heartbeat.saturating_add(1);
                node.timestamp = node.timestamp.max(now_ms);
                node.state = NodeState::Alive;

                let outcome = match previous {
                    NodeState::Alive => HeartbeatOutcome::Refreshed,
                    other => HeartbeatOutcome::Recovered(other),
                };
                HeartbeatReceipt {
                    node: node.clone(),
                    outcome,
                }
            }
        };

        self.bump();
        receipt
    }

    /// Set the state of a node. No-op if the node does not exist.
    ///
    /// Returns `true` if the state actually changed.
    pub async fn set_state(&self, node_id: &NodeId, state: NodeState) -> bool {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(node_id) {
            Some(node) if node.state != state => {
                node.state = state;
                self.bump();
                true
            }
            _ => false,
        }
    }

    /// Apply `next` to every node.
    ///
    /// `next` returns the state a node should move to, or `None` to leave it.
    /// Nodes are first checked under the read lock and the write lock is only
    /// taken when something is due. The write pass re-evaluates every node,
    /// so a heartbeat that lands in between is never overwritten by a
    /// decision made on its stale timestamp.
    pub(crate) async fn transition_with<F>(&self, mut next: F) -> Vec<StateChange>
    where
        F: FnMut(&Node) -> Option<NodeState>,
    {
        let due = self
            .nodes
            .read()
            .await
            .values()
            .any(|node| next(node).is_some_and(|to| to != node.state));
        if !due {
            return Vec::new();
        }

        let mut nodes = self.nodes.write().await;
        let mut changes = Vec::new();

        for node in nodes.values_mut() {
            if let Some(to) = next(node)
                && to != node.state
            {
                changes.push(StateChange {
                    node_id: node.id.clone(),
                    from: node.state,
                    to,
                });
                node.state = to;
            }
        }

        if !changes.is_empty() {
            self.bump();
        }
        changes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        changes
    }

    /// Explicitly remove a node.
    pub async fn remove(&self, node_id: &NodeId) -> Result<Node, ClusterError> {
        let removed = self.nodes.write().await.remove(node_id);
        match removed {
            Some(node) => {
                self.bump();
                Ok(node)
            }
            None => Err(ClusterError::UnknownNode(node_id.clone())),
        }
    }

    /// Merge node records learned from another coordinator.
    ///
    /// A remote record is adopted when its node is unknown here or its
    /// heartbeat is strictly greater than the local one. Adopted records keep
    /// the remote heartbeat and state but are timestamped with `now_ms`, since
    /// remote wall clocks are not comparable. Returns the adopted records in
    /// ID order.
    pub async fn merge<I>(&self, remote: I, now_ms: u64) -> Vec<MergedNode>
    where
        I: IntoIterator<Item = Node>,
    {
        let mut nodes = self.nodes.write().await;
        let mut adopted = Vec::new();

        for incoming in remote {
            let previous = nodes.get(&incoming.id).map(|local| local.state);
            let newer = nodes
                .get(&incoming.id)
                .is_none_or(|local| incoming.heartbeat > local.heartbeat);
            if !newer {
                continue;
            }

            let node = Node {
                timestamp: now_ms,
                ..incoming
            };
            nodes.insert(node.id.clone(), node.clone());
            adopted.push(MergedNode { node, previous });
        }

        if !adopted.is_empty() {
            self.bump();
        }
        adopted.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        adopted
    }

    /// Owned copy of all nodes, keyed and ordered by ID.
    pub async fn snapshot(&self) -> BTreeMap<NodeId, Node> {
        self.nodes
            .read()
            .await
            .iter()
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect()
    }

    /// Return a specific node by ID.
    pub async fn get(&self, node_id: &NodeId) -> Option<Node> {
        self.nodes.read().await.get(node_id).cloned()
    }

    /// IDs of nodes currently in the alive state.
    pub async fn alive_ids(&self) -> BTreeSet<NodeId> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|n| n.is_alive())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Return the number of registered nodes.
    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Whether no node has ever heartbeated (or all were removed).
    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Hold the node table's read lock.
    #[cfg(test)]
    pub(crate) async fn read_guard(
        &self,
    ) -> tokio::sync::RwLockReadGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.read().await
    }
}
