//! Consistent hashing ring implementation.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use vigil_types::NodeId;

/// A key whose owner differs between two ring states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    /// The routed key.
    pub key: String,
    /// Owner on the old ring, `None` if the old ring was empty.
    pub from: Option<NodeId>,
    /// Owner on the new ring, `None` if the new ring is empty.
    pub to: Option<NodeId>,
}

/// Consistent hashing ring for key routing.
///
/// Each node is mapped to `vnodes_per_node` virtual nodes on a u64 ring.
/// Key placement walks clockwise from the key's position until a position
/// accepted by the caller's liveness predicate is found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring {
    /// Virtual node positions: ring position -> physical node.
    vnodes: BTreeMap<u64, NodeId>,
    /// Nodes that hashed to an occupied position and lost it to a smaller ID.
    contested: BTreeMap<u64, BTreeSet<NodeId>>,
    /// Physical nodes currently on the ring.
    nodes: BTreeSet<NodeId>,
    /// Number of vnodes placed for every node.
    vnodes_per_node: u16,
}

impl Ring {
    /// Create a new empty ring.
    pub fn new(vnodes_per_node: u16) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            contested: BTreeMap::new(),
            nodes: BTreeSet::new(),
            vnodes_per_node,
        }
    }

    /// Build a ring from scratch for the given node set.
    ///
    /// The result depends only on the set of IDs and `vnodes_per_node`,
    /// never on iteration order or on any earlier ring.
    pub fn build<I>(node_ids: I, vnodes_per_node: u16) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut ring = Self::new(vnodes_per_node);
        for node_id in node_ids {
            ring.add_node(node_id);
        }
        ring
    }

    /// Add a node to the ring. Adding a node that is already present is a no-op.
    pub fn add_node(&mut self, node_id: NodeId) {
        if self.nodes.contains(&node_id) {
            return;
        }

        for i in 0..self.vnodes_per_node {
            self.claim(vnode_position(&node_id, i), &node_id);
        }

        debug!(%node_id, vnodes = self.vnodes_per_node, "added node to ring");
        self.nodes.insert(node_id);
    }

    /// Remove a node and all of its vnodes from the ring.
    pub fn remove_node(&mut self, node_id: &NodeId) {
        if !self.nodes.remove(node_id) {
            return;
        }

        for i in 0..self.vnodes_per_node {
            self.release(vnode_position(node_id, i), node_id);
        }
        debug!(%node_id, "removed node from ring");
    }

    /// Place `node_id` at `pos`.
    ///
    /// On a collision the smaller ID owns the position and the other is kept
    /// as a contender, so the ring does not depend on insertion order.
    fn claim(&mut self, pos: u64, node_id: &NodeId) {
        match self.vnodes.entry(pos) {
            Entry::Vacant(slot) => {
                slot.insert(node_id.clone());
            }
            Entry::Occupied(mut slot) => {
                if slot.get() == node_id {
                    return;
                }
                let loser = if node_id < slot.get() {
                    slot.insert(node_id.clone())
                } else {
                    node_id.clone()
                };
                self.contested.entry(pos).or_default().insert(loser);
            }
        }
    }

    /// Take `node_id` off `pos`, handing the position to the smallest
    /// remaining contender if there is one.
    fn release(&mut self, pos: u64, node_id: &NodeId) {
        if let Entry::Occupied(mut contenders) = self.contested.entry(pos) {
            contenders.get_mut().remove(node_id);
            if self.vnodes.get(&pos) == Some(node_id) {
                if let Some(next) = contenders.get_mut().pop_first() {
                    self.vnodes.insert(pos, next);
                } else {
                    self.vnodes.remove(&pos);
                }
            }
            if contenders.get().is_empty() {
                contenders.remove();
            }
            return;
        }

        if self.vnodes.get(&pos) == Some(node_id) {
            self.vnodes.remove(&pos);
        }
    }

    /// Find the node that owns `key`, skipping nodes rejected by `is_alive`.
    ///
    /// Walks clockwise from the key's position, wrapping around once. Returns
    /// `None` when the ring is empty or no position belongs to an accepted node.
    pub fn find<F>(&self, key: &str, is_alive: F) -> Option<&NodeId>
    where
        F: Fn(&NodeId) -> bool,
    {
        let pos = key_position(key);

        // BTreeMap::range gives us everything >= pos, then we wrap around.
        let after = self.vnodes.range(pos..);
        let before = self.vnodes.range(..pos);

        after
            .chain(before)
            .map(|(_, node_id)| node_id)
            .find(|node_id| is_alive(*node_id))
    }

    /// Owner of `key` ignoring liveness.
    pub fn owner(&self, key: &str) -> Option<&NodeId> {
        self.find(key, |_| true)
    }

    /// Compute which of `keys` change owner between two ring states.
    pub fn diff<K: AsRef<str>>(old: &Ring, new: &Ring, keys: &[K]) -> Vec<Reassignment> {
        keys.iter()
            .filter_map(|key| {
                let key = key.as_ref();
                let from = old.owner(key);
                let to = new.owner(key);
                (from != to).then(|| Reassignment {
                    key: key.to_string(),
                    from: from.cloned(),
                    to: to.cloned(),
                })
            })
            .collect()
    }

    /// Whether `node_id` has positions on the ring.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains(node_id)
    }

    /// Return the number of physical nodes in the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Return the total number of vnodes in the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// Return the configured vnodes per node.
    pub fn vnodes_per_node(&self) -> u16 {
        self.vnodes_per_node
    }

    /// Return all node IDs in the ring, in sorted order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    /// Whether the ring has no positions.
    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }
}

/// Compute a vnode's position: blake3(node_id ++ "#" ++ vnode_index) truncated to u64.
fn vnode_position(node_id: &NodeId, vnode_index: u16) -> u64 {
    let label = format!("{node_id}#{vnode_index}");
    hash_position(label.as_bytes())
}

/// Compute a key's position on the ring.
fn key_position(key: &str) -> u64 {
    hash_position(key.as_bytes())
}

/// First 8 bytes of the BLAKE3 digest, little-endian.
fn hash_position(input: &[u8]) -> u64 {
    let hash = blake3::hash(input);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
