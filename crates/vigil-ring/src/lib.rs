//! Consistent hashing ring for deterministic key routing.
//!
//! This crate implements a consistent hash ring that maps arbitrary string
//! keys to node IDs. Each physical node owns a fixed number of virtual nodes
//! (vnodes) at positions `blake3(node_id ++ "#" ++ vnode_index)`; a key is
//! owned by the first vnode clockwise from `blake3(key)`.
//!
//! Lookups accept a liveness predicate so that callers can skip positions
//! of nodes that are temporarily unavailable without rebuilding the ring.

mod ring;

pub use ring::{Reassignment, Ring};
