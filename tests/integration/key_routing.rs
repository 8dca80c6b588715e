//! Integration test: key routing.
//!
//! Consistent hashing keeps most keys in place when membership changes:
//! a join moves roughly `1/(N+1)` of the keys, all of them onto the new
//! node, and a failure moves only the failed node's keys.

use std::collections::HashMap;

use vigil_integration_tests::{TestCluster, test_keys};
use vigil_ring::Ring;
use vigil_types::NodeId;

/// Keys spread over every node, none with an outsized share.
#[tokio::test]
async fn test_keys_are_spread_across_nodes() {
    let c = TestCluster::new(4).await;
    let keys = test_keys(4000);

    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for owner in c.owners(&keys).await {
        *counts.entry(owner).or_default() += 1;
    }

    assert_eq!(counts.len(), 4, "every node should own keys");
    for (node, count) in &counts {
        let share = *count as f64 / keys.len() as f64;
        assert!(
            (0.15..=0.35).contains(&share),
            "{node} owns {share:.3} of the keys"
        );
    }
}

/// Lookups are stable for an unchanged membership.
#[tokio::test]
async fn test_routing_is_deterministic() {
    let a = TestCluster::new(5).await;
    let b = TestCluster::new(5).await;
    let keys = test_keys(500);

    let first = a.owners(&keys).await;
    assert_eq!(first, a.owners(&keys).await);
    assert_eq!(first, b.owners(&keys).await, "same members, same routing");
}

/// Joining a fourth node moves about a quarter of the keys, all to it.
#[tokio::test]
async fn test_join_moves_keys_only_to_new_node() {
    let mut c = TestCluster::new(3).await;
    let keys = test_keys(1000);

    let before = c.owners(&keys).await;
    let joined = c.join().await;
    let after = c.owners(&keys).await;

    let new_node = c.node(joined).clone();
    let mut moved = 0;
    for (old, new) in before.iter().zip(&after) {
        if old != new {
            moved += 1;
            assert_eq!(new, &new_node, "keys may only move to the joining node");
        }
    }

    let fraction = moved as f64 / keys.len() as f64;
    assert!(
        (0.15..=0.35).contains(&fraction),
        "expected about 1/4 of keys to move, got {fraction:.3}"
    );
}

/// The ring snapshots before and after a join agree with the live lookups.
#[tokio::test]
async fn test_ring_diff_matches_join() {
    let mut c = TestCluster::new(3).await;
    let keys = test_keys(1000);

    let old_ring = c.coordinator().ring().await;
    let joined = c.join().await;
    let new_ring = c.coordinator().ring().await;

    assert_eq!(old_ring.node_count(), 3);
    assert_eq!(new_ring.node_count(), 4);
    assert_eq!(new_ring.vnode_count(), 400);

    let moves = Ring::diff(&old_ring, &new_ring, &keys);
    assert!(!moves.is_empty());
    for m in &moves {
        assert_eq!(m.to.as_ref(), Some(c.node(joined)), "{m:?}");
        assert!(m.from.is_some());
    }
}

/// When a node fails, only its keys move, and they land exactly where a
/// ring rebuilt without it would send them.
#[tokio::test]
async fn test_failure_moves_only_failed_nodes_keys() {
    let c = TestCluster::new(4).await;
    let keys = test_keys(1000);
    let before = c.owners(&keys).await;
    let failed = c.node(2).clone();

    // Everyone but node 2 keeps heartbeating until it is DEAD.
    for second in 1..=16 {
        c.set_time_secs(second);
        c.heartbeat_all_except(&[2]).await;
    }

    // Positions of the dead node are still on the ring but skipped.
    assert!(c.coordinator().ring().await.contains(&failed));
    let skipped = c.owners(&keys).await;

    for (old, new) in before.iter().zip(&skipped) {
        if old == &failed {
            assert_ne!(new, &failed);
        } else {
            assert_eq!(old, new, "keys of healthy nodes must not move");
        }
    }

    // Rebuilding from the ALIVE set routes every key the same way.
    let summary = c.coordinator().rebalance().await;
    assert_eq!(summary.nodes, 3);
    assert_eq!(summary.positions, 300);
    assert!(!c.coordinator().ring().await.contains(&failed));
    assert_eq!(c.owners(&keys).await, skipped);
}

/// A stand-alone ring built from the same IDs routes like the coordinator.
#[tokio::test]
async fn test_offline_ring_matches_coordinator() {
    let c = TestCluster::new(3).await;
    let keys = test_keys(200);

    let ring = Ring::build(c.node_ids().iter().cloned(), 100);
    let owners = c.owners(&keys).await;
    for (key, owner) in keys.iter().zip(&owners) {
        assert_eq!(ring.owner(key), Some(owner), "key {key}");
    }
}
