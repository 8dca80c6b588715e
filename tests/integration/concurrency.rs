//! Integration test: concurrent access.
//!
//! Heartbeats, detector ticks, lookups and rebalances run from many tasks
//! against one shared coordinator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use vigil_cluster::{ClusterError, CoordinatorConfig};
use vigil_integration_tests::{TestCluster, node_id, test_keys};
use vigil_types::NodeState;

/// No heartbeat is lost when many tasks report at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_heartbeats_are_counted() {
    let c = TestCluster::new(0).await;
    let coordinator = c.coordinator().clone();

    let mut tasks = Vec::new();
    for port in 8000..8010u16 {
        for _ in 0..10 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    coordinator.record_heartbeat(node_id(port)).await;
                }
            }));
        }
    }
    for t in tasks {
        t.await.unwrap();
    }

    let status = coordinator.status().await;
    assert_eq!(status.len(), 10);
    for node in status.values() {
        // 100 heartbeats: the first registers with counter 0.
        assert_eq!(node.heartbeat, 99, "{}", node.id);
        assert_eq!(node.state, NodeState::Alive);
    }
}

/// Lookups racing with joins, ticks and rebalances always see a usable ring.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookups_during_membership_churn() {
    let c = Arc::new(TestCluster::new(3).await);
    let keys = Arc::new(test_keys(200));
    let initial: HashSet<_> = c.node_ids().iter().cloned().collect();

    let mut readers = Vec::new();
    for r in 0..4 {
        let c = c.clone();
        let keys = keys.clone();
        readers.push(tokio::spawn(async move {
            let mut seen = HashSet::new();
            for round in 0..50 {
                let key = &keys[(r * 50 + round) % keys.len()];
                let owner = c.coordinator().find(key).await.unwrap();
                seen.insert(owner);
            }
            seen
        }));
    }

    let writer = {
        let c = c.clone();
        tokio::spawn(async move {
            for port in 8003..8013u16 {
                c.coordinator().record_heartbeat(node_id(port)).await;
                c.coordinator().tick().await;
                if port % 3 == 0 {
                    c.coordinator().rebalance().await;
                }
            }
        })
    };

    writer.await.unwrap();
    for r in readers {
        for owner in r.await.unwrap() {
            let port: u16 = owner.as_str()["cpu:".len()..].parse().unwrap();
            assert!(
                initial.contains(&owner) || (8003..8013).contains(&port),
                "unexpected owner {owner}"
            );
        }
    }

    let ring = c.coordinator().ring().await;
    assert_eq!(ring.node_count(), 13);
}

/// The background detector and API-style reads share the coordinator.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_detector_with_readers() {
    let config = CoordinatorConfig {
        vnodes_per_node: 16,
        ..CoordinatorConfig::test_config()
    };
    let c = Arc::new(TestCluster::with_config(2, config).await);
    let handle = vigil_cluster::detector::start(c.coordinator().clone());

    // Node 0 keeps heartbeating on the manual clock, node 1 goes quiet.
    for _ in 0..20 {
        c.advance(Duration::from_millis(10));
        c.heartbeat(0).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        c.coordinator().find("key").await.unwrap();
    }

    assert_eq!(c.state_of(0).await, NodeState::Alive);
    assert_eq!(c.state_of(1).await, NodeState::Dead);
    assert!(handle.is_running());
    handle.shutdown().await;

    c.advance(Duration::from_secs(1));
    assert!(matches!(
        c.coordinator().find("key").await,
        Err(ClusterError::NoAvailableNode)
    ));
}
