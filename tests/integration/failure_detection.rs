//! Integration test: failure detection.
//!
//! Nodes that stop heartbeating go SUSPECT after 5 s and DEAD after 15 s of
//! silence, and come back to ALIVE on their next heartbeat.

use std::time::Duration;

use vigil_cluster::ClusterError;
use vigil_integration_tests::TestCluster;
use vigil_types::{ClusterEvent, NodeState};

/// Only the silent node degrades while the others keep heartbeating.
#[tokio::test]
async fn test_silent_node_degrades_while_others_stay_alive() {
    let c = TestCluster::new(3).await;

    for second in 1..=20 {
        c.set_time_secs(second);
        c.heartbeat_all_except(&[1]).await;

        let expected = match second {
            0..=4 => NodeState::Alive,
            5..=14 => NodeState::Suspect,
            _ => NodeState::Dead,
        };
        assert_eq!(c.state_of(1).await, expected, "node 1 at t={second}s");
        assert_eq!(c.state_of(0).await, NodeState::Alive, "node 0 at t={second}s");
        assert_eq!(c.state_of(2).await, NodeState::Alive, "node 2 at t={second}s");
    }
}

/// Thresholds are inclusive at millisecond resolution.
#[tokio::test]
async fn test_threshold_boundaries() {
    let c = TestCluster::new(1).await;

    c.clock().set_ms(4_999);
    assert_eq!(c.state_of(0).await, NodeState::Alive);

    c.clock().set_ms(5_000);
    assert_eq!(c.state_of(0).await, NodeState::Suspect);

    c.clock().set_ms(14_999);
    assert_eq!(c.state_of(0).await, NodeState::Suspect);

    c.clock().set_ms(15_000);
    assert_eq!(c.state_of(0).await, NodeState::Dead);
}

/// A node first observed after the dead timeout goes straight to DEAD.
#[tokio::test]
async fn test_alive_to_dead_in_one_observation() {
    let c = TestCluster::new(1).await;
    let mut events = c.coordinator().subscribe();

    c.set_time_secs(30);
    let changes = c.coordinator().tick().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].from, NodeState::Alive);
    assert_eq!(changes[0].to, NodeState::Dead);

    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeDead(c.node(0).clone()));
}

/// A dead node's heartbeat revives it, increments its counter and puts it
/// back in routing without a rebalance.
#[tokio::test]
async fn test_dead_node_revives_on_heartbeat() {
    let c = TestCluster::new(2).await;

    c.set_time_secs(10);
    c.heartbeat(0).await;
    c.set_time_secs(20);
    c.heartbeat(0).await;
    assert_eq!(c.state_of(1).await, NodeState::Dead);

    // Every key routes to the only alive node.
    for key in ["a", "b", "c", "d", "e"] {
        assert_eq!(&c.coordinator().find(key).await.unwrap(), c.node(0));
    }

    let node = c.heartbeat(1).await;
    assert_eq!(node.state, NodeState::Alive);
    assert_eq!(node.heartbeat, 1);
    assert_eq!(node.timestamp, 20_000);

    let mut owners = std::collections::BTreeSet::new();
    for i in 0..200 {
        owners.insert(c.coordinator().find(&format!("key-{i}")).await.unwrap());
    }
    assert!(owners.contains(c.node(1)), "revived node should own keys again");
}

/// Heartbeats more often than the suspect timeout keep a node ALIVE forever.
#[tokio::test]
async fn test_regular_heartbeats_never_suspect() {
    let c = TestCluster::new(1).await;

    for _ in 0..100 {
        c.advance(Duration::from_millis(4_900));
        c.heartbeat(0).await;
        assert_eq!(c.state_of(0).await, NodeState::Alive);
    }
}

/// With every node dead, lookups fail until one of them heartbeats.
#[tokio::test]
async fn test_all_dead_then_one_returns() {
    let c = TestCluster::new(3).await;

    c.set_time_secs(60);
    assert!(matches!(
        c.coordinator().find("anything").await,
        Err(ClusterError::NoAvailableNode)
    ));

    c.heartbeat(2).await;
    assert_eq!(&c.coordinator().find("anything").await.unwrap(), c.node(2));
}

/// Detector transitions are broadcast in order.
#[tokio::test]
async fn test_transition_events() {
    let c = TestCluster::new(1).await;
    let mut events = c.coordinator().subscribe();
    let id = c.node(0).clone();

    c.set_time_secs(6);
    c.coordinator().tick().await;
    c.set_time_secs(16);
    c.coordinator().tick().await;
    c.heartbeat(0).await;

    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeSuspect(id.clone()));
    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeDead(id.clone()));
    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeRecovered(id));
}
