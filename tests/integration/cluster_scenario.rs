//! Integration test: end-to-end cluster lifecycle.
//!
//! Four nodes `cpu:8000..8003` heartbeat once at t=0 and then go quiet.

use vigil_cluster::ClusterError;
use vigil_integration_tests::{TestCluster, node_id, test_keys};
use vigil_types::{ClusterEvent, NodeState};

async fn assert_all(c: &TestCluster, state: NodeState) {
    let status = c.coordinator().status().await;
    assert_eq!(status.len(), 4);
    for (id, node) in &status {
        assert_eq!(node.state, state, "{id}");
    }
}

/// Quiet nodes go SUSPECT, then DEAD; one comes back and takes every key.
#[tokio::test]
async fn test_quiet_cluster_lifecycle() {
    let c = TestCluster::new(4).await;
    assert_all(&c, NodeState::Alive).await;

    c.set_time_secs(6);
    assert_all(&c, NodeState::Suspect).await;

    c.set_time_secs(16);
    assert_all(&c, NodeState::Dead).await;
    assert!(matches!(
        c.coordinator().find("cpu:8000").await,
        Err(ClusterError::NoAvailableNode)
    ));

    c.set_time_secs(17);
    let revived = c.heartbeat(0).await;
    assert_eq!(revived.id, node_id(8000));
    assert_eq!(revived.state, NodeState::Alive);
    assert_eq!(revived.heartbeat, 1);

    let summary = c.coordinator().rebalance().await;
    assert_eq!(summary.nodes, 1);
    assert_eq!(summary.positions, 100);
    assert_eq!(
        summary.to_string(),
        "Hash ring rebuilt from 1 ALIVE node(s) with 100 virtual position(s)."
    );

    for key in test_keys(100) {
        assert_eq!(c.coordinator().find(&key).await.unwrap(), node_id(8000));
    }

    let status = c.coordinator().status().await;
    assert_eq!(status[&node_id(8000)].state, NodeState::Alive);
    for port in 8001..=8003 {
        assert_eq!(status[&node_id(port)].state, NodeState::Dead);
    }
}

/// The full event stream for a join, a failure and a removal.
#[tokio::test]
async fn test_event_stream() {
    let mut c = TestCluster::new(1).await;
    let mut events = c.coordinator().subscribe();

    let joined = c.join().await;
    let joined_id = c.node(joined).clone();

    c.set_time_secs(20);
    c.heartbeat(0).await;
    c.coordinator().tick().await;
    c.coordinator().rebalance().await;
    c.coordinator().remove_node(&joined_id).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeJoined(joined_id.clone()));
    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeDead(joined_id.clone()));
    assert_eq!(
        events.recv().await.unwrap(),
        ClusterEvent::RingRebuilt {
            nodes: 1,
            positions: 100,
        }
    );
    assert_eq!(events.recv().await.unwrap(), ClusterEvent::NodeRemoved(joined_id));
    assert!(events.try_recv().is_err());
}

/// Removing a node drops it from status and routing immediately.
#[tokio::test]
async fn test_remove_node_stops_routing() {
    let c = TestCluster::new(2).await;
    let removed = c.node(1).clone();

    c.coordinator().remove_node(&removed).await.unwrap();

    let status = c.coordinator().status().await;
    assert!(!status.contains_key(&removed));
    for key in test_keys(100) {
        assert_eq!(&c.coordinator().find(&key).await.unwrap(), c.node(0));
    }
    assert!(!c.coordinator().ring().await.contains(&removed));

    assert!(matches!(
        c.coordinator().remove_node(&removed).await,
        Err(ClusterError::UnknownNode(id)) if id == removed
    ));
}

/// Membership learned from a peer coordinator routes like local heartbeats.
#[tokio::test]
async fn test_merge_from_peer() {
    let local = TestCluster::new(2).await;
    let peer = TestCluster::new(4).await;
    peer.heartbeat(3).await;

    let remote: Vec<_> = peer.coordinator().status().await.into_values().collect();
    let adopted = local.coordinator().merge(remote.clone()).await;
    // cpu:8002 and cpu:8003 are new; cpu:8000 and cpu:8001 have equal counters.
    assert_eq!(adopted, 2);

    let keys = test_keys(300);
    assert_eq!(local.owners(&keys).await, peer.owners(&keys).await);

    // Re-merging the same records changes nothing.
    assert_eq!(local.coordinator().merge(remote).await, 0);
}
