//! Push-pull membership exchange between coordinators.
//!
//! Every round picks one seed peer at random, pushes the local membership
//! map to it and pulls the peer's map back. Both sides apply the usual merge
//! rule, so any two coordinators that gossip converge on the highest
//! heartbeat seen for every node.
//!
//! Peers are addressed by the string they were configured with. A peer whose
//! address is also a registered node ID is skipped while that node is DEAD.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vigil_types::{Node, NodeId, NodeState};

use crate::coordinator::ClusterCoordinator;
use crate::error::ClusterError;

/// Trait abstracting how membership maps reach other coordinators.
///
/// This allows substituting an in-process transport in tests.
#[async_trait::async_trait]
pub trait GossipTransport: Send + Sync {
    /// Push `nodes` to `peer`. Returns how many records the peer adopted.
    async fn push(&self, peer: &str, nodes: Vec<Node>) -> Result<usize, ClusterError>;

    /// Pull the full membership map of `peer`.
    async fn pull(&self, peer: &str) -> Result<Vec<Node>, ClusterError>;
}

/// Gossip settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipConfig {
    /// Interval between gossip rounds.
    pub interval: Duration,
    /// Seed coordinators to gossip with.
    pub peers: Vec<String>,
}

impl GossipConfig {
    /// Reject settings the gossip loop cannot run with.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !self.peers.is_empty() && self.interval.is_zero() {
            return Err(ClusterError::InvalidConfiguration(
                "gossip interval must be positive".to_string(),
            ));
        }
        if self.peers.iter().any(|p| p.trim().is_empty()) {
            return Err(ClusterError::InvalidConfiguration(
                "gossip peer must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            peers: Vec::new(),
        }
    }
}

/// Outcome of one [`gossip_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipRound {
    /// The peer gossiped with.
    pub peer: String,
    /// Records pushed to the peer.
    pub sent: usize,
    /// Records the peer adopted from us.
    pub adopted_remotely: usize,
    /// Records we adopted from the peer.
    pub adopted_locally: usize,
}

/// Seeds eligible for a round: not ourselves and not known to be DEAD.
async fn candidates(coordinator: &ClusterCoordinator, peers: &[String]) -> Vec<String> {
    let nodes = coordinator.registry().snapshot().await;
    peers
        .iter()
        .filter(|peer| peer.as_str() != coordinator.local_node_id().as_str())
        .filter(|peer| {
            nodes
                .get(&NodeId::from(peer.as_str()))
                .is_none_or(|node| node.state != NodeState::Dead)
        })
        .cloned()
        .collect()
}

/// Run one push-pull exchange with a random eligible peer.
///
/// Returns `Ok(None)` when no peer is eligible.
pub async fn gossip_round(
    coordinator: &ClusterCoordinator,
    transport: &dyn GossipTransport,
    peers: &[String],
) -> Result<Option<GossipRound>, ClusterError> {
    let eligible = candidates(coordinator, peers).await;
    let peer = {
        let mut rng = rand::rng();
        eligible.choose(&mut rng).cloned()
    };
    let Some(peer) = peer else {
        return Ok(None);
    };

    let nodes: Vec<Node> = coordinator.status().await.into_values().collect();
    let sent = nodes.len();
    let adopted_remotely = transport.push(&peer, nodes).await?;

    let remote = transport.pull(&peer).await?;
    let adopted_locally = coordinator.merge(remote).await;

    debug!(
        %peer,
        sent,
        adopted_remotely,
        adopted_locally,
        "gossip round complete"
    );
    Ok(Some(GossipRound {
        peer,
        sent,
        adopted_remotely,
        adopted_locally,
    }))
}

/// Handle to the running gossip task.
pub struct GossipHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl GossipHandle {
    /// Ask the gossip loop to stop after its current round.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    /// Check whether the background task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawn the periodic gossip loop.
///
/// Failed rounds are logged and retried on the next tick with a freshly
/// chosen peer.
pub fn start(
    coordinator: Arc<ClusterCoordinator>,
    transport: Arc<dyn GossipTransport>,
    config: GossipConfig,
) -> GossipHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(interval = ?config.interval, peers = config.peers.len(), "gossip started");

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match gossip_round(&coordinator, transport.as_ref(), &config.peers).await {
                        Ok(Some(_)) => {}
                        Ok(None) => debug!("no eligible gossip peer"),
                        Err(e) => warn!(error = %e, "gossip round failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("gossip shutting down");
                    break;
                }
            }
        }

        info!("gossip stopped");
    });

    GossipHandle { shutdown_tx, task }
}
