//! In-process heartbeat sources.
//!
//! Each simulated node is a task that heartbeats the coordinator on a fixed
//! interval. A heartbeat is skipped with probability `drop_probability`,
//! which lets a single daemon demonstrate nodes drifting to SUSPECT or DEAD
//! without real network peers.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vigil_cluster::ClusterCoordinator;
use vigil_types::NodeId;

/// Running set of simulated heartbeat tasks.
pub struct Simulation {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Spawn one heartbeat task per entry in `nodes`.
    pub fn start(
        coordinator: Arc<ClusterCoordinator>,
        nodes: Vec<NodeId>,
        interval: Duration,
        drop_probability: f64,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = nodes
            .into_iter()
            .map(|node_id| {
                info!(%node_id, ?interval, drop_probability, "simulating node");
                tokio::spawn(run_node(
                    coordinator.clone(),
                    node_id,
                    interval,
                    drop_probability,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        Self { shutdown_tx, tasks }
    }

    /// Number of simulated nodes.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no node is being simulated.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn run_node(
    coordinator: Arc<ClusterCoordinator>,
    node_id: NodeId,
    interval: Duration,
    drop_probability: f64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let dropped = drop_probability > 0.0 && rand::rng().random_bool(drop_probability);
                if dropped {
                    debug!(%node_id, "simulated heartbeat dropped");
                    continue;
                }
                coordinator.record_heartbeat(node_id.clone()).await;
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}
