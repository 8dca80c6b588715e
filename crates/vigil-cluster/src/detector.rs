//! Timeout-based failure detection.
//!
//! A node's state is derived from the time elapsed since its last heartbeat:
//!
//! - `elapsed >= suspect_timeout` → [`NodeState::Suspect`]
//! - `elapsed >= dead_timeout` → [`NodeState::Dead`]
//!
//! The detector only ever moves a node forward (Alive → Suspect → Dead).
//! Recovery happens in the registry when a heartbeat arrives. [`start`]
//! spawns the periodic tick that drives [`ClusterCoordinator::tick`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vigil_types::{NodeId, NodeState};

use crate::coordinator::ClusterCoordinator;
use crate::error::ClusterError;
use crate::registry::NodeRegistry;

/// Timing configuration for the [`FailureDetector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Interval between detector ticks.
    pub tick_interval: Duration,
    /// Silence after which a node becomes suspect.
    pub suspect_timeout: Duration,
    /// Silence after which a node is declared dead.
    pub dead_timeout: Duration,
}

impl DetectorConfig {
    /// Create a config suitable for fast test execution.
    pub fn test_config() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            suspect_timeout: Duration::from_millis(50),
            dead_timeout: Duration::from_millis(150),
        }
    }

    /// Create a default config for production use.
    pub fn default_config() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            suspect_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(15),
        }
    }

    /// Reject timings the detector cannot work with.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.tick_interval.is_zero() {
            return Err(ClusterError::InvalidConfiguration(
                "tick interval must be positive".to_string(),
            ));
        }
        if self.suspect_timeout.is_zero() {
            return Err(ClusterError::InvalidConfiguration(
                "suspect timeout must be positive".to_string(),
            ));
        }
        if self.suspect_timeout >= self.dead_timeout {
            return Err(ClusterError::InvalidConfiguration(format!(
                "suspect timeout ({:?}) must be shorter than dead timeout ({:?})",
                self.suspect_timeout, self.dead_timeout
            )));
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// A state transition decided by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// The node that changed.
    pub node_id: NodeId,
    /// State before the tick.
    pub from: NodeState,
    /// State after the tick.
    pub to: NodeState,
}

/// The state implied by `elapsed` silence, ignoring the current state.
///
/// Boundaries are inclusive: a node silent for exactly `suspect_timeout`
/// is suspect.
pub fn evaluate_state(elapsed: Duration, config: &DetectorConfig) -> NodeState {
    if elapsed >= config.dead_timeout {
        NodeState::Dead
    } else if elapsed >= config.suspect_timeout {
        NodeState::Suspect
    } else {
        NodeState::Alive
    }
}

/// Ordering used to only ever move a node forward.
fn severity(state: NodeState) -> u8 {
    match state {
        NodeState::Alive => 0,
        NodeState::Suspect => 1,
        NodeState::Dead => 2,
    }
}

/// Periodic evaluator that advances node states from elapsed time.
#[derive(Debug, Clone)]
pub struct FailureDetector {
    config: DetectorConfig,
}

impl FailureDetector {
    /// Create a detector with the given timings.
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Return the detector's timing configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Next state for a node in `current` that has been silent for `elapsed`.
    ///
    /// Returns `None` when the node stays where it is. Dead nodes never move.
    pub fn next_state(&self, current: NodeState, elapsed: Duration) -> Option<NodeState> {
        let derived = evaluate_state(elapsed, &self.config);
        (severity(derived) > severity(current)).then_some(derived)
    }

    /// Scan the registry at `now_ms` and apply every due transition.
    pub async fn scan(&self, registry: &NodeRegistry, now_ms: u64) -> Vec<StateChange> {
        let changes = registry
            .transition_with(|node| {
                let elapsed = Duration::from_millis(now_ms.saturating_sub(node.timestamp));
                self.next_state(node.state, elapsed)
            })
            .await;

        debug!(now_ms, changed = changes.len(), "failure detector scan");
        changes
    }
}

/// Handle to the running detector task.
pub struct DetectorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl DetectorHandle {
    /// Ask the detector loop to stop after its current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    /// Abort the background task.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Check whether the background task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawn the periodic detector tick for `coordinator`.
///
/// Ticks every `tick_interval` from the coordinator's config until the
/// returned handle is stopped.
pub fn start(coordinator: Arc<ClusterCoordinator>) -> DetectorHandle {
    let interval = coordinator.config().detector.tick_interval;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(?interval, "failure detector started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.tick().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("failure detector shutting down");
                    break;
                }
            }
        }

        info!("failure detector stopped");
    });

    DetectorHandle { shutdown_tx, task }
}
