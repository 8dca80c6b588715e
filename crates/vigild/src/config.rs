//! TOML configuration for the Vigil daemon.
//!
//! Every section is optional; missing values fall back to the defaults
//! below (1 s tick, 5 s suspect, 15 s dead, 100 vnodes per node).

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use vigil_cluster::{CoordinatorConfig, DetectorConfig, GossipConfig};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Coordinator identity and HTTP address.
    pub node: NodeSection,
    /// Failure detector timings.
    pub detector: DetectorSection,
    /// Hash ring settings.
    pub ring: RingSection,
    /// Gossip with peer coordinators.
    pub cluster: ClusterSection,
    /// In-process simulated nodes.
    pub simulation: SimulationSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// This coordinator's own node ID, reported by `/cluster/me`.
    pub id: String,
    /// Address for the HTTP API.
    pub listen_addr: String,
    /// Whether the coordinator heartbeats itself and so owns part of the ring.
    pub self_heartbeat: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: "127.0.0.1:8081".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            self_heartbeat: true,
        }
    }
}

/// `[detector]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    /// Milliseconds between detector ticks.
    pub tick_interval_ms: Option<u64>,
    /// Milliseconds of silence before a node is suspect.
    pub suspect_timeout_ms: Option<u64>,
    /// Milliseconds of silence before a node is dead.
    pub dead_timeout_ms: Option<u64>,
}

/// `[ring]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Virtual positions per node.
    pub vnodes_per_node: Option<u16>,
}

/// `[cluster]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Seed coordinators (`host:port` of their HTTP API) to gossip with.
    pub peers: Vec<String>,
    /// Milliseconds between gossip rounds.
    pub gossip_interval_ms: Option<u64>,
}

/// `[simulation]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Node IDs heartbeated from inside the daemon.
    pub nodes: Vec<String>,
    /// Milliseconds between simulated heartbeats.
    pub heartbeat_interval_ms: Option<u64>,
    /// Probability in `[0, 1]` that a simulated heartbeat is dropped.
    pub drop_probability: Option<f64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective detector tick interval (default 1 s).
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.detector.tick_interval_ms.unwrap_or(1_000))
    }

    /// Effective suspect timeout (default 5 s).
    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.detector.suspect_timeout_ms.unwrap_or(5_000))
    }

    /// Effective dead timeout (default 15 s).
    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.detector.dead_timeout_ms.unwrap_or(15_000))
    }

    /// Effective vnodes per node (default 100).
    pub fn vnodes_per_node(&self) -> u16 {
        self.ring.vnodes_per_node.unwrap_or(100)
    }

    /// Effective gossip interval (default 1 s).
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.gossip_interval_ms.unwrap_or(1_000))
    }

    /// Gossip settings derived from this config.
    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            interval: self.gossip_interval(),
            peers: self.cluster.peers.clone(),
        }
    }

    /// Effective simulated heartbeat interval (default 2 s).
    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation.heartbeat_interval_ms.unwrap_or(2_000))
    }

    /// Effective probability of dropping a simulated heartbeat (default 0).
    pub fn drop_probability(&self) -> f64 {
        self.simulation.drop_probability.unwrap_or(0.0)
    }

    /// Coordinator settings derived from this config.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            vnodes_per_node: self.vnodes_per_node(),
            detector: DetectorConfig {
                tick_interval: self.tick_interval(),
                suspect_timeout: self.suspect_timeout(),
                dead_timeout: self.dead_timeout(),
            },
        }
    }

    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.coordinator_config().validate()?;
        self.gossip_config().validate()?;

        if self.node.id.trim().is_empty() {
            anyhow::bail!("invalid configuration: node id must not be blank");
        }
        let p = self.drop_probability();
        if !(0.0..=1.0).contains(&p) {
            anyhow::bail!("invalid configuration: drop probability {p} is outside [0, 1]");
        }
        if !self.simulation.nodes.is_empty() && self.simulation_interval().is_zero() {
            anyhow::bail!("invalid configuration: simulated heartbeat interval must be positive");
        }
        Ok(())
    }
}
