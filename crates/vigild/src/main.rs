//! `vigild`: the Vigil cluster coordinator daemon.
//!
//! Binary entrypoint that wires the node registry, failure detector and
//! hash ring into a running coordinator behind an HTTP API.
//!
//! # Usage
//!
//! ```text
//! vigild start                                   # start the coordinator
//! vigild start -c vigil.toml                     # start with a config file
//! vigild start -l 127.0.0.1:9080 -n 10.0.0.1:8081  # second instance
//! vigild start -s cpu:8000 -s cpu:8001           # simulate two nodes
//! vigild start -p 10.0.0.2:8080                  # gossip with a peer
//! vigild check                                   # validate and print config
//! vigild route user-42 --node a --node b         # offline key lookup
//! ```

mod config;
mod simulate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use vigil_cluster::{ClusterCoordinator, SystemClock, detector, gossip};
use vigil_http::{ApiServer, HttpGossip, REQUEST_TIMEOUT};
use vigil_ring::Ring;
use vigil_types::NodeId;

use config::CliConfig;
use simulate::Simulation;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "vigild", version, about = "Vigil cluster coordinator daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator.
    Start {
        /// Override HTTP listen address (e.g. "127.0.0.1:9080").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,

        /// Override this coordinator's node ID.
        #[arg(short, long, env = "VIGIL_NODE_ID")]
        node_id: Option<String>,

        /// Peer coordinator(s) to gossip with (`host:port` of their API).
        /// Can be specified multiple times.
        #[arg(short, long)]
        peer: Vec<String>,

        /// Node(s) to simulate in-process. Can be specified multiple times.
        #[arg(short, long)]
        simulate: Vec<String>,

        /// Do not heartbeat the coordinator's own node ID.
        #[arg(long)]
        no_self_heartbeat: bool,
    },

    /// Validate the configuration and print the effective settings.
    Check,

    /// Print which node a key routes to on a ring built from `--node` IDs.
    Route {
        /// Key to look up.
        key: String,

        /// Node ID on the ring. Can be specified multiple times.
        #[arg(short, long = "node", required = true)]
        nodes: Vec<String>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            listen_addr,
            node_id,
            peer,
            simulate,
            no_self_heartbeat,
        } => {
            // CLI args override config file values.
            if let Some(addr) = listen_addr {
                config.node.listen_addr = addr;
            }
            if let Some(id) = node_id {
                config.node.id = id;
            }
            // CLI peers replace config peers.
            if !peer.is_empty() {
                config.cluster.peers = peer;
            }
            if !simulate.is_empty() {
                config.simulation.nodes = simulate;
            }
            if no_self_heartbeat {
                config.node.self_heartbeat = false;
            }
            cmd_start(config).await
        }
        Commands::Check => cmd_check(&config),
        Commands::Route { key, nodes } => cmd_route(&config, &key, nodes),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// vigild start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    config.validate()?;

    info!("starting vigild");
    info!(
        node_id = %config.node.id,
        addr = %config.node.listen_addr,
        tick = ?config.tick_interval(),
        suspect_after = ?config.suspect_timeout(),
        dead_after = ?config.dead_timeout(),
        vnodes = config.vnodes_per_node(),
        "coordinator configuration"
    );

    let local_id = NodeId::from(config.node.id.clone());
    let coordinator = ClusterCoordinator::new(
        local_id.clone(),
        config.coordinator_config(),
        Arc::new(SystemClock),
    )
    .context("failed to create coordinator")?;

    let detector = detector::start(coordinator.clone());

    let gossip = if config.cluster.peers.is_empty() {
        None
    } else {
        let transport =
            HttpGossip::new(REQUEST_TIMEOUT).context("failed to build gossip client")?;
        info!(peers = ?config.cluster.peers, "gossiping with peers");
        Some(gossip::start(
            coordinator.clone(),
            Arc::new(transport),
            config.gossip_config(),
        ))
    };

    let (self_tx, self_rx) = watch::channel(false);
    let self_heartbeat = config.node.self_heartbeat.then(|| {
        // Heartbeat at a third of the suspect timeout so the local node never
        // looks suspect under normal scheduling.
        let interval = config.suspect_timeout() / 3;
        tokio::spawn(self_heartbeat_loop(
            coordinator.clone(),
            local_id,
            interval,
            self_rx,
        ))
    });

    let simulated: Vec<NodeId> = config
        .simulation
        .nodes
        .iter()
        .map(|id| NodeId::from(id.as_str()))
        .collect();
    let simulation = Simulation::start(
        coordinator.clone(),
        simulated,
        config.simulation_interval(),
        config.drop_probability(),
    );
    if !simulation.is_empty() {
        info!(nodes = simulation.len(), "heartbeat simulation running");
    }

    info!(addr = %config.node.listen_addr, "cluster API ready");
    ApiServer::new(coordinator)
        .serve_with_shutdown(&config.node.listen_addr, shutdown_signal())
        .await
        .context("cluster API failed")?;

    info!("stopping background tasks");
    let _ = self_tx.send(true);
    if let Some(task) = self_heartbeat {
        let _ = task.await;
    }
    simulation.shutdown().await;
    if let Some(gossip) = gossip {
        gossip.shutdown().await;
    }
    detector.shutdown().await;

    info!("vigild stopped");
    Ok(())
}

async fn self_heartbeat_loop(
    coordinator: Arc<ClusterCoordinator>,
    node_id: NodeId,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                coordinator.record_heartbeat(node_id.clone()).await;
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Resolve once Ctrl-C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "failed to listen for ctrl-c, serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// -----------------------------------------------------------------------
// vigild check
// -----------------------------------------------------------------------

fn cmd_check(config: &CliConfig) -> Result<()> {
    config.validate()?;

    println!("Configuration OK");
    println!("  node id:         {}", config.node.id);
    println!("  listen addr:     {}", config.node.listen_addr);
    println!("  self heartbeat:  {}", config.node.self_heartbeat);
    println!("  tick interval:   {:?}", config.tick_interval());
    println!("  suspect timeout: {:?}", config.suspect_timeout());
    println!("  dead timeout:    {:?}", config.dead_timeout());
    println!("  vnodes per node: {}", config.vnodes_per_node());
    if config.cluster.peers.is_empty() {
        println!("  gossip peers:    none");
    } else {
        println!(
            "  gossip peers:    {} (every {:?})",
            config.cluster.peers.join(", "),
            config.gossip_interval(),
        );
    }

    if config.simulation.nodes.is_empty() {
        println!("  simulated nodes: none");
    } else {
        println!(
            "  simulated nodes: {} (every {:?}, drop p={})",
            config.simulation.nodes.join(", "),
            config.simulation_interval(),
            config.drop_probability(),
        );
    }

    Ok(())
}

// -----------------------------------------------------------------------
// vigild route
// -----------------------------------------------------------------------

fn cmd_route(config: &CliConfig, key: &str, nodes: Vec<String>) -> Result<()> {
    config.validate()?;

    let ring = Ring::build(nodes.into_iter().map(NodeId::from), config.vnodes_per_node());
    let owner = ring
        .owner(key)
        .ok_or_else(|| anyhow::anyhow!("no available node"))?;

    println!("Key '{key}' is assigned to node: {owner}");
    Ok(())
}
