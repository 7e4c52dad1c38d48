//! confgate - control plane for sidecar configuration delivery

use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use confgate::{config::Args, server, AppState};

/// Buffered membership batches between the cluster watcher and the scheduler
const MEMBERSHIP_FEED_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("confgate={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  confgate - config delivery control plane");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Max candidates per agent: {}", args.scheduler_max_candidates);
    let (min_ttl, max_ttl) = args.session_ttl_bounds();
    info!("Session TTL bounds: {:?} - {:?}", min_ttl, max_ttl);
    let seeds = args.replica_seed_list();
    info!("Seed replicas: {}", seeds.len());
    for addr in &seeds {
        info!("  {}", addr);
    }
    info!("======================================");

    let state = Arc::new(AppState::new(args));

    // The cluster watcher publishes into this feed; seeds go through it first
    let (feed_tx, feed_rx) = mpsc::channel(MEMBERSHIP_FEED_BUFFER);
    let seed_events = state.seed_events()?;
    if !seed_events.is_empty() {
        feed_tx.send(seed_events).await?;
    }

    server::run(state, feed_rx).await?;

    drop(feed_tx);
    Ok(())
}
