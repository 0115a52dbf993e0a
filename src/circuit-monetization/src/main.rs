//! Circuit Runners monetization engine host.
//!
//! Replays recorded game events and prints the resulting dashboard, or runs
//! the periodic jobs until interrupted.

mod replay;

use anyhow::Context;
use chrono::{Duration, Utc};
use circuit_core::config::AppConfig;
use circuit_engine::{Catalog, LoggingEconomy, MonetizationEngine, Scheduler};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "circuit-monetization")]
#[command(about = "Player segmentation and dynamic pricing for Circuit Runners")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "CIRCUIT_MONETIZATION_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog with segmentation rules, experiments and product prices
    #[arg(long, env = "CIRCUIT_MONETIZATION_CATALOG")]
    catalog: Option<PathBuf>,

    /// Replay newline-delimited game events and print the dashboard
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Revenue ledger capacity (overrides config)
    #[arg(long)]
    ledger_capacity: Option<usize>,

    /// Serve Prometheus metrics (overrides config)
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "circuit_monetization=info,circuit_engine=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(capacity) = cli.ledger_capacity {
        config.ledger.capacity = capacity;
    }
    if cli.metrics {
        config.metrics.enabled = true;
    }

    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path).context("loading catalog")?,
        None => Catalog::default(),
    };

    info!(
        ledger_capacity = config.ledger.capacity,
        metrics = config.metrics.enabled,
        tick_ms = config.scheduler.tick_interval_ms,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let addr = SocketAddr::new(config.metrics.host.parse()?, config.metrics.port);
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            error!(error = %e, "Failed to start metrics exporter");
        } else {
            info!(port = config.metrics.port, "Metrics exporter started");
        }
    }

    let tick = std::time::Duration::from_millis(config.scheduler.tick_interval_ms);
    let engine = Arc::new(MonetizationEngine::from_config(
        config,
        catalog,
        Arc::new(LoggingEconomy),
    )?);

    if let Some(path) = cli.replay {
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let summary = replay::run(&engine, BufReader::new(file))?;
        let now = summary.last_timestamp.unwrap_or_else(Utc::now);
        engine.sweep_experiments(now);
        for change in engine.drain_segment_events() {
            info!(
                player_id = %change.player_id,
                from = %change.previous,
                to = %change.current,
                "Segment changed"
            );
        }
        info!(applied = summary.applied, rejected = summary.rejected, "Replay finished");
        let dashboard = engine.dashboard(now);
        println!("{}", serde_json::to_string_pretty(&dashboard)?);
        return Ok(());
    }

    let scheduler = Arc::new(Scheduler::new());
    let start = Utc::now();
    engine.schedule(&scheduler, start);
    let drain_engine = Arc::clone(&engine);
    scheduler.register("segment_events", Duration::seconds(1), start, move |_| {
        for change in drain_engine.drain_segment_events() {
            info!(
                player_id = %change.player_id,
                from = %change.previous,
                to = %change.current,
                confidence = change.confidence,
                "Segment changed"
            );
        }
    });
    let handle = scheduler.spawn(tick);

    info!("Circuit monetization engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    info!("Shutdown complete");
    Ok(())
}
