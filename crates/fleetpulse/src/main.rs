//! `fleetpulse` - CLI for the fleet tracking engine
//!
//! This binary runs the tracking engine as a foreground process and provides
//! inspection commands for the local snapshot store and configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use fleetpulse::cli::{Cli, Command, ConfigCommand, RunCommand, StatusCommand};
use fleetpulse::engine::EngineOptions;
use fleetpulse::feed::ChangeFeedSource;
use fleetpulse::{
    init_logging, ChannelFeed, Config, HttpBackend, LocationStore, SnapshotStore, TrackingEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Run(run_cmd) => run_engine(&config, &run_cmd).await,
        Command::Status(status_cmd) => print_status(&config, &status_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn run_engine(config: &Config, cmd: &RunCommand) -> anyhow::Result<()> {
    let snapshot = SnapshotStore::open(config.snapshot_path())
        .context("failed to open snapshot store")?;
    let store = LocationStore::open(snapshot, config.tracking.max_history_per_vehicle)
        .context("failed to rehydrate location store")?;

    let backend = Arc::new(
        HttpBackend::new(
            config.backend.base_url.clone(),
            config.backend.api_token.clone(),
            config.request_timeout(),
        )
        .context("failed to build backend client")?,
    );

    let engine = TrackingEngine::new(store, backend, EngineOptions::from_config(config));

    if !cmd.no_seed {
        engine.load_vehicles_from_backend().await;
    }

    // The in-process feed is the attachment point for a realtime bridge;
    // scans and direct updates run regardless of whether anything pushes.
    let feed = Arc::new(ChannelFeed::new());
    engine
        .start(feed as Arc<dyn ChangeFeedSource>)
        .await
        .context("failed to start engine tasks")?;

    tracing::info!("engine running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    engine.dispose().await;
    tracing::info!("engine stopped");
    Ok(())
}

fn print_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let snapshot = SnapshotStore::open(config.snapshot_path())
        .context("failed to open snapshot store")?;
    let stats = snapshot.stats().context("failed to read snapshot stats")?;

    if cmd.json {
        let status = serde_json::json!({
            "snapshot_path": config.snapshot_path(),
            "vehicles": stats.vehicles,
            "history_entries": stats.history_entries,
            "tracked": stats.tracked,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("fleetpulse status");
        println!("-----------------");
        println!("Snapshot:        {}", config.snapshot_path().display());
        println!("Vehicles:        {}", stats.vehicles);
        println!("History entries: {}", stats.history_entries);
        println!("Tracked:         {}", stats.tracked);
        println!("Database size:   {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Snapshot path:        {}", config.snapshot_path().display());
                println!();
                println!("[Backend]");
                println!("  Base URL:             {}", config.backend.base_url);
                println!(
                    "  API token:            {}",
                    if config.backend.api_token.is_some() {
                        "set"
                    } else {
                        "not set"
                    }
                );
                println!(
                    "  Request timeout:      {}s",
                    config.backend.request_timeout_secs
                );
                println!();
                println!("[Tracking]");
                println!(
                    "  History per vehicle:  {}",
                    config.tracking.max_history_per_vehicle
                );
                println!(
                    "  Maintenance scan:     every {}s",
                    config.tracking.maintenance_interval_secs
                );
                println!(
                    "  Safety scan:          every {}s",
                    config.tracking.safety_interval_secs
                );
                println!(
                    "  Dedupe window:        {}",
                    if config.tracking.dedupe_window_secs == 0 {
                        "disabled".to_string()
                    } else {
                        format!("{}s", config.tracking.dedupe_window_secs)
                    }
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
