//! Command-line interface for spoolsync.
//!
//! Provides commands for running the sync daemon, inspecting what a spool
//! would resolve to, and showing the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::adapters::{InventoryApi, MoonrakerClient, MoonrakerEvents, SpoolmanClient};
use crate::config::{load_config, ResolvedConfig};
use crate::core::{fetch_record, scripts_for, EventListener, Reconciler, VariableWriter};
use crate::domain::{ResolvedSchema, SpoolId};

/// Channel capacity between the bus, the listener and the reconciler
const CHANNEL_CAPACITY: usize = 64;

/// spoolsync - Keep Klipper macro variables in sync with the active Spoolman spool
#[derive(Parser, Debug)]
#[command(name = "spoolsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .spoolsync/config.yaml discovery)
    #[arg(short, long, global = true, env = "SPOOLSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync engine until interrupted
    Run,

    /// Fetch a spool and print the variables it resolves to
    Show {
        /// Spool ID in Spoolman
        spool_id: u64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Run => run_engine(config).await,
            Commands::Show { spool_id } => show_spool(&config, SpoolId(spool_id)).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Wire the bus, listener and reconciler together and run until Ctrl-C
async fn run_engine(config: ResolvedConfig) -> Result<()> {
    info!(
        moonraker = %config.moonraker_url,
        spoolman = %config.spoolman_url,
        macro_name = %config.macro_name,
        "Starting spoolsync"
    );

    let moonraker = MoonrakerClient::new(&config.moonraker_url, config.moonraker_api_key.clone());
    let spoolman = SpoolmanClient::new(&config.spoolman_url);

    if let Err(e) = spoolman.health_check().await {
        warn!(error = %e, "Spoolman is not reachable yet; fetches will retry");
    }

    let (bus_tx, bus_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let bus = MoonrakerEvents::new(moonraker.websocket_url()).spawn(bus_tx);

    let listener = EventListener::new(Arc::new(moonraker.clone()), config.retry.clone());
    let listener_task = tokio::spawn(listener.run(bus_rx, event_tx));

    let writer = VariableWriter::new(Arc::new(moonraker), config.macro_name.clone())
        .with_timeout(config.write_timeout());
    let reconciler = Reconciler::new(Arc::new(spoolman), writer, config.retry.clone());
    let mut reconciler_task = tokio::spawn(reconciler.run(event_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
        result = &mut reconciler_task => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task ended unexpectedly");
            }
        }
    }

    // Stopping the bus closes the listener, which closes the reconciler's
    // event stream and lets outstanding fetches drain.
    bus.stop().await;
    let _ = listener_task.await;
    if !reconciler_task.is_finished() {
        if let Ok(reconciler) = reconciler_task.await {
            info!(
                last_applied_sequence = reconciler.state().last_applied_sequence,
                "Engine stopped"
            );
        }
    }

    Ok(())
}

/// Fetch one spool and print the schema and scripts it produces
async fn show_spool(config: &ResolvedConfig, spool_id: SpoolId) -> Result<()> {
    let spoolman = SpoolmanClient::new(&config.spoolman_url);

    let (result, attempts) = fetch_record(&spoolman, &config.retry, spool_id).await;
    let record = result.with_context(|| {
        format!("Failed to fetch spool {} after {} attempts", spool_id, attempts)
    })?;

    if record.is_none() {
        eprintln!("[Spool {} not found - variables would be cleared]", spool_id);
    }

    let schema = ResolvedSchema::resolve(record.as_ref());
    println!("{}", serde_json::to_string_pretty(&schema)?);
    println!();
    for script in scripts_for(&config.macro_name, &schema) {
        println!("{}", script);
    }

    Ok(())
}

/// Print the resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("spoolsync configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Endpoints:");
    println!("  Moonraker: {}", config.moonraker_url);
    println!(
        "  API key:   {}",
        if config.moonraker_api_key.is_some() { "(set)" } else { "(none)" }
    );
    println!("  Spoolman:  {}", config.spoolman_url);
    println!();
    println!("Target macro:  {}", config.macro_name);
    println!("Write timeout: {}ms", config.write_timeout_ms);
    println!();
    println!("Retry policy:");
    println!("  Max attempts:    {}", config.retry.max_attempts);
    println!("  Initial delay:   {}ms", config.retry.initial_delay_ms);
    println!("  Max delay:       {}ms", config.retry.max_delay_ms);
    println!("  Multiplier:      {}", config.retry.backoff_multiplier);
    println!("  Jitter:          {}", config.retry.jitter);
    println!("  Attempt timeout: {}ms", config.retry.attempt_timeout_ms);

    Ok(())
}
