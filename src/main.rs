//! # Scout: task scheduler and run tracker for agents
//!
//! Usage:
//!   scout                          # Scheduler + gateway (default port 8001)
//!   scout --port 9000              # Custom port
//!   scout --web-only               # Serve the API without firing schedules
//!   scout --scheduler-only         # Fire schedules without the HTTP server

mod runner;

use anyhow::Result;
use clap::Parser;
use scout_core::ScoutConfig;
use scout_scheduler::TaskService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "scout",
    version,
    about = "⏰ Scout: task scheduling, run tracking and live updates for agents"
)]
struct Cli {
    /// Config file (default: $SCOUT_CONFIG or ~/.scout/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway bind host
    #[arg(long)]
    host: Option<String>,

    /// Gateway port
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory; the SQLite file is kept here
    #[arg(long)]
    data_dir: Option<String>,

    /// Serve the API only, no tick loop
    #[arg(long, conflicts_with = "scheduler_only")]
    web_only: bool,

    /// Run the tick loop only, no HTTP server
    #[arg(long)]
    scheduler_only: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(cli: &Cli) -> Result<ScoutConfig> {
    let mut config = match &cli.config {
        Some(path) => ScoutConfig::load_from(path)?,
        None => ScoutConfig::load()?,
    };

    if let Some(host) = &cli.host {
        config.gateway.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.path = Path::new(&expand_path(dir))
            .join("scheduler.db")
            .to_string_lossy()
            .to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "scout=debug,scout_scheduler=debug,scout_gateway=debug,tower_http=debug"
    } else {
        "scout=info,scout_scheduler=info,scout_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let runner = runner::from_config(&config.runner)?;
    let service = Arc::new(TaskService::open(&config, runner)?);

    println!("⏰ Scout v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Storage:   {} ({})", config.storage.backend, config.storage.path);
    println!("   📋 Tasks:     {}", service.list_tasks().len());
    println!("   📅 Schedules: {}", service.list_schedules().len());
    if !cli.scheduler_only {
        println!(
            "   🌐 API:       http://{}:{}/api/tasks",
            config.gateway.host, config.gateway.port
        );
    }
    println!();

    let tick = Duration::from_millis(config.scheduler.tick_interval_ms.max(1));
    let background = if cli.web_only {
        tracing::info!("Tick loop disabled (--web-only), retrying failed writes only");
        service.spawn_journal_flush(tick)
    } else {
        service.spawn_scheduler(tick)
    };

    if cli.scheduler_only {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
    } else {
        tokio::select! {
            result = scout_gateway::start(&config.gateway, service.clone()) => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
        }
    }

    background.abort();
    let stale = service.engine().store().journal().flush_pending();
    if stale > 0 {
        tracing::warn!("⚠️ {stale} write(s) could not be persisted before exit");
    }
    Ok(())
}
