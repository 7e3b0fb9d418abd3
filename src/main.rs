//! blockwatch daemon.
//!
//! Loads configuration, builds the watch context, and runs the scan loop and
//! the status manager until interrupted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use blockwatch::{
    dispatch::EventDispatcher, BlockRangeScanner, Config, NetworkStatusModule, RawEventModule,
    StatusCooldownManager, WatchContext,
};

/// On-chain event watcher and notifier.
#[derive(Debug, Parser)]
#[command(name = "blockwatch", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let base_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let ctx = WatchContext::initialize(config, &base_dir).context("initializing watch context")?;

    let dispatcher = EventDispatcher::from_config(&ctx.config, vec![Box::new(RawEventModule)])
        .context("building dispatcher")?;
    let footer = ctx.footer(dispatcher.enabled_module_count());
    let scanner = BlockRangeScanner::new(&ctx, dispatcher);
    let status = StatusCooldownManager::from_config(
        &ctx.config,
        vec![Box::new(NetworkStatusModule)],
        ctx.execution.clone(),
        ctx.consensus.clone(),
        ctx.sink.clone(),
        footer,
    )
    .context("building status manager")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let status_task = tokio::spawn(status.run(shutdown_rx.clone()));
    let mut scanner_task = tokio::spawn(scanner.run(shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
        // The scanner only returns on its own for fatal errors.
        result = &mut scanner_task => {
            let _ = shutdown_tx.send(true);
            let _ = status_task.await;
            let run_result = result.context("scanner task panicked")?;
            if let Err(e) = &run_result {
                error!(error = %e, "scanner halted");
            }
            return Ok(run_result?);
        }
    }

    // Graceful path: let in-flight work finish before exiting.
    let run_result = scanner_task.await.context("scanner task panicked")?;
    let _ = status_task.await;
    run_result?;
    Ok(())
}
