//! NetPulse link watchdog.
//!
//! Probes the default gateway (or a fixed fallback) on a fixed interval and
//! walks the wireless link through reassociate, interface bounce and service
//! restart when probes keep failing.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{error, info};

mod commands;
mod config;
mod engine;
mod models;
mod probe;

use crate::commands::SystemRunner;
use crate::config::WatchdogConfig;
use crate::engine::Watchdog;
use crate::probe::IcmpProber;

#[derive(Parser, Debug)]
#[command(name = "netpulse-watchdog", version, about)]
struct Cli {
    /// JSON config file (defaults to ./config.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wireless interface to supervise
    #[arg(short, long)]
    interface: Option<String>,

    /// Seconds between probes
    #[arg(long)]
    interval: Option<u64>,

    /// Probe target used when no default gateway is routed
    #[arg(long)]
    fallback: Option<String>,
}

impl Cli {
    fn apply(self, mut config: WatchdogConfig) -> WatchdogConfig {
        if let Some(interface) = self.interface {
            config.interface = interface;
        }
        if let Some(interval) = self.interval {
            config.check_interval = interval;
        }
        if let Some(fallback) = self.fallback {
            config.fallback_target = fallback;
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = WatchdogConfig::load(cli.config.as_deref())?;
    let config = cli.apply(config);
    config.validate().context("Invalid configuration")?;

    let prober = IcmpProber::new()?;
    let watchdog = Watchdog::new(&config, SystemRunner::new(), prober);

    watchdog.run(shutdown_signal()).await;
    info!("Shutdown signal received. Stopping link watchdog...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
