//! logwarden-daemon entry point.
//!
//! Loads the configuration, starts the monitor supervisor and runs
//! until a shutdown signal arrives. SIGHUP reloads the configuration
//! without restarting the daemon.

mod cli;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use logwarden_core::config::{GeneralConfig, MonitorConfig};
use logwarden_monitor::MonitorSupervisor;

use crate::cli::DaemonCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    if cli.print_default_config {
        print!("{}", toml::to_string_pretty(&MonitorConfig::default())?);
        return Ok(());
    }

    if cli.validate {
        MonitorConfig::load(&cli.config).await?;
        println!("configuration file {} is valid", cli.config.display());
        return Ok(());
    }

    let (mut config, load_warning) = load_or_default(&cli.config).await;
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }

    init_tracing(&config.general)?;
    if let Some(message) = load_warning {
        warn!("{message}");
    }

    info!(
        config = %cli.config.display(),
        sources = config.sources.len(),
        rules = config.rules.len(),
        "logwarden-daemon starting"
    );

    let mut supervisor = MonitorSupervisor::builder()
        .config(config)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build monitor supervisor: {e}"))?;
    supervisor
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start monitor supervisor: {e}"))?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    info!("logwarden-daemon running");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("termination signal received, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!(config = %cli.config.display(), "reload signal received");
                reload(&mut supervisor, &cli.config).await;
            }
        }
    }

    supervisor.stop().await;
    info!("logwarden-daemon shut down");
    Ok(())
}

/// Install the global tracing subscriber.
///
/// The `RUST_LOG` environment variable, when set, takes precedence over
/// the configured level. Must run before any tracing macro fires.
fn init_tracing(general: &GeneralConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&general.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match general.log_format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        other => anyhow::bail!("unsupported log format '{other}', expected 'json' or 'pretty'"),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Load the configuration file, falling back to defaults.
///
/// A missing or unparsable file is not fatal: the daemon starts with an
/// empty default configuration and idles until a valid one is supplied
/// via SIGHUP. The warning is returned so it can be logged after the
/// tracing subscriber is initialized.
async fn load_or_default(path: &Path) -> (MonitorConfig, Option<String>) {
    match MonitorConfig::load(path).await {
        Ok(config) => (config, None),
        Err(e) => (
            MonitorConfig::default(),
            Some(format!(
                "could not load configuration from {}: {e}; starting with defaults",
                path.display()
            )),
        ),
    }
}

/// Reload the configuration and reconcile the supervisor.
///
/// Any failure keeps the previous configuration running.
async fn reload(supervisor: &mut MonitorSupervisor, path: &Path) {
    let config = match MonitorConfig::load(path).await {
        Ok(config) => config,
        Err(e) => {
            error!(
                config = %path.display(),
                error = %e,
                "failed to load configuration, keeping the previous one"
            );
            return;
        }
    };
    match supervisor.reconcile(config).await {
        Ok(()) => info!("configuration reloaded"),
        Err(e) => error!(error = %e, "reconcile failed, keeping the previous configuration"),
    }
}
