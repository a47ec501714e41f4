//! fleetwork daemon: loads config, restores agents and runs until ctrl-c.

use std::path::PathBuf;

use anyhow::{Context, Result};
use fw_core::config::Config;
use fw_daemon::daemon::Daemon;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Overrides the default `~/.fleetwork/config.toml`.
const CONFIG_ENV: &str = "FLEETWORK_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    fw_telemetry::logging::init(
        &config.general.service_name,
        &config.general.log_level,
        config.general.log_json,
    );
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        agents = config.agents.len(),
        "fleetwork daemon starting"
    );

    let daemon = Daemon::new(config).context("failed to build daemon")?;
    let shutdown = daemon.shutdown_handle();

    // Wire ctrl-c to trigger graceful shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    if let Err(e) = daemon.run().await {
        tracing::error!(error = %e, "daemon execution failed");
        return Err(e);
    }
    Ok(())
}

fn load_config() -> Result<Config> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            Config::load_from(&path).with_context(|| format!("failed to load {}", path.display()))
        }
        None => Config::load().with_context(|| {
            format!("failed to load {}", Config::default_path().display())
        }),
    }
}
