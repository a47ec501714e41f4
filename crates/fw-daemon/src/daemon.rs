use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fw_agents::persistence::{JsonFileStore, PersistenceStore};
use fw_agents::registry::AgentRegistry;
use fw_core::components::ComponentRegistry;
use fw_core::config::Config;
use fw_telemetry::metrics::MetricsCollector;
use tracing::{error, info, warn};

use crate::builtins;
use crate::health::HealthMonitor;
use crate::shutdown::ShutdownSignal;

/// Interval of the built-in `heartbeat` skill.
const HEARTBEAT_INTERVAL_SECS: f64 = 30.0;

/// What `boot` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Agents recreated from the snapshot store.
    pub restored: usize,
    /// Restored agents that were active and were started again.
    pub restarted: usize,
    /// Agents created from `[[agents]]` entries.
    pub created: usize,
    /// Created agents started because of `autostart`.
    pub autostarted: usize,
}

/// The fleetwork daemon.
///
/// Owns the agent registry and runs the snapshot timer and the health
/// monitor until the `ShutdownSignal` fires, then stops every agent and
/// writes a final snapshot.
pub struct Daemon {
    config: Config,
    registry: AgentRegistry,
    metrics: Arc<MetricsCollector>,
    health: HealthMonitor,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Build a daemon whose store is the configured snapshot file, if
    /// persistence is enabled.
    pub fn new(config: Config) -> Result<Self> {
        let store: Option<Arc<dyn PersistenceStore>> = if config.persistence.enabled {
            let path = config.persistence.resolved_path();
            info!(path = %path.display(), "snapshot persistence enabled");
            Some(Arc::new(JsonFileStore::new(path)))
        } else {
            None
        };
        Self::with_store(config, store)
    }

    /// Build a daemon around an explicit store (or none).
    pub fn with_store(config: Config, store: Option<Arc<dyn PersistenceStore>>) -> Result<Self> {
        let skills = builtins::skills(HEARTBEAT_INTERVAL_SECS).context("failed to register built-in skills")?;
        let metrics = Arc::new(MetricsCollector::new());
        let mut builder = AgentRegistry::builder(config.runtime.clone())
            .abilities(Arc::new(builtins::abilities()))
            .skills(Arc::new(skills))
            .components(Arc::new(ComponentRegistry::with_builtins(config.components.clone())))
            .metrics(metrics.clone());
        if let Some(store) = store {
            builder = builder.persistence(store);
        }
        let registry = builder.build().context("invalid runtime configuration")?;
        let health = HealthMonitor::new(Duration::from_secs(config.health.stale_after_secs));

        Ok(Self {
            config,
            registry,
            metrics,
            health,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    // ------------------------------------------------------------------
    // Boot
    // ------------------------------------------------------------------

    /// Restore from the store, restart what was active, then create the
    /// configured agents whose names were not restored.
    ///
    /// Individual agents that fail to start are logged and skipped.
    pub async fn boot(&self) -> Result<BootReport> {
        let mut report = BootReport::default();

        let to_restart = self
            .registry
            .load_and_restore()
            .await
            .context("failed to restore agents from snapshot")?;
        report.restored = self.registry.len().await;
        for id in to_restart {
            match self.registry.start(id).await {
                Ok(_) => report.restarted += 1,
                Err(e) => warn!(agent_id = %id, error = %e, "failed to restart restored agent"),
            }
        }

        let existing: HashSet<String> = self
            .registry
            .list(None, None)
            .await
            .into_iter()
            .map(|a| a.name)
            .collect();
        for agent_config in &self.config.agents {
            if existing.contains(&agent_config.name) {
                continue;
            }
            let autostart = agent_config.autostart;
            let agent = match self.registry.create(agent_config.clone()).await {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(name = %agent_config.name, error = %e, "failed to create configured agent");
                    continue;
                }
            };
            report.created += 1;
            if autostart {
                match self.registry.start(agent.id()).await {
                    Ok(_) => report.autostarted += 1,
                    Err(e) => warn!(agent_id = %agent.id(), error = %e, "autostart failed"),
                }
            }
        }

        info!(
            restored = report.restored,
            restarted = report.restarted,
            created = report.created,
            autostarted = report.autostarted,
            "daemon boot complete"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------

    /// Boot, run the background loops until shutdown, then drain.
    pub async fn run(&self) -> Result<()> {
        self.boot().await?;
        self.run_loops().await;
        self.drain().await
    }

    async fn run_loops(&self) {
        let snapshot_every = self
            .registry
            .has_store()
            .then(|| Duration::from_secs(self.config.persistence.snapshot_interval_secs));
        let health_every = self
            .config
            .health
            .enabled
            .then(|| Duration::from_secs(self.config.health.poll_interval_secs.max(1)));

        info!(
            snapshot_secs = snapshot_every.map(|d| d.as_secs()),
            health_secs = health_every.map(|d| d.as_secs()),
            "daemon starting event loop"
        );

        // A disabled loop ticks once a day and does nothing.
        let idle = Duration::from_secs(24 * 60 * 60);
        let mut snapshot_interval = tokio::time::interval(snapshot_every.unwrap_or(idle));
        let mut health_interval = tokio::time::interval(health_every.unwrap_or(idle));
        // Consume the first immediate tick so loops don't fire at t=0.
        snapshot_interval.tick().await;
        health_interval.tick().await;

        loop {
            tokio::select! {
                _ = snapshot_interval.tick(), if snapshot_every.is_some() => {
                    if let Err(e) = self.registry.save_snapshot().await {
                        error!(error = %e, "periodic snapshot failed");
                    }
                }
                _ = health_interval.tick(), if health_every.is_some() => {
                    let report = self.health.check(&self.registry).await;
                    info!(
                        checked = report.checked,
                        running = report.running,
                        stale = report.stale.len(),
                        recovered = report.recovered.len(),
                        errored = report.errored.len(),
                        "health check completed"
                    );
                }
                _ = self.shutdown.wait() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }
    }

    /// Stop every agent and write a final snapshot.
    pub async fn drain(&self) -> Result<()> {
        let failures = self.registry.stop_all().await;
        if failures > 0 {
            warn!(failures, "some agents did not stop cleanly");
        }
        let saved = self
            .registry
            .save_snapshot()
            .await
            .context("failed to write final snapshot")?;
        info!(saved, "daemon stopped");
        Ok(())
    }
}
