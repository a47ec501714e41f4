//! Auto-restart of agents whose loop ended in ERROR.
//!
//! There is no attempt counter or backoff: an ability that fails on every
//! run restarts the agent once per `restart_delay` for as long as work
//! keeps arriving.

use fw_core::types::{AgentId, AgentStatus};
use tracing::{error, info, warn};

use crate::registry::{AgentRegistry, RegistryError};
use crate::state_machine::LifecycleOp;

impl AgentRegistry {
    /// Called from loop teardown with the status the agent settled in.
    pub(crate) fn on_loop_exit(&self, id: AgentId, final_status: AgentStatus) {
        if !self.shared.settings.auto_restart || final_status != AgentStatus::Error {
            return;
        }
        let registry = self.clone();
        let delay = self.shared.settings.restart_delay();
        info!(agent_id = %id, ?delay, "scheduling auto-restart");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match registry.restart_after_error(id).await {
                Ok(()) => {}
                Err(RegistryError::AgentNotFound(_)) => {
                    warn!(agent_id = %id, "agent deleted before auto-restart");
                }
                Err(e) => registry.record_restart_failure(id, e).await,
            }
        });
    }

    async fn restart_after_error(&self, id: AgentId) -> Result<(), RegistryError> {
        let agent = self.get(id).await?;
        {
            let mut core = agent.lock().await;
            if core.status != AgentStatus::Error {
                // Someone else already recovered it.
                return Ok(());
            }
            core.restarts = core.restarts.saturating_add(1);
        }
        self.clear_error(id).await?;
        let outcome = self.start(id).await?;
        info!(agent_id = %id, status = %outcome.status(), "agent auto-restarted");
        Ok(())
    }

    async fn record_restart_failure(&self, id: AgentId, err: RegistryError) {
        error!(agent_id = %id, error = %err, "auto-restart failed");
        if let Ok(agent) = self.get(id).await {
            let mut core = agent.lock().await;
            core.record_error(format!("auto-restart failed: {err}"));
            let _ = agent.apply(&mut core, LifecycleOp::Fail);
        }
        self.persist().await;
    }
}
