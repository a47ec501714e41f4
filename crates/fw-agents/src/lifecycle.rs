//! Start, pause, resume, stop and clear-error.

use std::sync::Arc;

use fw_core::types::{AgentId, AgentStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::registry::{AgentRegistry, RegistryError, Result};
use crate::state_machine::{LifecycleOp, Transition};

/// What a lifecycle call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum LifecycleOutcome {
    /// The agent moved; carries the status it settled in.
    Changed(AgentStatus),
    /// The target was already satisfied.
    Unchanged(AgentStatus),
}

impl LifecycleOutcome {
    pub fn status(&self) -> AgentStatus {
        match self {
            LifecycleOutcome::Changed(s) | LifecycleOutcome::Unchanged(s) => *s,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, LifecycleOutcome::Changed(_))
    }
}

impl AgentRegistry {
    /// Move a CREATED or STOPPED agent to INITIALIZING and spawn its loop.
    ///
    /// Waits (bounded by the start timeout) until the loop has taken the
    /// agent out of INITIALIZING.
    pub async fn start(&self, id: AgentId) -> Result<LifecycleOutcome> {
        let agent = self.get(id).await?;

        let mut status_rx = {
            let mut tables = self.shared.tables.lock().await;
            let mut core = agent.lock().await;
            match agent.apply(&mut core, LifecycleOp::Start)? {
                Transition::NoOp => return Ok(LifecycleOutcome::Unchanged(core.status)),
                Transition::Apply(_) => {
                    core.generation += 1;
                    core.touch();
                    let generation = core.generation;
                    drop(core);
                    let handle = self.spawn_loop(Arc::clone(&agent), generation);
                    tables.loops.insert(id, handle);
                }
            }
            agent.subscribe_status()
        };

        let timeout = self.shared.settings.start_timeout();
        let settled = tokio::time::timeout(
            timeout,
            status_rx.wait_for(|s| *s != AgentStatus::Initializing),
        )
        .await
        .map(|r| r.map(|status| *status));
        match settled {
            Ok(Ok(status)) => {
                info!(agent_id = %id, status = %status, "agent started");
                Ok(LifecycleOutcome::Changed(status))
            }
            // The sender lives as long as the agent; treat a closed channel
            // like a timeout.
            Ok(Err(_)) | Err(_) => Err(RegistryError::StartTimeout { id, timeout }),
        }
    }

    pub async fn pause(&self, id: AgentId) -> Result<LifecycleOutcome> {
        self.simple_transition(id, LifecycleOp::Pause).await
    }

    pub async fn resume(&self, id: AgentId) -> Result<LifecycleOutcome> {
        self.simple_transition(id, LifecycleOp::Resume).await
    }

    /// ERROR -> STOPPED with the last error cleared. On other states only
    /// a stale error message is dropped.
    pub async fn clear_error(&self, id: AgentId) -> Result<LifecycleOutcome> {
        let agent = self.get(id).await?;
        let mut core = agent.lock().await;
        let transition = agent.apply(&mut core, LifecycleOp::ClearError)?;
        core.clear_error();
        Ok(match transition {
            Transition::Apply(next) => {
                info!(agent_id = %id, "agent error cleared");
                LifecycleOutcome::Changed(next)
            }
            Transition::NoOp => LifecycleOutcome::Unchanged(core.status),
        })
    }

    async fn simple_transition(&self, id: AgentId, op: LifecycleOp) -> Result<LifecycleOutcome> {
        let agent = self.get(id).await?;
        let mut core = agent.lock().await;
        let outcome = match agent.apply(&mut core, op)? {
            Transition::Apply(next) => {
                core.touch();
                LifecycleOutcome::Changed(next)
            }
            Transition::NoOp => LifecycleOutcome::Unchanged(core.status),
        };
        agent.notify();
        Ok(outcome)
    }

    /// Set STOPPED, wake the loop and wait for its teardown to finish.
    pub async fn stop(&self, id: AgentId) -> Result<LifecycleOutcome> {
        let agent = self.get(id).await?;
        let generation = {
            let mut core = agent.lock().await;
            match agent.apply(&mut core, LifecycleOp::Stop)? {
                Transition::NoOp => return Ok(LifecycleOutcome::Unchanged(core.status)),
                Transition::Apply(_) => core.touch(),
            }
            core.generation
        };
        agent.notify();
        self.wait_for_loop_exit(&agent, generation).await?;
        info!(agent_id = %id, "agent stopped");
        Ok(LifecycleOutcome::Changed(AgentStatus::Stopped))
    }

    /// Wait for the loop of `generation` to finish teardown. A handle from a
    /// newer start is not ours to wait on.
    async fn wait_for_loop_exit(&self, agent: &Agent, generation: u64) -> Result<()> {
        let id = agent.id();
        let done = self
            .shared
            .tables
            .lock()
            .await
            .loops
            .get(&id)
            .filter(|h| h.generation == generation)
            .map(|h| h.done.clone());
        let Some(mut done) = done else {
            return Ok(());
        };

        let timeout = self.shared.settings.stop_timeout();
        // Release the watch borrow before `done` goes out of scope.
        let waited = tokio::time::timeout(timeout, done.wait_for(|finished| *finished))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RegistryError::StopFailed {
                id,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(agent_id = %id, ?timeout, "loop did not exit in time");
                Err(RegistryError::StopTimeout { id, timeout })
            }
        }
    }

    /// Stop every active agent. Failures are logged and counted.
    pub async fn stop_all(&self) -> usize {
        let mut failures = 0;
        for agent in self.agents_snapshot().await {
            let status = agent.lock().await.status;
            if !matches!(
                status,
                AgentStatus::Running | AgentStatus::Paused | AgentStatus::Initializing
            ) {
                continue;
            }
            if let Err(e) = self.stop(agent.id()).await {
                warn!(agent_id = %agent.id(), error = %e, "failed to stop agent");
                failures += 1;
            }
        }
        failures
    }
}
