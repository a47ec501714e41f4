//! The per-agent execution loop.
//!
//! One task per agent. Each iteration takes the agent lock, runs the skill
//! pass, then drains at most one queued task. When nothing was dequeued it
//! releases the lock and waits for a wakeup, bounded by the idle tick so
//! time-based skills keep firing. A paused loop waits without a bound.

use std::any::Any;
use std::sync::Arc;

use fw_core::types::{AgentStatus, TaskStatus};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info};

use crate::agent::{Agent, AgentCore};
use crate::registry::{AgentRegistry, LoopHandle};
use crate::state_machine::{LifecycleOp, Transition};

/// Why a loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// Status became STOPPED or ERROR.
    Finished,
    /// A newer start replaced this loop; it must not touch the agent.
    Superseded,
}

impl AgentRegistry {
    /// Spawn the loop for `generation` plus a watcher that runs teardown
    /// however the loop ends, panics included.
    pub(crate) fn spawn_loop(&self, agent: Arc<Agent>, generation: u64) -> LoopHandle {
        let (done_tx, done_rx) = watch::channel(false);
        let registry = self.clone();

        tokio::spawn(async move {
            let inner = tokio::spawn(registry.clone().run_loop(Arc::clone(&agent), generation));
            let outcome = inner.await;
            registry.teardown(&agent, generation, outcome).await;
            let _ = done_tx.send(true);
        });

        LoopHandle {
            generation,
            done: done_rx,
        }
    }

    async fn run_loop(self, agent: Arc<Agent>, generation: u64) -> LoopExit {
        let id = agent.id();
        {
            let mut core = agent.lock().await;
            if core.generation != generation {
                return LoopExit::Superseded;
            }
            match agent.apply(&mut core, LifecycleOp::Spawned) {
                Ok(Transition::Apply(_)) => core.touch(),
                _ => {
                    // Stopped before the loop got going.
                    debug!(agent_id = %id, status = %core.status, "loop spawned into non-initializing agent");
                    return LoopExit::Finished;
                }
            }
        }
        info!(agent_id = %id, generation, "execution loop running");

        let idle_tick = self.shared.settings.idle_tick();
        loop {
            let mut core = agent.lock().await;
            if core.generation != generation {
                return LoopExit::Superseded;
            }
            if core.status.is_terminal() {
                return LoopExit::Finished;
            }

            if core.status == AgentStatus::Paused {
                let notified = agent.wake().notified();
                tokio::pin!(notified);
                // Register before releasing the lock so a resume between
                // unlock and await is not missed.
                notified.as_mut().enable();
                drop(core);
                notified.await;
                continue;
            }

            self.run_skill_pass(&agent, &mut core).await;
            let worked = self.process_next_task(&agent, &mut core).await;

            if worked {
                drop(core);
                tokio::task::yield_now().await;
                continue;
            }

            let notified = agent.wake().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(core);
            let _ = tokio::time::timeout(idle_tick, notified).await;
        }
    }

    /// Dequeue and run one task. Returns `true` if anything was dequeued.
    async fn process_next_task(&self, agent: &Agent, core: &mut AgentCore) -> bool {
        let Some(task_id) = core.queue.dequeue() else {
            return false;
        };

        let (ability, payload) = match core.ledger.get(&task_id) {
            Some(record) if record.status == TaskStatus::Pending => {
                (record.ability.clone(), record.payload.clone())
            }
            Some(record) => {
                debug!(agent_id = %agent.id(), task_id = %task_id, status = %record.status, "skipping dequeued task");
                return true;
            }
            None => {
                debug!(agent_id = %agent.id(), task_id = %task_id, "dequeued task has no ledger entry");
                return true;
            }
        };

        let _ = self
            .execute_recorded(agent, core, task_id, &ability, &payload)
            .await;
        true
    }

    /// Runs once per loop, after the loop body returns or panics.
    ///
    /// Order: settle status, touch activity, drop the loop handle under the
    /// registry lock, save a snapshot, hand over to the supervisor.
    async fn teardown(
        &self,
        agent: &Arc<Agent>,
        generation: u64,
        outcome: Result<LoopExit, JoinError>,
    ) {
        let id = agent.id();
        let (superseded, crash) = match outcome {
            Ok(LoopExit::Superseded) => (true, None),
            Ok(LoopExit::Finished) => (false, None),
            Err(e) if e.is_panic() => (false, Some(panic_message(e.into_panic().as_ref()).to_string())),
            Err(_) => (false, Some("loop task cancelled".to_string())),
        };

        let final_status = {
            let mut core = agent.lock().await;
            if !superseded && core.generation == generation {
                if let Some(reason) = &crash {
                    error!(agent_id = %id, error = %reason, "execution loop crashed");
                    core.record_error(format!("execution loop crashed: {reason}"));
                    let _ = agent.apply(&mut core, LifecycleOp::Fail);
                }
                let _ = agent.apply(&mut core, LifecycleOp::Exit);
            }
            core.touch();
            core.status
        };

        {
            let mut tables = self.shared.tables.lock().await;
            if tables.loops.get(&id).map(|h| h.generation) == Some(generation) {
                tables.loops.remove(&id);
            }
        }

        if superseded {
            debug!(agent_id = %id, generation, "superseded loop exited");
            return;
        }
        info!(agent_id = %id, status = %final_status, "execution loop exited");

        self.persist().await;
        self.on_loop_exit(id, final_status);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panic")
}
