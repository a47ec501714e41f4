//! Task submission, cancellation and ledger queries.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use fw_core::types::{AgentId, AgentStatus, TaskId, TaskMode, TaskRequest, TaskResult, TaskStatus, TaskSubmission};
use fw_telemetry::metrics::MetricKind;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentCore};
use crate::executor::panic_message;
use crate::registry::{AgentRegistry, RegistryError, Result};
use crate::state_machine::LifecycleOp;

impl AgentRegistry {
    /// Submit a raw task object.
    ///
    /// Malformed tasks are rejected with [`RegistryError::Validation`]
    /// before anything is recorded. Every other outcome, including an
    /// admission refusal or an ability failure, comes back as a
    /// [`TaskSubmission`] whose task id is already in the ledger.
    pub async fn execute_agent_task(&self, agent_id: AgentId, task: Value) -> Result<TaskSubmission> {
        let request = TaskRequest::from_value(task).map_err(|e| RegistryError::Validation(e.to_string()))?;
        self.submit(agent_id, request).await
    }

    pub async fn submit(&self, agent_id: AgentId, request: TaskRequest) -> Result<TaskSubmission> {
        if request.ability.trim().is_empty() {
            return Err(RegistryError::Validation("task ability must not be empty".into()));
        }
        let agent = self.get(agent_id).await?;
        let mut core = agent.lock().await;

        let record = TaskResult::pending(agent_id, &request);
        let task_id = record.task_id;
        core.ledger.insert(record);

        if let Some(reason) = self.admission_error(&core, &request) {
            if let Some(r) = core.ledger.get_mut(&task_id) {
                r.fail(reason.clone());
            }
            self.finish_task(&mut core, task_id);
            warn!(agent_id = %agent_id, task_id = %task_id, ability = %request.ability, reason = %reason, "task rejected");
            return Ok(TaskSubmission {
                success: false,
                queued: false,
                agent_id,
                task_id,
                output: None,
                error: Some(reason),
            });
        }

        match request.mode {
            TaskMode::Queue => {
                core.queue.enqueue(task_id, request.priority);
                agent.notify();
                debug!(agent_id = %agent_id, task_id = %task_id, priority = request.priority, "task queued");
                Ok(TaskSubmission {
                    success: true,
                    queued: true,
                    agent_id,
                    task_id,
                    output: None,
                    error: None,
                })
            }
            TaskMode::Direct => {
                let outcome = self
                    .execute_recorded(&agent, &mut core, task_id, &request.ability, &request.payload)
                    .await;
                agent.notify();
                let (output, error) = match outcome {
                    Ok(out) => (Some(out), None),
                    Err(e) => (None, Some(e)),
                };
                Ok(TaskSubmission {
                    success: error.is_none(),
                    queued: false,
                    agent_id,
                    task_id,
                    output,
                    error,
                })
            }
        }
    }

    fn admission_error(&self, core: &AgentCore, request: &TaskRequest) -> Option<String> {
        if !self.shared.abilities.contains(&request.ability) {
            return Some(format!("ability `{}` is not registered", request.ability));
        }
        match request.mode {
            TaskMode::Direct if core.status != AgentStatus::Running => Some(format!(
                "agent is {}; direct tasks require RUNNING",
                core.status
            )),
            TaskMode::Queue if !core.status.accepts_queued() => Some(format!(
                "agent is {}; queued tasks require RUNNING or PAUSED",
                core.status
            )),
            _ => None,
        }
    }

    /// Run a PENDING ledger entry to completion with the agent lock held.
    ///
    /// An ability error or panic fails the task and escalates the agent to
    /// ERROR.
    pub(crate) async fn execute_recorded(
        &self,
        agent: &Agent,
        core: &mut AgentCore,
        task_id: TaskId,
        ability_name: &str,
        payload: &Value,
    ) -> std::result::Result<Value, String> {
        let agent_id = agent.id();
        let Some(ability) = self.shared.abilities.get(ability_name) else {
            let reason = format!("ability `{ability_name}` is not registered");
            if let Some(r) = core.ledger.get_mut(&task_id) {
                r.fail(reason.clone());
            }
            self.finish_task(core, task_id);
            warn!(agent_id = %agent_id, task_id = %task_id, "ability disappeared before execution");
            return Err(reason);
        };

        if let Some(r) = core.ledger.get_mut(&task_id) {
            r.advance(TaskStatus::Running);
        }
        let invocation = AssertUnwindSafe(ability.invoke(&mut core.context(None), payload))
            .catch_unwind()
            .await;
        core.touch();

        let (reason, last_error) = match invocation {
            Ok(Ok(output)) => {
                if let Some(r) = core.ledger.get_mut(&task_id) {
                    r.complete(output.clone());
                }
                info!(agent_id = %agent_id, task_id = %task_id, ability = %ability_name, "task completed");
                self.finish_task(core, task_id);
                return Ok(output);
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                let last_error = format!("ability `{ability_name}` failed: {reason}");
                (reason, last_error)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                (
                    format!("ability panicked: {message}"),
                    format!("ability `{ability_name}` crashed: {message}"),
                )
            }
        };

        if let Some(r) = core.ledger.get_mut(&task_id) {
            r.fail(reason.clone());
        }
        error!(agent_id = %agent_id, task_id = %task_id, ability = %ability_name, error = %reason, "ability failed");
        core.record_error(last_error);
        let _ = agent.apply(core, LifecycleOp::Fail);
        self.finish_task(core, task_id);
        Err(reason)
    }

    /// Append a finished task to the history ring and report it.
    fn finish_task(&self, core: &mut AgentCore, task_id: TaskId) {
        let Some(record) = core.ledger.get(&task_id).cloned() else {
            return;
        };
        if !record.status.is_finished() {
            return;
        }
        core.ledger.record_history(&record);

        let status = record.status.to_string().to_lowercase();
        let metrics = &self.shared.metrics;
        if let Err(e) = metrics.record(
            core.id,
            "tasks_total",
            1.0,
            MetricKind::Counter,
            &[("ability", record.ability.as_str()), ("status", status.as_str())],
        ) {
            warn!(agent_id = %core.id, error = %e, "failed to record task metric");
        }
        if let Some(ms) = record.duration_ms() {
            if let Err(e) = metrics.record(
                core.id,
                "task_duration_seconds",
                ms as f64 / 1000.0,
                MetricKind::Histogram,
                &[("ability", record.ability.as_str())],
            ) {
                warn!(agent_id = %core.id, error = %e, "failed to record task duration");
            }
        }
    }

    // -- Tracking -----------------------------------------------------------

    /// Cancel a PENDING or RUNNING task. The loop skips cancelled entries
    /// when it dequeues them; an in-flight call is not interrupted.
    pub async fn cancel_task(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
        reason: Option<String>,
    ) -> Result<TaskResult> {
        let agent = self.get(agent_id).await?;
        let mut core = agent.lock().await;
        let record = core
            .ledger
            .get_mut(&task_id)
            .ok_or(RegistryError::TaskNotFound { agent_id, task_id })?;

        let status = record.status;
        if !record.cancel(reason.unwrap_or_else(|| "cancelled by request".to_string())) {
            return Err(RegistryError::InvalidTaskState { task_id, status });
        }
        let cancelled = record.clone();
        core.ledger.record_history(&cancelled);
        agent.notify();
        info!(agent_id = %agent_id, task_id = %task_id, "task cancelled");
        Ok(cancelled)
    }

    /// Status of a task; `Unknown` if the agent has no such task.
    pub async fn task_status(&self, agent_id: AgentId, task_id: TaskId) -> Result<TaskStatus> {
        let agent = self.get(agent_id).await?;
        let core = agent.lock().await;
        Ok(core.ledger.status(&task_id))
    }

    pub async fn task_result(&self, agent_id: AgentId, task_id: TaskId) -> Result<TaskResult> {
        let agent = self.get(agent_id).await?;
        let core = agent.lock().await;
        core.ledger
            .get(&task_id)
            .cloned()
            .ok_or(RegistryError::TaskNotFound { agent_id, task_id })
    }

    /// Tasks newest first, optionally filtered by status and truncated.
    pub async fn list_agent_tasks(
        &self,
        agent_id: AgentId,
        status: Option<TaskStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskResult>> {
        let agent = self.get(agent_id).await?;
        let core = agent.lock().await;
        Ok(core.ledger.list(status, limit))
    }
}
