use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fw_core::components::AgentComponents;
use fw_core::llm::LlmProvider;
use fw_core::memory::Memory;
use fw_core::queue::TaskQueue;
use fw_core::types::{AgentConfig, AgentId, AgentStatus, TaskResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tracing::info;

use crate::ledger::{TaskHistoryEntry, TaskLedger};
use crate::skills::{SkillSnapshot, SkillState};
use crate::state_machine::{plan, LifecycleOp, Transition, TransitionError};

// ---------------------------------------------------------------------------
// AgentContext: what abilities and skills see
// ---------------------------------------------------------------------------

/// Borrowed view of an agent handed to abilities and skills while the
/// agent lock is held.
pub struct AgentContext<'a> {
    pub id: AgentId,
    pub name: &'a str,
    pub agent_type: &'a str,
    pub parameters: &'a Map<String, Value>,
    pub memory: &'a mut dyn Memory,
    pub llm: &'a dyn LlmProvider,
    /// Payload of the triggering event, for event skills.
    pub event: Option<&'a Value>,
}

impl AgentContext<'_> {
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

// ---------------------------------------------------------------------------
// AgentCore: mutable state guarded by the agent lock
// ---------------------------------------------------------------------------

pub struct AgentCore {
    pub(crate) id: AgentId,
    pub(crate) config: AgentConfig,
    pub(crate) status: AgentStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
    pub(crate) memory: Box<dyn Memory>,
    pub(crate) queue: Box<dyn TaskQueue>,
    pub(crate) llm: Arc<dyn LlmProvider>,
    pub(crate) skills: BTreeMap<String, SkillState>,
    pub(crate) ledger: TaskLedger,
    pub(crate) last_error: Option<String>,
    pub(crate) error_at: Option<DateTime<Utc>>,
    pub(crate) restarts: u32,
    /// Bumped on every start; a loop whose generation no longer matches
    /// has been superseded and must exit without touching status.
    pub(crate) generation: u64,
}

impl AgentCore {
    pub(crate) fn new(
        id: AgentId,
        config: AgentConfig,
        components: AgentComponents,
        skills: BTreeMap<String, SkillState>,
        history_limit: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            config,
            status: AgentStatus::Created,
            created_at: now,
            updated_at: now,
            last_activity: now,
            memory: components.memory,
            queue: components.queue,
            llm: components.llm,
            skills,
            ledger: TaskLedger::new(history_limit),
            last_error: None,
            error_at: None,
            restarts: 0,
            generation: 0,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn memory(&self) -> &dyn Memory {
        self.memory.as_ref()
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn skills(&self) -> impl Iterator<Item = &SkillState> {
        self.skills.values()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Refresh last-activity; never moves it backwards.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.error_at = Some(Utc::now());
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
        self.error_at = None;
    }

    pub(crate) fn context<'a>(&'a mut self, event: Option<&'a Value>) -> AgentContext<'a> {
        AgentContext {
            id: self.id,
            name: &self.config.name,
            agent_type: &self.config.agent_type,
            parameters: &self.config.parameters,
            memory: self.memory.as_mut(),
            llm: self.llm.as_ref(),
            event,
        }
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id,
            name: self.config.name.clone(),
            agent_type: self.config.agent_type.clone(),
            status: self.status,
            last_activity: self.last_activity,
            last_error: self.last_error.clone(),
            queue_len: self.queue.len(),
        }
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let mut tasks: Vec<TaskResult> = self.ledger.records().cloned().collect();
        tasks.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        AgentSnapshot {
            id: self.id,
            config: self.config.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_activity: self.last_activity,
            last_error: self.last_error.clone(),
            error_at: self.error_at,
            restarts: self.restarts,
            queue_len: self.queue.len(),
            skills: self.skills.values().map(SkillState::snapshot).collect(),
            memory: self.memory.entries(),
            tasks,
            history: self.ledger.history().cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Agent: lock, wakeup and status broadcast around the core
// ---------------------------------------------------------------------------

pub struct Agent {
    id: AgentId,
    core: Mutex<AgentCore>,
    /// Wakes the execution loop. `notify_one` stores a permit, so a wake
    /// issued before the loop starts waiting is not lost.
    wake: Notify,
    status_tx: watch::Sender<AgentStatus>,
}

impl Agent {
    pub(crate) fn new(core: AgentCore) -> Self {
        let (status_tx, _) = watch::channel(core.status);
        Self {
            id: core.id,
            core: Mutex::new(core),
            wake: Notify::new(),
            status_tx,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, AgentCore> {
        self.core.lock().await
    }

    /// Last status published by the agent, without taking the lock.
    pub fn observed_status(&self) -> AgentStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn notify(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Plan `op` against the current status and apply it.
    pub(crate) fn apply(
        &self,
        core: &mut AgentCore,
        op: LifecycleOp,
    ) -> Result<Transition, TransitionError> {
        let transition = plan(core.status, op)?;
        if let Transition::Apply(next) = transition {
            let from = core.status;
            core.status = next;
            core.updated_at = Utc::now();
            self.status_tx.send_replace(next);
            info!(agent_id = %self.id, from = %from, to = %next, op = %op, "agent status changed");
        }
        Ok(transition)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Lightweight row returned by `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub last_activity: DateTime<Utc>,
    pub last_error: Option<String>,
    pub queue_len: usize,
}

/// Full point-in-time view of an agent, used for status queries and
/// persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub config: AgentConfig,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_error: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restarts: u32,
    #[serde(default)]
    pub queue_len: usize,
    #[serde(default)]
    pub skills: Vec<SkillSnapshot>,
    #[serde(default)]
    pub memory: Vec<(String, Value)>,
    #[serde(default)]
    pub tasks: Vec<TaskResult>,
    #[serde(default)]
    pub history: Vec<TaskHistoryEntry>,
}

impl AgentSnapshot {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn agent_type(&self) -> &str {
        &self.config.agent_type
    }
}

#[cfg(test)]
pub(crate) struct ContextParts {
    core: AgentCore,
}

#[cfg(test)]
impl ContextParts {
    pub(crate) fn for_tests() -> Self {
        let config = AgentConfig::new("test");
        let components = fw_core::components::ComponentRegistry::default()
            .build(&config)
            .unwrap();
        Self {
            core: AgentCore::new(uuid::Uuid::new_v4(), config, components, BTreeMap::new(), 10),
        }
    }

    pub(crate) fn context(&mut self) -> AgentContext<'_> {
        self.core.context(None)
    }
}
