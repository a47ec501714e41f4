use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use fw_core::components::{ComponentError, ComponentRegistry};
use fw_core::config::RuntimeConfig;
use fw_core::types::{merge_parameters, AgentConfig, AgentId, AgentPatch, AgentStatus, TaskId, TaskStatus};
use fw_telemetry::metrics::{MetricsSink, NoopMetrics};
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::abilities::AbilityRegistry;
use crate::agent::{Agent, AgentCore, AgentSnapshot, AgentSummary};
use crate::persistence::{PersistenceError, PersistenceStore};
use crate::skills::{SkillRegistry, SkillState};
use crate::state_machine::TransitionError;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("agent {id} is {status}; events are only delivered while RUNNING")]
    NotRunning { id: AgentId, status: AgentStatus },

    #[error("agent {id} did not leave INITIALIZING within {timeout:?}")]
    StartTimeout { id: AgentId, timeout: Duration },

    #[error("agent {id} did not stop within {timeout:?}")]
    StopTimeout { id: AgentId, timeout: Duration },

    #[error("waiting for agent {id} to stop failed: {reason}")]
    StopFailed { id: AgentId, reason: String },

    #[error("task {task_id} not found on agent {agent_id}")]
    TaskNotFound { agent_id: AgentId, task_id: TaskId },

    #[error("task {task_id} is {status} and can no longer be cancelled")]
    InvalidTaskState { task_id: TaskId, status: TaskStatus },

    #[error("component error: {0}")]
    Component(#[from] ComponentError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Parse a caller-supplied agent id.
pub fn parse_agent_id(raw: &str) -> Result<AgentId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RegistryError::Validation("agent id must not be empty".into()));
    }
    Uuid::parse_str(raw).map_err(|e| RegistryError::Validation(format!("invalid agent id `{raw}`: {e}")))
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Handle on a running execution loop.
pub(crate) struct LoopHandle {
    pub(crate) generation: u64,
    /// Flips to `true` once teardown has finished.
    pub(crate) done: watch::Receiver<bool>,
}

/// Everything guarded by the registry-wide lock.
#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) agents: HashMap<AgentId, Arc<Agent>>,
    pub(crate) loops: HashMap<AgentId, LoopHandle>,
}

pub(crate) struct Shared {
    pub(crate) settings: RuntimeConfig,
    pub(crate) abilities: Arc<AbilityRegistry>,
    pub(crate) skills: Arc<SkillRegistry>,
    pub(crate) components: Arc<ComponentRegistry>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) store: Option<Arc<dyn PersistenceStore>>,
    pub(crate) tables: Mutex<Tables>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct RegistryBuilder {
    settings: RuntimeConfig,
    abilities: Arc<AbilityRegistry>,
    skills: Arc<SkillRegistry>,
    components: Arc<ComponentRegistry>,
    metrics: Arc<dyn MetricsSink>,
    store: Option<Arc<dyn PersistenceStore>>,
}

impl RegistryBuilder {
    pub fn abilities(mut self, abilities: Arc<AbilityRegistry>) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = skills;
        self
    }

    pub fn components(mut self, components: Arc<ComponentRegistry>) -> Self {
        self.components = components;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the runtime settings and component defaults, then build.
    pub fn build(self) -> Result<AgentRegistry> {
        self.settings
            .validate()
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        self.components.validate_config()?;
        Ok(AgentRegistry {
            shared: Arc::new(Shared {
                settings: self.settings,
                abilities: self.abilities,
                skills: self.skills,
                components: self.components,
                metrics: self.metrics,
                store: self.store,
                tables: Mutex::new(Tables::default()),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

/// Owns every agent and its execution loop. Cheap to clone.
///
/// Lock order: the registry-wide lock is always taken before an agent
/// lock, never the other way round.
#[derive(Clone)]
pub struct AgentRegistry {
    pub(crate) shared: Arc<Shared>,
}

impl AgentRegistry {
    pub fn builder(settings: RuntimeConfig) -> RegistryBuilder {
        RegistryBuilder {
            settings,
            abilities: Arc::new(AbilityRegistry::new()),
            skills: Arc::new(SkillRegistry::new()),
            components: Arc::new(ComponentRegistry::default()),
            metrics: Arc::new(NoopMetrics),
            store: None,
        }
    }

    pub fn settings(&self) -> &RuntimeConfig {
        &self.shared.settings
    }

    pub fn abilities(&self) -> &Arc<AbilityRegistry> {
        &self.shared.abilities
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.shared.skills
    }

    // -- CRUD ---------------------------------------------------------------

    /// Create an agent in CREATED.
    ///
    /// Skill states are seeded from the configured ability names that are
    /// also registered skills; other names are skipped.
    pub async fn create(&self, config: AgentConfig) -> Result<Arc<Agent>> {
        let agent = Arc::new(Agent::new(self.build_core(Uuid::new_v4(), config)?));
        let id = agent.id();
        let (name, agent_type) = {
            let core = agent.lock().await;
            (core.config.name.clone(), core.config.agent_type.clone())
        };

        self.shared.tables.lock().await.agents.insert(id, Arc::clone(&agent));
        info!(agent_id = %id, name = %name, agent_type = %agent_type, "agent created");
        Ok(agent)
    }

    pub(crate) fn build_core(&self, id: AgentId, config: AgentConfig) -> Result<AgentCore> {
        if config.name.trim().is_empty() {
            return Err(RegistryError::Validation("agent name must not be empty".into()));
        }
        let components = self.shared.components.build(&config)?;
        let skills: BTreeMap<String, SkillState> = config
            .abilities
            .iter()
            .filter_map(|name| {
                self.shared
                    .skills
                    .get(name)
                    .map(|skill| (name.clone(), SkillState::new(skill)))
            })
            .collect();
        Ok(AgentCore::new(
            id,
            config,
            components,
            skills,
            self.shared.settings.task_history_limit,
        ))
    }

    pub async fn get(&self, id: AgentId) -> Result<Arc<Agent>> {
        self.shared
            .tables
            .lock()
            .await
            .agents
            .get(&id)
            .cloned()
            .ok_or(RegistryError::AgentNotFound(id))
    }

    pub async fn contains(&self, id: AgentId) -> bool {
        self.shared.tables.lock().await.agents.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.shared.tables.lock().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Full status view of one agent.
    pub async fn status(&self, id: AgentId) -> Result<AgentSnapshot> {
        let agent = self.get(id).await?;
        let core = agent.lock().await;
        Ok(core.snapshot())
    }

    /// Agents matching the optional filters, oldest first.
    ///
    /// Membership is copied under the registry lock; each agent is then
    /// inspected under its own lock.
    pub async fn list(
        &self,
        filter_type: Option<&str>,
        filter_status: Option<AgentStatus>,
    ) -> Vec<AgentSummary> {
        let agents = self.agents_snapshot().await;

        let mut rows = Vec::with_capacity(agents.len());
        for agent in agents {
            let core = agent.lock().await;
            if filter_type.is_some_and(|t| core.config.agent_type != t) {
                continue;
            }
            if filter_status.is_some_and(|s| core.status != s) {
                continue;
            }
            rows.push((core.created_at, core.summary()));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, row)| row).collect()
    }

    pub(crate) async fn agents_snapshot(&self) -> Vec<Arc<Agent>> {
        self.shared.tables.lock().await.agents.values().cloned().collect()
    }

    /// Change name and/or parameters. Status is never touched.
    pub async fn update(&self, id: AgentId, patch: AgentPatch) -> Result<AgentSummary> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(RegistryError::Validation("agent name must not be empty".into()));
        }
        let agent = self.get(id).await?;
        let mut core = agent.lock().await;
        patch.apply(&mut core.config);
        core.updated_at = chrono::Utc::now();
        info!(agent_id = %id, name = %core.config.name, "agent updated");
        Ok(core.summary())
    }

    /// Stop the agent if it is active, drop its metrics and forget it.
    pub async fn delete(&self, id: AgentId) -> Result<()> {
        let agent = self.get(id).await?;
        let status = agent.lock().await.status;
        if matches!(
            status,
            AgentStatus::Running | AgentStatus::Paused | AgentStatus::Initializing
        ) {
            if let Err(e) = self.stop(id).await {
                warn!(agent_id = %id, error = %e, "stop during delete failed; removing anyway");
            }
        }

        if let Err(e) = self.shared.metrics.clear_agent(id) {
            warn!(agent_id = %id, error = %e, "failed to clear agent metrics");
        }

        {
            let mut tables = self.shared.tables.lock().await;
            tables.agents.remove(&id);
            tables.loops.remove(&id);
        }
        info!(agent_id = %id, "agent deleted");
        Ok(())
    }

    /// Create a new agent from `id`'s configuration with a new name and
    /// parameter overrides. Memory and tasks are not copied.
    pub async fn clone_agent(
        &self,
        id: AgentId,
        new_name: impl Into<String>,
        overrides: Map<String, Value>,
    ) -> Result<Arc<Agent>> {
        let mut config = {
            let source = self.get(id).await?;
            let core = source.lock().await;
            core.config.clone()
        };
        config.name = new_name.into();
        config.autostart = false;
        merge_parameters(&mut config.parameters, &overrides);

        let clone = self.create(config).await?;
        info!(source = %id, agent_id = %clone.id(), "agent cloned");
        Ok(clone)
    }
}
