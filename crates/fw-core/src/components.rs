use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::ComponentsConfig;
use crate::llm::{EchoProvider, LlmProvider};
use crate::memory::{LruMemory, Memory};
use crate::queue::{PriorityQueue, TaskQueue};
use crate::types::AgentConfig;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComponentError {
    #[error("unknown memory type: `{0}`")]
    UnknownMemory(String),
    #[error("unknown queue type: `{0}`")]
    UnknownQueue(String),
    #[error("unknown llm type: `{0}`")]
    UnknownLlm(String),
    #[error("component construction failed: {0}")]
    Construction(String),
}

pub type Result<T> = std::result::Result<T, ComponentError>;

type MemoryCtor = Arc<dyn Fn(&AgentConfig, &ComponentsConfig) -> Result<Box<dyn Memory>> + Send + Sync>;
type QueueCtor = Arc<dyn Fn(&AgentConfig) -> Result<Box<dyn TaskQueue>> + Send + Sync>;
type LlmCtor = Arc<dyn Fn(&AgentConfig) -> Result<Arc<dyn LlmProvider>> + Send + Sync>;

/// The capability handles built for one agent.
pub struct AgentComponents {
    pub memory: Box<dyn Memory>,
    pub queue: Box<dyn TaskQueue>,
    pub llm: Arc<dyn LlmProvider>,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Named constructors for the pluggable per-agent capabilities.
///
/// Populated once at startup; afterwards it is shared read-only. Names used
/// by the configuration are checked with [`ComponentRegistry::validate_config`]
/// before any agent is created.
pub struct ComponentRegistry {
    defaults: ComponentsConfig,
    memory: HashMap<String, MemoryCtor>,
    queues: HashMap<String, QueueCtor>,
    llms: HashMap<String, LlmCtor>,
}

impl ComponentRegistry {
    /// An empty registry; nothing can be built until constructors are added.
    pub fn empty(defaults: ComponentsConfig) -> Self {
        Self {
            defaults,
            memory: HashMap::new(),
            queues: HashMap::new(),
            llms: HashMap::new(),
        }
    }

    /// A registry with the built-in `lru`, `priority` and `echo` components.
    pub fn with_builtins(defaults: ComponentsConfig) -> Self {
        let mut reg = Self::empty(defaults);
        reg.register_memory("lru", |agent, defaults| {
            let capacity = agent
                .parameters
                .get("memory_capacity")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(defaults.memory_capacity);
            Ok(Box::new(LruMemory::new(capacity)))
        });
        reg.register_queue("priority", |_| Ok(Box::new(PriorityQueue::new())));
        reg.register_llm("echo", |agent| {
            let prefix = agent
                .parameters
                .get("echo_prefix")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(Arc::new(EchoProvider::new(prefix)))
        });
        reg
    }

    pub fn defaults(&self) -> &ComponentsConfig {
        &self.defaults
    }

    pub fn register_memory<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AgentConfig, &ComponentsConfig) -> Result<Box<dyn Memory>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(name = %name, "registered memory component");
        self.memory.insert(name, Arc::new(ctor));
    }

    pub fn register_queue<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AgentConfig) -> Result<Box<dyn TaskQueue>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(name = %name, "registered queue component");
        self.queues.insert(name, Arc::new(ctor));
    }

    pub fn register_llm<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AgentConfig) -> Result<Arc<dyn LlmProvider>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(name = %name, "registered llm component");
        self.llms.insert(name, Arc::new(ctor));
    }

    /// Check the configured default names against the registered constructors.
    pub fn validate_config(&self) -> Result<()> {
        self.check_names(
            &self.defaults.memory_type,
            &self.defaults.queue_type,
            &self.defaults.llm_type,
        )
    }

    /// Check the names an agent config resolves to.
    pub fn validate_agent(&self, config: &AgentConfig) -> Result<()> {
        let (memory, queue, llm) = self.resolve(config);
        self.check_names(memory, queue, llm)
    }

    /// Build the memory, queue and LLM handles for an agent.
    pub fn build(&self, config: &AgentConfig) -> Result<AgentComponents> {
        let (memory_name, queue_name, llm_name) = self.resolve(config);

        let memory_ctor = self
            .memory
            .get(memory_name)
            .ok_or_else(|| ComponentError::UnknownMemory(memory_name.to_string()))?;
        let queue_ctor = self
            .queues
            .get(queue_name)
            .ok_or_else(|| ComponentError::UnknownQueue(queue_name.to_string()))?;
        let llm_ctor = self
            .llms
            .get(llm_name)
            .ok_or_else(|| ComponentError::UnknownLlm(llm_name.to_string()))?;

        Ok(AgentComponents {
            memory: memory_ctor(config, &self.defaults)?,
            queue: queue_ctor(config)?,
            llm: llm_ctor(config)?,
        })
    }

    fn resolve<'a>(&'a self, config: &'a AgentConfig) -> (&'a str, &'a str, &'a str) {
        (
            config
                .memory_type
                .as_deref()
                .unwrap_or(&self.defaults.memory_type),
            config
                .queue_type
                .as_deref()
                .unwrap_or(&self.defaults.queue_type),
            config.llm_type.as_deref().unwrap_or(&self.defaults.llm_type),
        )
    }

    fn check_names(&self, memory: &str, queue: &str, llm: &str) -> Result<()> {
        if !self.memory.contains_key(memory) {
            return Err(ComponentError::UnknownMemory(memory.to_string()));
        }
        if !self.queues.contains_key(queue) {
            return Err(ComponentError::UnknownQueue(queue.to_string()));
        }
        if !self.llms.contains_key(llm) {
            return Err(ComponentError::UnknownLlm(llm.to_string()));
        }
        Ok(())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins(ComponentsConfig::default())
    }
}
