//! Named, on-demand functions invoked through submitted tasks.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fw_core::llm::LlmError;
use serde_json::Value;
use tracing::debug;

use crate::agent::AgentContext;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum AbilityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Failed(String),
}

impl AbilityError {
    pub fn failed(msg: impl Into<String>) -> Self {
        AbilityError::Failed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AbilityError>;

// ---------------------------------------------------------------------------
// Ability trait
// ---------------------------------------------------------------------------

/// A function invoked with the agent context and the task payload.
///
/// Runs while the agent lock is held, so implementations should return
/// promptly. An `Err` escalates the owning agent to ERROR.
#[async_trait]
pub trait Ability: Send + Sync {
    async fn invoke(&self, agent: &mut AgentContext<'_>, task: &Value) -> Result<Value>;
}

type AbilityFn = dyn Fn(&mut AgentContext<'_>, &Value) -> Result<Value> + Send + Sync;

/// Adapts a synchronous closure into an [`Ability`]. Abilities that need to
/// await (for example on the LLM handle) implement the trait directly.
pub struct FnAbility {
    f: Box<AbilityFn>,
}

impl FnAbility {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut AgentContext<'_>, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Ability for FnAbility {
    async fn invoke(&self, agent: &mut AgentContext<'_>, task: &Value) -> Result<Value> {
        (self.f)(agent, task)
    }
}

// ---------------------------------------------------------------------------
// AbilityRegistry
// ---------------------------------------------------------------------------

/// Global name -> ability map shared by every agent.
#[derive(Default)]
pub struct AbilityRegistry {
    abilities: DashMap<String, Arc<dyn Ability>>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an ability.
    pub fn register(&self, name: impl Into<String>, ability: impl Ability + 'static) {
        let name = name.into();
        debug!(ability = %name, "registered ability");
        self.abilities.insert(name, Arc::new(ability));
    }

    /// Register a synchronous closure as an ability.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut AgentContext<'_>, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, FnAbility::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Ability>> {
        self.abilities.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.abilities.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.abilities.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.abilities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ContextParts;
    use serde_json::json;

    #[tokio::test]
    async fn sync_ability_reads_payload() {
        let registry = AbilityRegistry::new();
        registry.register_fn("double", |_, task| {
            let n = task["input"]
                .as_i64()
                .ok_or_else(|| AbilityError::InvalidInput("input must be an integer".into()))?;
            Ok(json!({ "result": n * 2 }))
        });
        assert!(registry.contains("double"));
        assert_eq!(registry.names(), vec!["double"]);

        let mut parts = ContextParts::for_tests();
        let mut ctx = parts.context();
        let ability = registry.get("double").unwrap();
        let out = ability.invoke(&mut ctx, &json!({"input": 5})).await.unwrap();
        assert_eq!(out["result"], 10);

        let err = ability.invoke(&mut ctx, &json!({})).await.unwrap_err();
        assert!(matches!(err, AbilityError::InvalidInput(_)));
    }

    struct Remember;

    #[async_trait]
    impl Ability for Remember {
        async fn invoke(&self, agent: &mut AgentContext<'_>, task: &Value) -> Result<Value> {
            agent.memory.set("last", task.clone());
            Ok(json!(agent.memory.len()))
        }
    }

    #[tokio::test]
    async fn trait_ability_uses_memory() {
        let mut parts = ContextParts::for_tests();
        let mut ctx = parts.context();
        assert_eq!(Remember.invoke(&mut ctx, &json!("x")).await.unwrap(), json!(1));
        assert_eq!(ctx.memory.get("last"), Some(json!("x")));
    }

    #[test]
    fn register_replaces_and_remove() {
        let registry = AbilityRegistry::new();
        registry.register_fn("a", |_, _| Ok(json!(1)));
        registry.register_fn("a", |_, _| Ok(json!(2)));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("a"));
        assert!(registry.is_empty());
    }
}
