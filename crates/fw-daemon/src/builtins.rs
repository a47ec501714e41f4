//! Abilities and skills every daemon agent can opt into by name.

use async_trait::async_trait;
use chrono::Utc;
use fw_agents::abilities::{self, Ability, AbilityError, AbilityRegistry};
use fw_agents::agent::AgentContext;
use fw_agents::skills::{self, SkillRegistry};
use fw_core::llm::ChatConfig;
use fw_core::types::Schedule;
use serde_json::{json, Value};

/// Name of the periodic liveness skill.
pub const HEARTBEAT_SKILL: &str = "heartbeat";

// ---------------------------------------------------------------------------
// Abilities
// ---------------------------------------------------------------------------

/// `echo`, `double`, `remember`, `recall` and `chat`.
pub fn abilities() -> AbilityRegistry {
    let registry = AbilityRegistry::new();
    registry.register_fn("echo", |_, task| Ok(task.clone()));
    registry.register_fn("double", |_, task| {
        let n = task
            .get("input")
            .and_then(Value::as_i64)
            .ok_or_else(|| AbilityError::InvalidInput("`input` must be an integer".into()))?;
        let doubled = n
            .checked_mul(2)
            .ok_or_else(|| AbilityError::InvalidInput(format!("{n} doubled overflows")))?;
        Ok(json!({ "result": doubled }))
    });
    registry.register_fn("remember", |agent, task| {
        let key = required_str(task, "key")?;
        let value = task.get("value").cloned().unwrap_or(Value::Null);
        agent.memory.set(key, value);
        Ok(json!({ "stored": key }))
    });
    registry.register_fn("recall", |agent, task| {
        let key = required_str(task, "key")?;
        let value = agent.memory.get(key).unwrap_or(Value::Null);
        Ok(json!({ "key": key, "value": value }))
    });
    registry.register("chat", Chat);
    registry
}

fn required_str<'a>(task: &'a Value, field: &str) -> abilities::Result<&'a str> {
    task.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AbilityError::InvalidInput(format!("`{field}` must be a non-empty string")))
}

/// Sends `prompt` to the agent's chat provider.
///
/// The agent's `model` and `system_prompt` parameters override the chat
/// defaults. The reply is also kept in memory under `last_reply`.
pub struct Chat;

#[async_trait]
impl Ability for Chat {
    async fn invoke(&self, agent: &mut AgentContext<'_>, task: &Value) -> abilities::Result<Value> {
        let prompt = required_str(task, "prompt")?;
        let mut config = ChatConfig::default();
        if let Some(model) = agent.parameter("model").and_then(Value::as_str) {
            config.model = model.to_string();
        }
        config.system_prompt = agent
            .parameter("system_prompt")
            .and_then(Value::as_str)
            .map(str::to_string);

        let reply = agent.llm.chat(prompt, &config).await?;
        agent.memory.set("last_reply", json!(reply));
        Ok(json!({ "reply": reply, "model": config.model }))
    }
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

/// Registers the `heartbeat` skill, firing every `interval_secs`.
///
/// Each run bumps `heartbeats` and stamps `last_heartbeat` in memory.
pub fn skills(interval_secs: f64) -> skills::Result<SkillRegistry> {
    let registry = SkillRegistry::new();
    registry.register_fn(HEARTBEAT_SKILL, Some(Schedule::Periodic(interval_secs)), |agent| {
        let beats = agent
            .memory
            .get("heartbeats")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        agent.memory.set("heartbeats", json!(beats + 1));
        agent
            .memory
            .set("last_heartbeat", json!(Utc::now().to_rfc3339()));
        Ok(())
    })?;
    Ok(registry)
}
