#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fw_agents::abilities::{AbilityError, AbilityRegistry};
use fw_agents::registry::AgentRegistry;
use fw_core::config::RuntimeConfig;
use fw_core::types::{AgentId, AgentStatus};
use serde_json::json;

/// Short ticks and timeouts so tests settle quickly.
pub fn settings() -> RuntimeConfig {
    RuntimeConfig {
        idle_tick_ms: 20,
        restart_delay_ms: 50,
        stop_timeout_secs: 5,
        start_timeout_secs: 5,
        ..RuntimeConfig::default()
    }
}

/// `double`, `echo` and `explode`.
pub fn abilities() -> Arc<AbilityRegistry> {
    let abilities = AbilityRegistry::new();
    abilities.register_fn("double", |_, task| {
        let n = task["input"]
            .as_i64()
            .ok_or_else(|| AbilityError::InvalidInput("`input` must be an integer".into()))?;
        Ok(json!({ "result": n * 2 }))
    });
    abilities.register_fn("echo", |_, task| Ok(task.clone()));
    abilities.register_fn("explode", |_, _| Err(AbilityError::failed("boom")));
    Arc::new(abilities)
}

pub fn registry() -> AgentRegistry {
    AgentRegistry::builder(settings())
        .abilities(abilities())
        .build()
        .unwrap()
}

/// Register `name` as an ability that appends `task["tag"]` to `log`.
pub fn register_recorder(abilities: &AbilityRegistry, name: &str, log: Arc<Mutex<Vec<i64>>>) {
    abilities.register_fn(name, move |_, task| {
        let tag = task["tag"].as_i64().unwrap_or(-1);
        log.lock().unwrap().push(tag);
        Ok(json!({ "tag": tag }))
    });
}

/// Register `name` as an ability that only counts its calls.
pub fn register_counter(abilities: &AbilityRegistry, name: &str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    abilities.register_fn(name, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!(null))
    });
    calls
}

/// Poll `check` every 20ms for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub async fn wait_for_status(registry: &AgentRegistry, id: AgentId, status: AgentStatus) -> bool {
    eventually(move || async move {
        registry
            .status(id)
            .await
            .map(|s| s.status == status)
            .unwrap_or(false)
    })
    .await
}
