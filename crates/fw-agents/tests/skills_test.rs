mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use fw_agents::registry::{AgentRegistry, RegistryError};
use fw_agents::skills::{SkillError, SkillRegistry};
use fw_core::types::{AgentConfig, AgentStatus, Schedule};
use serde_json::json;

use common::{eventually, settings};

fn registry_with(skills: SkillRegistry) -> AgentRegistry {
    AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .skills(Arc::new(skills))
        .build()
        .unwrap()
}

#[tokio::test]
async fn periodic_skill_fires_without_wakeups() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let skills = SkillRegistry::new();
    skills
        .register_fn("tick", Some(Schedule::Periodic(0.05)), move |agent| {
            counter.fetch_add(1, Ordering::SeqCst);
            agent.memory.set("ticked", json!(true));
            Ok(())
        })
        .unwrap();
    let registry = registry_with(skills);
    let id = registry
        .create(AgentConfig::new("ticker").with_abilities(["tick"]))
        .await
        .unwrap()
        .id();
    registry.start(id).await.unwrap();

    let seen = Arc::clone(&runs);
    assert!(eventually(move || {
        let seen = Arc::clone(&seen);
        async move { seen.load(Ordering::SeqCst) >= 3 }
    })
    .await);

    let snap = registry.status(id).await.unwrap();
    assert_eq!(snap.skills.len(), 1);
    assert!(snap.skills[0].last_executed.is_some());
    assert!(snap.skills[0].experience > 0.0);
    assert!(snap.memory.iter().any(|(k, _)| k == "ticked"));

    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn failing_skill_is_penalised_but_agent_keeps_running() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let skills = SkillRegistry::new();
    skills
        .register_fn("flaky", Some(Schedule::Periodic(0.02)), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SkillError::failed("nope"))
        })
        .unwrap();
    let registry = registry_with(skills);
    let id = registry
        .create(AgentConfig::new("resilient").with_abilities(["flaky"]))
        .await
        .unwrap()
        .id();
    registry.start(id).await.unwrap();

    let seen = Arc::clone(&runs);
    assert!(eventually(move || {
        let seen = Arc::clone(&seen);
        async move { seen.load(Ordering::SeqCst) >= 2 }
    })
    .await);

    let snap = registry.status(id).await.unwrap();
    assert_eq!(snap.status, AgentStatus::Running);
    assert!(snap.last_error.is_none());
    assert!(snap.skills[0].experience < 0.0);

    // Tasks still run alongside.
    let sub = registry
        .execute_agent_task(id, json!({"ability": "double", "input": 4}))
        .await
        .unwrap();
    assert!(sub.success);

    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn event_skills_fire_only_on_trigger() {
    let skills = SkillRegistry::new();
    skills
        .register_fn("on_deploy", Some(Schedule::Event("deploy".into())), |agent| {
            let version = agent
                .event
                .and_then(|e| e.get("version"))
                .cloned()
                .unwrap_or(json!(null));
            agent.memory.set("deployed", version);
            Ok(())
        })
        .unwrap();
    skills
        .register_fn("on_deploy_fail", Some(Schedule::Event("deploy".into())), |_| {
            Err(SkillError::failed("rollback"))
        })
        .unwrap();
    skills
        .register_fn("on_other", Some(Schedule::Event("other".into())), |_| Ok(()))
        .unwrap();
    let registry = registry_with(skills);
    let id = registry
        .create(
            AgentConfig::new("events").with_abilities(["on_deploy", "on_deploy_fail", "on_other"]),
        )
        .await
        .unwrap()
        .id();

    let early = registry.trigger_agent_event(id, "deploy", json!({})).await;
    assert!(matches!(early, Err(RegistryError::NotRunning { .. })));

    registry.start(id).await.unwrap();
    let runs = registry
        .trigger_agent_event(id, "deploy", json!({"version": "1.2.3"}))
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    let ok = runs.iter().find(|r| r.skill == "on_deploy").unwrap();
    let failed = runs.iter().find(|r| r.skill == "on_deploy_fail").unwrap();
    assert!(ok.success);
    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("rollback"));

    let snap = registry.status(id).await.unwrap();
    assert_eq!(snap.status, AgentStatus::Running);
    assert!(snap
        .memory
        .iter()
        .any(|(k, v)| k == "deployed" && v == &json!("1.2.3")));
    let other = snap.skills.iter().find(|s| s.name == "on_other").unwrap();
    assert!(other.last_executed.is_none());

    assert!(registry
        .trigger_agent_event(id, "nobody-listens", json!(null))
        .await
        .unwrap()
        .is_empty());

    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn once_skill_runs_a_single_time() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let skills = SkillRegistry::new();
    skills
        .register_fn(
            "boot",
            Some(Schedule::Once(Utc::now() - Duration::seconds(1))),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();
    let registry = registry_with(skills);
    let id = registry
        .create(AgentConfig::new("once").with_abilities(["boot"]))
        .await
        .unwrap()
        .id();
    registry.start(id).await.unwrap();

    let seen = Arc::clone(&runs);
    assert!(eventually(move || {
        let seen = Arc::clone(&seen);
        async move { seen.load(Ordering::SeqCst) == 1 }
    })
    .await);
    // Several idle ticks later it still ran only once.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    registry.stop(id).await.unwrap();
}
