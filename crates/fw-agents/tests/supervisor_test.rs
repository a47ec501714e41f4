mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fw_agents::abilities::AbilityError;
use fw_agents::registry::AgentRegistry;
use fw_agents::skills::SkillRegistry;
use fw_core::config::RuntimeConfig;
use fw_core::types::{AgentConfig, AgentStatus, Schedule, TaskRequest, TaskStatus};
use serde_json::json;

use common::{eventually, settings, wait_for_status};

/// Registry whose `flaky` ability fails on its first call only.
fn flaky_registry(runtime: RuntimeConfig) -> (AgentRegistry, Arc<AtomicUsize>) {
    let abilities = common::abilities();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    abilities.register_fn("flaky", move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(AbilityError::failed("first call always fails"))
        } else {
            Ok(json!("ok"))
        }
    });
    let registry = AgentRegistry::builder(runtime)
        .abilities(abilities)
        .build()
        .unwrap();
    (registry, calls)
}

#[tokio::test]
async fn errored_agent_is_restarted() {
    let (registry, _) = flaky_registry(RuntimeConfig {
        auto_restart: true,
        ..settings()
    });
    let id = registry.create(AgentConfig::new("phoenix")).await.unwrap().id();
    registry.start(id).await.unwrap();

    let first = registry
        .execute_agent_task(id, json!({"ability": "flaky"}))
        .await
        .unwrap();
    assert!(!first.success);

    let seen = registry.clone();
    assert!(eventually(move || {
        let seen = seen.clone();
        async move {
            seen
                .status(id)
                .await
                .map(|s| s.status == AgentStatus::Running && s.restarts == 1)
                .unwrap_or(false)
        }
    })
    .await);

    let snap = registry.status(id).await.unwrap();
    assert!(snap.last_error.is_none());
    assert_eq!(
        registry.task_status(id, first.task_id).await.unwrap(),
        TaskStatus::Failed
    );

    let second = registry
        .execute_agent_task(id, json!({"ability": "flaky"}))
        .await
        .unwrap();
    assert!(second.success);

    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn errored_agent_stays_down_without_auto_restart() {
    let (registry, _) = flaky_registry(settings());
    let id = registry.create(AgentConfig::new("grounded")).await.unwrap().id();
    registry.start(id).await.unwrap();

    registry
        .execute_agent_task(id, json!({"ability": "flaky"}))
        .await
        .unwrap();
    assert!(wait_for_status(&registry, id, AgentStatus::Error).await);

    // Several restart delays later it is still in ERROR.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let snap = registry.status(id).await.unwrap();
    assert_eq!(snap.status, AgentStatus::Error);
    assert_eq!(snap.restarts, 0);
    assert!(snap.last_error.is_some());
}

#[tokio::test]
async fn deleted_agent_is_not_restarted() {
    let (registry, _) = flaky_registry(RuntimeConfig {
        auto_restart: true,
        restart_delay_ms: 200,
        ..settings()
    });
    let id = registry.create(AgentConfig::new("ghost")).await.unwrap().id();
    registry.start(id).await.unwrap();
    registry
        .execute_agent_task(id, json!({"ability": "flaky"}))
        .await
        .unwrap();

    registry.delete(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!registry.contains(id).await);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn panicking_loop_lands_in_error() {
    let abilities = common::abilities();
    abilities.register_fn("panic", |_, _| panic!("kaboom"));
    let registry = AgentRegistry::builder(settings())
        .abilities(abilities)
        .build()
        .unwrap();
    let agent = registry.create(AgentConfig::new("fragile")).await.unwrap();
    let id = agent.id();
    registry.start(id).await.unwrap();

    let sub = registry
        .submit(id, TaskRequest::new("panic").queued(0))
        .await
        .unwrap();
    assert!(wait_for_status(&registry, id, AgentStatus::Error).await);

    let snap = registry.status(id).await.unwrap();
    let reason = snap.last_error.unwrap_or_default();
    assert!(reason.contains("crashed"), "unexpected error: {reason}");
    assert!(reason.contains("kaboom"), "unexpected error: {reason}");

    let task = registry.task_result(id, sub.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap_or_default().contains("kaboom"));

    // The registry is still usable and the agent can be recovered.
    registry.clear_error(id).await.unwrap();
    assert_eq!(registry.start(id).await.unwrap().status(), AgentStatus::Running);
    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn panicking_direct_task_is_failed_not_lost() {
    let abilities = common::abilities();
    abilities.register_fn("panic", |_, _| panic!("kaboom"));
    let registry = AgentRegistry::builder(settings())
        .abilities(abilities)
        .build()
        .unwrap();
    let id = registry.create(AgentConfig::new("brittle")).await.unwrap().id();
    registry.start(id).await.unwrap();

    let sub = registry.submit(id, TaskRequest::new("panic")).await.unwrap();
    assert!(!sub.success);
    assert!(sub.error.unwrap_or_default().contains("kaboom"));
    assert_eq!(
        registry.task_status(id, sub.task_id).await.unwrap(),
        TaskStatus::Failed
    );

    assert!(wait_for_status(&registry, id, AgentStatus::Error).await);
    let snap = registry.status(id).await.unwrap();
    assert!(snap.last_error.unwrap_or_default().contains("crashed"));
}

#[tokio::test]
async fn panicking_skill_crashes_the_loop_into_error() {
    let skills = SkillRegistry::new();
    skills
        .register_fn("boom", Some(Schedule::Periodic(0.01)), |_| panic!("skill blew up"))
        .unwrap();
    let registry = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .skills(Arc::new(skills))
        .build()
        .unwrap();
    let id = registry
        .create(AgentConfig::new("unstable").with_abilities(["boom"]))
        .await
        .unwrap()
        .id();
    registry.start(id).await.unwrap();

    assert!(wait_for_status(&registry, id, AgentStatus::Error).await);
    let reason = registry.status(id).await.unwrap().last_error.unwrap_or_default();
    assert!(reason.contains("execution loop crashed"), "unexpected error: {reason}");
    assert!(reason.contains("skill blew up"), "unexpected error: {reason}");
}
