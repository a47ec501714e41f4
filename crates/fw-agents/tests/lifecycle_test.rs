mod common;

use fw_agents::lifecycle::LifecycleOutcome;
use fw_agents::registry::RegistryError;
use fw_agents::state_machine::LifecycleOp;
use fw_core::types::{AgentConfig, AgentStatus};
use serde_json::json;

use common::wait_for_status;

#[tokio::test]
async fn stop_then_start_again() {
    let registry = common::registry();
    let id = registry.create(AgentConfig::new("d")).await.unwrap().id();

    assert_eq!(
        registry.start(id).await.unwrap(),
        LifecycleOutcome::Changed(AgentStatus::Running)
    );
    assert_eq!(
        registry.stop(id).await.unwrap(),
        LifecycleOutcome::Changed(AgentStatus::Stopped)
    );
    assert_eq!(registry.status(id).await.unwrap().status, AgentStatus::Stopped);

    assert_eq!(
        registry.start(id).await.unwrap(),
        LifecycleOutcome::Changed(AgentStatus::Running)
    );
    let sub = registry
        .execute_agent_task(id, json!({"ability": "double", "input": 21}))
        .await
        .unwrap();
    assert_eq!(sub.to_value()["result"], 42);

    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn repeated_targets_are_noops() {
    let registry = common::registry();
    let id = registry.create(AgentConfig::new("idem")).await.unwrap().id();
    registry.start(id).await.unwrap();

    let before = registry.status(id).await.unwrap();
    assert_eq!(
        registry.start(id).await.unwrap(),
        LifecycleOutcome::Unchanged(AgentStatus::Running)
    );
    assert_eq!(
        registry.resume(id).await.unwrap(),
        LifecycleOutcome::Unchanged(AgentStatus::Running)
    );
    assert_eq!(registry.status(id).await.unwrap().updated_at, before.updated_at);

    assert!(registry.pause(id).await.unwrap().changed());
    assert_eq!(
        registry.pause(id).await.unwrap(),
        LifecycleOutcome::Unchanged(AgentStatus::Paused)
    );

    registry.stop(id).await.unwrap();
    assert_eq!(
        registry.stop(id).await.unwrap(),
        LifecycleOutcome::Unchanged(AgentStatus::Stopped)
    );
}

#[tokio::test]
async fn rejected_operations_leave_status_alone() {
    let registry = common::registry();
    let id = registry.create(AgentConfig::new("strict")).await.unwrap().id();

    // Nothing to stop, pause or resume yet.
    for result in [
        registry.stop(id).await,
        registry.pause(id).await,
        registry.resume(id).await,
    ] {
        assert!(matches!(result, Err(RegistryError::Transition(_))));
    }
    assert_eq!(registry.status(id).await.unwrap().status, AgentStatus::Created);

    registry.start(id).await.unwrap();
    registry.pause(id).await.unwrap();
    match registry.start(id).await {
        Err(RegistryError::Transition(e)) => {
            assert_eq!(e.status, AgentStatus::Paused);
            assert_eq!(e.op, LifecycleOp::Start);
        }
        other => panic!("expected a rejected start, got {other:?}"),
    }
    assert_eq!(registry.status(id).await.unwrap().status, AgentStatus::Paused);
    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn error_must_be_cleared_before_restart() {
    let registry = common::registry();
    let id = registry.create(AgentConfig::new("broken")).await.unwrap().id();
    registry.start(id).await.unwrap();
    registry
        .execute_agent_task(id, json!({"ability": "explode"}))
        .await
        .unwrap();
    assert!(wait_for_status(&registry, id, AgentStatus::Error).await);

    assert!(matches!(registry.start(id).await, Err(RegistryError::Transition(_))));
    // Stopping an errored agent is a no-op.
    assert_eq!(
        registry.stop(id).await.unwrap(),
        LifecycleOutcome::Unchanged(AgentStatus::Error)
    );

    assert_eq!(
        registry.clear_error(id).await.unwrap(),
        LifecycleOutcome::Changed(AgentStatus::Stopped)
    );
    let snap = registry.status(id).await.unwrap();
    assert!(snap.last_error.is_none());
    assert!(snap.error_at.is_none());

    assert_eq!(registry.start(id).await.unwrap().status(), AgentStatus::Running);
    registry.stop(id).await.unwrap();
}

#[tokio::test]
async fn status_watch_follows_transitions() {
    let registry = common::registry();
    let agent = registry.create(AgentConfig::new("watched")).await.unwrap();
    let mut rx = agent.subscribe_status();
    assert_eq!(*rx.borrow(), AgentStatus::Created);

    registry.start(agent.id()).await.unwrap();
    assert_eq!(*rx.borrow_and_update(), AgentStatus::Running);
    assert_eq!(agent.observed_status(), AgentStatus::Running);

    registry.stop(agent.id()).await.unwrap();
    assert_eq!(*rx.borrow_and_update(), AgentStatus::Stopped);
}

#[tokio::test]
async fn delete_stops_running_agent() {
    let registry = common::registry();
    let agent = registry.create(AgentConfig::new("gone")).await.unwrap();
    let id = agent.id();
    registry.start(id).await.unwrap();

    registry.delete(id).await.unwrap();
    assert_eq!(agent.observed_status(), AgentStatus::Stopped);
    assert!(!registry.contains(id).await);
    assert!(registry.list(None, None).await.is_empty());
}

#[tokio::test]
async fn stop_all_stops_every_active_agent() {
    let registry = common::registry();
    let a = registry.create(AgentConfig::new("a")).await.unwrap().id();
    let b = registry.create(AgentConfig::new("b")).await.unwrap().id();
    let c = registry.create(AgentConfig::new("c")).await.unwrap().id();
    registry.start(a).await.unwrap();
    registry.start(b).await.unwrap();
    registry.pause(b).await.unwrap();

    assert_eq!(registry.stop_all().await, 0);
    assert_eq!(registry.status(a).await.unwrap().status, AgentStatus::Stopped);
    assert_eq!(registry.status(b).await.unwrap().status, AgentStatus::Stopped);
    assert_eq!(registry.status(c).await.unwrap().status, AgentStatus::Created);
}
