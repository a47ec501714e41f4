mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use fw_agents::persistence::{JsonFileStore, MemoryStore, PersistenceStore};
use fw_agents::registry::AgentRegistry;
use fw_core::types::{AgentConfig, AgentStatus, TaskRequest, TaskResult, TaskStatus};
use fw_telemetry::metrics::{MetricKind, MetricsCollector, MetricsError, MetricsSink};
use serde_json::json;
use uuid::Uuid;

use common::{eventually, register_counter, settings};

#[tokio::test]
async fn loop_exit_writes_a_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let registry = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .persistence(store.clone())
        .build()
        .unwrap();
    let id = registry.create(AgentConfig::new("saved")).await.unwrap().id();
    registry.start(id).await.unwrap();
    assert_eq!(store.saves(), 0);

    registry.stop(id).await.unwrap();
    assert!(store.saves() >= 1);
    let saved = store.last().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, id);
    assert_eq!(saved[0].status, AgentStatus::Stopped);
}

#[tokio::test]
async fn restore_brings_agents_back_stopped() {
    // First process: a paused agent with queued work and some memory.
    let abilities = common::abilities();
    register_counter(&abilities, "count");
    abilities.register_fn("remember", |agent, task| {
        agent.memory.set("favourite", task["colour"].clone());
        Ok(json!(null))
    });
    let store = Arc::new(MemoryStore::new());
    let first = AgentRegistry::builder(settings())
        .abilities(abilities)
        .persistence(store.clone())
        .build()
        .unwrap();
    let id = first
        .create(AgentConfig::new("survivor").with_type("worker"))
        .await
        .unwrap()
        .id();
    first.start(id).await.unwrap();
    first
        .execute_agent_task(id, json!({"ability": "remember", "colour": "blue"}))
        .await
        .unwrap();
    first.pause(id).await.unwrap();
    for p in [3, 1] {
        first
            .submit(id, TaskRequest::new("count").queued(p))
            .await
            .unwrap();
    }
    let done = first
        .submit(id, TaskRequest::new("count"))
        .await
        .unwrap();
    assert!(!done.success, "direct tasks need RUNNING");
    assert_eq!(first.save_snapshot().await.unwrap(), 1);

    // Simulate a crash mid-task.
    let mut snapshots = store.last().await;
    let mut interrupted = TaskResult::pending(id, &TaskRequest::new("count"));
    interrupted.advance(TaskStatus::Running);
    let interrupted_id = interrupted.task_id;
    snapshots[0].tasks.push(interrupted);

    // Second process.
    let abilities = common::abilities();
    let calls = register_counter(&abilities, "count");
    let second = AgentRegistry::builder(settings())
        .abilities(abilities)
        .persistence(Arc::new(MemoryStore::with_snapshots(snapshots)))
        .build()
        .unwrap();
    let to_restart = second.load_and_restore().await.unwrap();
    assert_eq!(to_restart, vec![id]);

    let snap = second.status(id).await.unwrap();
    assert_eq!(snap.status, AgentStatus::Stopped);
    assert_eq!(snap.agent_type(), "worker");
    assert_eq!(snap.queue_len, 2);
    assert!(snap
        .memory
        .iter()
        .any(|(k, v)| k == "favourite" && v == &json!("blue")));

    let lost = second.task_result(id, interrupted_id).await.unwrap();
    assert_eq!(lost.status, TaskStatus::Failed);
    assert!(lost.error.unwrap_or_default().contains("interrupted"));
    assert_eq!(
        second.task_status(id, done.task_id).await.unwrap(),
        TaskStatus::Failed
    );

    // Restoring the same snapshot again is a no-op.
    assert!(second.load_and_restore().await.unwrap().is_empty());
    assert_eq!(second.len().await, 1);

    second.start(id).await.unwrap();
    let seen = Arc::clone(&calls);
    assert!(eventually(move || {
        let seen = Arc::clone(&seen);
        async move { seen.load(Ordering::SeqCst) == 2 }
    })
    .await);
    second.stop(id).await.unwrap();
}

#[tokio::test]
async fn errored_agents_restore_as_errored() {
    let store = Arc::new(MemoryStore::new());
    let first = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .persistence(store.clone())
        .build()
        .unwrap();
    let id = first.create(AgentConfig::new("scarred")).await.unwrap().id();
    first.start(id).await.unwrap();
    first
        .execute_agent_task(id, json!({"ability": "explode"}))
        .await
        .unwrap();
    assert!(common::wait_for_status(&first, id, AgentStatus::Error).await);
    first.save_snapshot().await.unwrap();

    let second = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .build()
        .unwrap();
    let to_restart = second.restore(store.last().await).await.unwrap();
    assert!(to_restart.is_empty());
    let snap = second.status(id).await.unwrap();
    assert_eq!(snap.status, AgentStatus::Error);
    assert!(snap.last_error.unwrap_or_default().contains("boom"));
}

#[tokio::test]
async fn json_file_store_survives_registry_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agents.json");

    let first = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .persistence(Arc::new(JsonFileStore::new(&path)))
        .build()
        .unwrap();
    let a = first.create(AgentConfig::new("a")).await.unwrap().id();
    let b = first.create(AgentConfig::new("b")).await.unwrap().id();
    first.start(a).await.unwrap();
    assert_eq!(first.save_snapshot().await.unwrap(), 2);

    let second = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .persistence(Arc::new(JsonFileStore::new(&path)))
        .build()
        .unwrap();
    let to_restart = second.load_and_restore().await.unwrap();
    assert_eq!(to_restart, vec![a]);
    assert_eq!(second.status(b).await.unwrap().status, AgentStatus::Created);

    let on_disk = JsonFileStore::new(&path).load().await.unwrap();
    assert_eq!(on_disk.len(), 2);
    first.stop(a).await.unwrap();
}

#[tokio::test]
async fn task_metrics_are_cleared_on_delete() {
    let collector = Arc::new(MetricsCollector::new());
    let registry = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .metrics(collector.clone())
        .build()
        .unwrap();
    let id = registry.create(AgentConfig::new("measured")).await.unwrap().id();
    registry.start(id).await.unwrap();

    for n in 0..2 {
        registry
            .execute_agent_task(id, json!({"ability": "double", "input": n}))
            .await
            .unwrap();
    }
    assert_eq!(collector.agent_counter_total(id, "tasks_total"), 2);
    assert!(collector.series_for_agent(id) > 0);

    registry.delete(id).await.unwrap();
    assert_eq!(collector.series_for_agent(id), 0);
}

struct BrokenSink;

impl MetricsSink for BrokenSink {
    fn record(
        &self,
        _agent_id: Uuid,
        _name: &str,
        _value: f64,
        _kind: MetricKind,
        _tags: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        Err(MetricsError::Unavailable("down".into()))
    }

    fn clear_agent(&self, _agent_id: Uuid) -> Result<(), MetricsError> {
        Err(MetricsError::Unavailable("down".into()))
    }
}

#[tokio::test]
async fn failing_metrics_sink_does_not_affect_agents() {
    let registry = AgentRegistry::builder(settings())
        .abilities(common::abilities())
        .metrics(Arc::new(BrokenSink))
        .build()
        .unwrap();
    let id = registry.create(AgentConfig::new("unmeasured")).await.unwrap().id();
    registry.start(id).await.unwrap();

    let sub = registry
        .execute_agent_task(id, json!({"ability": "double", "input": 4}))
        .await
        .unwrap();
    assert!(sub.success);
    assert_eq!(registry.status(id).await.unwrap().status, AgentStatus::Running);

    registry.delete(id).await.unwrap();
    assert!(registry.get(id).await.is_err());
}
