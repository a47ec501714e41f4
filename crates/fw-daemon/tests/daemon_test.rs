use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fw_agents::persistence::{JsonFileStore, MemoryStore, PersistenceStore};
use fw_core::config::Config;
use fw_core::types::{AgentConfig, AgentStatus};
use fw_daemon::builtins::HEARTBEAT_SKILL;
use fw_daemon::daemon::{BootReport, Daemon};
use fw_daemon::health::HealthMonitor;
use serde_json::json;

fn config() -> Config {
    Config::from_toml(
        r#"
        [runtime]
        idle_tick_ms = 20
        restart_delay_ms = 50
        stop_timeout_secs = 5

        [persistence]
        enabled = false

        [health]
        poll_interval_secs = 1
        stale_after_secs = 60

        [[agents]]
        name = "pulse"
        abilities = ["heartbeat", "echo"]
        autostart = true

        [[agents]]
        name = "idle"
        agent_type = "spare"
        "#,
    )
    .unwrap()
}

fn daemon_with(store: Arc<dyn PersistenceStore>) -> Daemon {
    Daemon::with_store(config(), Some(store)).unwrap()
}

#[tokio::test]
async fn boot_creates_configured_agents() {
    let daemon = Daemon::with_store(config(), None).unwrap();
    let report = daemon.boot().await.unwrap();
    assert_eq!(
        report,
        BootReport {
            restored: 0,
            restarted: 0,
            created: 2,
            autostarted: 1,
        }
    );

    let registry = daemon.registry();
    let running = registry.list(None, Some(AgentStatus::Running)).await;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].name, "pulse");
    let spare = registry.list(Some("spare"), None).await;
    assert_eq!(spare[0].status, AgentStatus::Created);

    // Abilities that name a registered skill get a skill state.
    let snap = registry.status(running[0].id).await.unwrap();
    assert!(snap.skills.iter().any(|s| s.name == HEARTBEAT_SKILL));

    daemon.drain().await.unwrap();
    assert!(registry.list(None, Some(AgentStatus::Running)).await.is_empty());
}

#[tokio::test]
async fn boot_restores_instead_of_recreating() {
    let store = Arc::new(MemoryStore::new());
    let first = daemon_with(store.clone());
    first.boot().await.unwrap();
    let pulse = first.registry().list(None, Some(AgentStatus::Running)).await[0].id;
    first
        .registry()
        .execute_agent_task(pulse, json!({"ability": "echo", "n": 1}))
        .await
        .unwrap();
    assert_eq!(first.registry().save_snapshot().await.unwrap(), 2);

    let second = daemon_with(Arc::new(MemoryStore::with_snapshots(store.last().await)));
    let report = second.boot().await.unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(report.restarted, 1);
    assert_eq!(report.created, 0);

    let snap = second.registry().status(pulse).await.unwrap();
    assert_eq!(snap.status, AgentStatus::Running);
    assert_eq!(snap.tasks.len(), 1);

    first.drain().await.unwrap();
    second.drain().await.unwrap();
}

#[tokio::test]
async fn run_until_shutdown_then_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agents.json");
    let daemon = Arc::new(daemon_with(Arc::new(JsonFileStore::new(&path))));

    let runner = {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move { daemon.run().await })
    };
    let registry = daemon.registry().clone();
    for _ in 0..100 {
        if registry.list(None, Some(AgentStatus::Running)).await.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    daemon.shutdown();
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(registry.list(None, Some(AgentStatus::Running)).await.is_empty());
    let saved = JsonFileStore::new(&path).load().await.unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|a| a.status != AgentStatus::Running));
}

#[tokio::test]
async fn health_reports_errors_and_bounces_agents() {
    let daemon = Daemon::with_store(config(), None).unwrap();
    let registry = daemon.registry();
    let broken = registry
        .create(AgentConfig::new("broken").with_abilities(["double"]))
        .await
        .unwrap()
        .id();
    registry.start(broken).await.unwrap();
    registry
        .execute_agent_task(broken, json!({"ability": "double", "input": "x"}))
        .await
        .unwrap();

    let healthy = registry.create(AgentConfig::new("fine")).await.unwrap().id();
    registry.start(healthy).await.unwrap();

    let monitor = HealthMonitor::new(Duration::from_secs(60));
    let report = monitor.inspect(registry, Utc::now()).await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.running, 1);
    assert_eq!(report.errored.len(), 1);
    assert_eq!(report.errored[0].agent_id, broken);
    assert!(report.errored[0].last_error.is_some());
    assert!(report.stale.is_empty());
    assert!(!report.is_healthy());

    assert!(monitor.recover(registry, healthy).await);
    assert_eq!(registry.status(healthy).await.unwrap().status, AgentStatus::Running);

    // Nothing to stop on an errored agent, and it cannot be started.
    assert!(!monitor.recover(registry, broken).await);

    daemon.drain().await.unwrap();
}
