use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fw_core::types::{AgentId, AgentStatus, TaskMode, TaskStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentSnapshot};
use crate::registry::{AgentRegistry, Result};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    Version(u32),
    #[error("store error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// PersistenceStore
// ---------------------------------------------------------------------------

/// Where fleet snapshots go. `save` is called on loop teardown and by the
/// periodic snapshot timer; `load` once at startup.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save(&self, agents: &[AgentSnapshot]) -> std::result::Result<(), PersistenceError>;

    async fn load(&self) -> std::result::Result<Vec<AgentSnapshot>, PersistenceError>;
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    saved_at: DateTime<Utc>,
    agents: Vec<AgentSnapshot>,
}

/// Single JSON document on disk, replaced atomically on every save.
///
/// Saves are serialized: teardown, the snapshot timer and shutdown may all
/// write at once, and they share one temp file.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "agents.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn save(&self, agents: &[AgentSnapshot]) -> std::result::Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let doc = SnapshotFile {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            agents: agents.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        let _guard = self.write_lock.lock().await;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), agents = agents.len(), "snapshot written");
        Ok(())
    }

    async fn load(&self) -> std::result::Result<Vec<AgentSnapshot>, PersistenceError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let doc: SnapshotFile = serde_json::from_slice(&data)?;
        if doc.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::Version(doc.version));
        }
        Ok(doc.agents)
    }
}

/// Keeps the last saved snapshot in memory. Useful for tests and for
/// running without a data directory.
#[derive(Default)]
pub struct MemoryStore {
    agents: Mutex<Vec<AgentSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(agents: Vec<AgentSnapshot>) -> Self {
        Self {
            agents: Mutex::new(agents),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn last(&self) -> Vec<AgentSnapshot> {
        self.agents.lock().await.clone()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save(&self, agents: &[AgentSnapshot]) -> std::result::Result<(), PersistenceError> {
        *self.agents.lock().await = agents.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> std::result::Result<Vec<AgentSnapshot>, PersistenceError> {
        Ok(self.agents.lock().await.clone())
    }
}

// ---------------------------------------------------------------------------
// Registry integration
// ---------------------------------------------------------------------------

impl AgentRegistry {
    pub fn has_store(&self) -> bool {
        self.shared.store.is_some()
    }

    /// Snapshot every agent and hand the batch to the store.
    ///
    /// Agents are visited under the registry lock, each under its own lock
    /// in turn. Returns the number of agents saved (0 without a store).
    pub async fn save_snapshot(&self) -> Result<usize> {
        let Some(store) = &self.shared.store else {
            return Ok(0);
        };
        let snapshots = {
            let tables = self.shared.tables.lock().await;
            let mut out = Vec::with_capacity(tables.agents.len());
            for agent in tables.agents.values() {
                out.push(agent.lock().await.snapshot());
            }
            out
        };
        store.save(&snapshots).await?;
        info!(agents = snapshots.len(), "agent snapshot saved");
        Ok(snapshots.len())
    }

    /// Best-effort save; failures are logged.
    pub(crate) async fn persist(&self) {
        if let Err(e) = self.save_snapshot().await {
            warn!(error = %e, "failed to save agent snapshot");
        }
    }

    /// Load from the configured store and restore. No store, no agents.
    pub async fn load_and_restore(&self) -> Result<Vec<AgentId>> {
        let Some(store) = self.shared.store.clone() else {
            return Ok(Vec::new());
        };
        let snapshots = store.load().await?;
        self.restore(snapshots).await
    }

    /// Recreate agents from snapshots with their original ids.
    ///
    /// Agents that were active come back STOPPED and their ids are
    /// returned so the caller can start them again. Pending queued tasks
    /// are re-enqueued; tasks caught mid-run are failed. Snapshots whose
    /// id is already present, or that no longer build, are skipped.
    pub async fn restore(&self, snapshots: Vec<AgentSnapshot>) -> Result<Vec<AgentId>> {
        let mut was_active = Vec::new();
        let mut restored = 0usize;

        for snap in snapshots {
            let id = snap.id;
            if self.contains(id).await {
                warn!(agent_id = %id, "agent already present; snapshot skipped");
                continue;
            }
            let active = matches!(
                snap.status,
                AgentStatus::Running | AgentStatus::Paused | AgentStatus::Initializing
            );
            let agent = match self.rebuild(snap) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "could not restore agent");
                    continue;
                }
            };
            self.shared.tables.lock().await.agents.insert(id, agent);
            restored += 1;
            if active {
                was_active.push(id);
            }
        }

        info!(restored, to_restart = was_active.len(), "agents restored from snapshot");
        Ok(was_active)
    }

    fn rebuild(&self, snap: AgentSnapshot) -> Result<Arc<Agent>> {
        let mut core = self.build_core(snap.id, snap.config)?;
        core.created_at = snap.created_at;
        core.updated_at = snap.updated_at;
        core.last_activity = snap.last_activity;
        core.last_error = snap.last_error;
        core.error_at = snap.error_at;
        core.restarts = snap.restarts;
        core.status = match snap.status {
            AgentStatus::Running | AgentStatus::Paused | AgentStatus::Initializing => AgentStatus::Stopped,
            other => other,
        };

        for saved in snap.skills {
            if let Some(state) = core.skills.get_mut(&saved.name) {
                state.experience = saved.experience;
                state.last_executed = saved.last_executed;
            }
        }
        for (key, value) in snap.memory {
            core.memory.set(&key, value);
        }
        for mut task in snap.tasks {
            match (task.status, task.mode) {
                (TaskStatus::Pending, TaskMode::Queue) => {
                    core.queue.enqueue(task.task_id, task.priority);
                }
                (TaskStatus::Pending, TaskMode::Direct) | (TaskStatus::Running, _) => {
                    task.fail("interrupted by restart");
                }
                _ => {}
            }
            core.ledger.insert(task);
        }
        core.ledger.restore_history(snap.history);

        Ok(Arc::new(Agent::new(core)))
    }
}
