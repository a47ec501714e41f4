use std::time::Duration;

use chrono::{DateTime, Utc};
use fw_agents::agent::AgentSummary;
use fw_agents::registry::AgentRegistry;
use fw_core::types::{AgentId, AgentStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A RUNNING agent with queued work that has shown no activity within the
/// staleness threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleAgent {
    pub agent_id: AgentId,
    pub name: String,
    pub last_activity: DateTime<Utc>,
    pub queue_len: usize,
    /// How long the agent has been quiet.
    #[serde(with = "duration_serde")]
    pub idle_for: Duration,
}

/// An agent sitting in ERROR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErroredAgent {
    pub agent_id: AgentId,
    pub name: String,
    pub last_error: Option<String>,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationRepr {
        secs: u64,
        nanos: u32,
    }

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        DurationRepr {
            secs: dur.as_secs(),
            nanos: dur.subsec_nanos(),
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let repr = DurationRepr::deserialize(d)?;
        Ok(Duration::new(repr.secs, repr.nanos))
    }
}

/// Result of one health pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked: usize,
    pub running: usize,
    pub stale: Vec<StaleAgent>,
    pub errored: Vec<ErroredAgent>,
    /// Stale agents that came back RUNNING after stop + start.
    pub recovered: Vec<AgentId>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.stale.is_empty() && self.errored.is_empty()
    }
}

/// Polls the registry for stuck and failed agents.
///
/// A loop that stopped making progress while work is waiting is bounced
/// with stop + start. ERROR agents are only reported; restarting them is
/// the supervisor's job.
pub struct HealthMonitor {
    stale_after: Duration,
}

impl HealthMonitor {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Classify every agent as of `now` without touching any of them.
    pub async fn inspect(&self, registry: &AgentRegistry, now: DateTime<Utc>) -> HealthReport {
        let agents = registry.list(None, None).await;
        let mut report = HealthReport {
            checked: agents.len(),
            ..HealthReport::default()
        };
        for agent in agents {
            match agent.status {
                AgentStatus::Running => {
                    report.running += 1;
                    if let Some(stale) = self.stale(&agent, now) {
                        report.stale.push(stale);
                    }
                }
                AgentStatus::Error => report.errored.push(ErroredAgent {
                    agent_id: agent.id,
                    name: agent.name,
                    last_error: agent.last_error,
                }),
                _ => {}
            }
        }
        report
    }

    fn stale(&self, agent: &AgentSummary, now: DateTime<Utc>) -> Option<StaleAgent> {
        if agent.queue_len == 0 {
            return None;
        }
        let idle_for = now
            .signed_duration_since(agent.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);
        (idle_for > self.stale_after).then(|| StaleAgent {
            agent_id: agent.id,
            name: agent.name.clone(),
            last_activity: agent.last_activity,
            queue_len: agent.queue_len,
            idle_for,
        })
    }

    /// Inspect, then bounce every stale agent.
    pub async fn check(&self, registry: &AgentRegistry) -> HealthReport {
        let mut report = self.inspect(registry, Utc::now()).await;

        for stale in &report.stale {
            warn!(
                agent_id = %stale.agent_id,
                name = %stale.name,
                queue_len = stale.queue_len,
                idle_for_secs = stale.idle_for.as_secs(),
                "agent is stale"
            );
            if self.recover(registry, stale.agent_id).await {
                report.recovered.push(stale.agent_id);
            }
        }
        for errored in &report.errored {
            warn!(
                agent_id = %errored.agent_id,
                name = %errored.name,
                error = errored.last_error.as_deref().unwrap_or("unknown"),
                "agent in error state"
            );
        }
        report
    }

    /// Stop then start one agent. Returns whether it ended up RUNNING.
    pub async fn recover(&self, registry: &AgentRegistry, id: AgentId) -> bool {
        if let Err(e) = registry.stop(id).await {
            warn!(agent_id = %id, error = %e, "health recovery: stop failed");
            return false;
        }
        match registry.start(id).await {
            Ok(outcome) if outcome.status() == AgentStatus::Running => {
                info!(agent_id = %id, "health recovery: agent restarted");
                true
            }
            Ok(outcome) => {
                warn!(agent_id = %id, status = %outcome.status(), "health recovery: agent not running");
                false
            }
            Err(e) => {
                warn!(agent_id = %id, error = %e, "health recovery: start failed");
                false
            }
        }
    }
}
