//! Skill scheduling: the per-iteration pass over time-based skills and the
//! explicit event trigger.

use chrono::Utc;
use fw_core::types::{AgentId, AgentStatus};
use fw_telemetry::metrics::MetricKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentCore};
use crate::registry::{AgentRegistry, RegistryError, Result};

/// Result of one skill run fired by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRun {
    pub skill: String,
    pub success: bool,
    pub error: Option<String>,
}

impl AgentRegistry {
    /// Decay every skill's experience, then run the ones that are due.
    ///
    /// Skill failures are penalised and logged; they never change the
    /// agent's status.
    pub(crate) async fn run_skill_pass(&self, agent: &Agent, core: &mut AgentCore) {
        if core.skills.is_empty() {
            return;
        }
        let settings = &self.shared.settings;
        let tolerance = chrono::Duration::milliseconds(settings.periodic_tolerance_ms as i64);
        let now = Utc::now();

        let mut due = Vec::new();
        for (name, state) in core.skills.iter_mut() {
            state.decay(settings.experience_decay);
            if state.is_due(now, tolerance) {
                due.push(name.clone());
            }
        }

        for name in due {
            self.run_skill(agent, core, &name, None).await;
        }
    }

    /// Run one skill under the held agent lock and score the outcome.
    async fn run_skill(
        &self,
        agent: &Agent,
        core: &mut AgentCore,
        name: &str,
        event: Option<&Value>,
    ) -> SkillRun {
        let Some(skill) = core.skills.get(name).map(|s| s.skill.clone()) else {
            return SkillRun {
                skill: name.to_string(),
                success: false,
                error: Some("skill state missing".into()),
            };
        };

        let result = skill.run(&mut core.context(event)).await;

        let settings = &self.shared.settings;
        let succeeded = result.is_ok();
        if let Some(state) = core.skills.get_mut(name) {
            state.last_executed = Some(Utc::now());
            if succeeded {
                state.reward(settings.experience_reward);
            } else {
                state.penalize(settings.experience_penalty);
            }
        }

        let outcome = if succeeded { "success" } else { "failure" };
        if let Err(e) = self.shared.metrics.record(
            agent.id(),
            "skill_runs_total",
            1.0,
            MetricKind::Counter,
            &[("skill", name), ("outcome", outcome)],
        ) {
            warn!(agent_id = %agent.id(), error = %e, "failed to record skill metric");
        }

        match result {
            Ok(()) => {
                core.touch();
                debug!(agent_id = %agent.id(), skill = %name, "skill ran");
                SkillRun {
                    skill: name.to_string(),
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(agent_id = %agent.id(), skill = %name, error = %e, "skill failed");
                SkillRun {
                    skill: name.to_string(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Fire every event skill of `agent_id` that listens to `event_name`,
    /// serialised through the agent lock. Only a RUNNING agent accepts
    /// events; an agent with no matching skill returns an empty list.
    pub async fn trigger_agent_event(
        &self,
        agent_id: AgentId,
        event_name: &str,
        payload: Value,
    ) -> Result<Vec<SkillRun>> {
        let agent = self.get(agent_id).await?;
        let mut core = agent.lock().await;
        if core.status != AgentStatus::Running {
            return Err(RegistryError::NotRunning {
                id: agent_id,
                status: core.status,
            });
        }

        let matching: Vec<String> = core
            .skills
            .iter()
            .filter(|(_, state)| state.skill.listens_to(event_name))
            .map(|(name, _)| name.clone())
            .collect();

        let mut runs = Vec::with_capacity(matching.len());
        for name in matching {
            runs.push(self.run_skill(&agent, &mut core, &name, Some(&payload)).await);
        }
        debug!(agent_id = %agent_id, event = %event_name, fired = runs.len(), "event delivered");
        Ok(runs)
    }
}
