//! Scheduled behaviours and their per-agent runtime state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use dashmap::DashMap;
use fw_core::types::Schedule;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentContext;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SkillError {
    #[error("invalid schedule for skill `{skill}`: {reason}")]
    InvalidSchedule { skill: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl SkillError {
    pub fn failed(msg: impl Into<String>) -> Self {
        SkillError::Failed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SkillError>;

// ---------------------------------------------------------------------------
// SkillHandler
// ---------------------------------------------------------------------------

/// The callable behind a skill. Event skills find the trigger payload in
/// [`AgentContext::event`].
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn run(&self, agent: &mut AgentContext<'_>) -> Result<()>;
}

type SkillFn = dyn Fn(&mut AgentContext<'_>) -> Result<()> + Send + Sync;

struct FnSkill {
    f: Box<SkillFn>,
}

#[async_trait]
impl SkillHandler for FnSkill {
    async fn run(&self, agent: &mut AgentContext<'_>) -> Result<()> {
        (self.f)(agent)
    }
}

// ---------------------------------------------------------------------------
// Skill
// ---------------------------------------------------------------------------

pub struct Skill {
    name: String,
    schedule: Option<Schedule>,
    cron: Option<CronSchedule>,
    handler: Arc<dyn SkillHandler>,
}

impl Skill {
    /// Build a skill, rejecting schedules that can never fire correctly.
    pub fn new(
        name: impl Into<String>,
        schedule: Option<Schedule>,
        handler: impl SkillHandler + 'static,
    ) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: String| SkillError::InvalidSchedule {
            skill: name.clone(),
            reason,
        };

        let cron = match &schedule {
            Some(Schedule::Periodic(secs)) if !secs.is_finite() || *secs <= 0.0 => {
                return Err(invalid(format!("interval must be a positive number of seconds, got {secs}")));
            }
            Some(Schedule::Cron(expr)) => Some(
                CronSchedule::from_str(expr).map_err(|e| invalid(format!("`{expr}`: {e}")))?,
            ),
            Some(Schedule::Event(event)) if event.trim().is_empty() => {
                return Err(invalid("event name must not be empty".into()));
            }
            _ => None,
        };

        Ok(Self {
            name,
            schedule,
            cron,
            handler: Arc::new(handler),
        })
    }

    /// Build a skill from a synchronous closure.
    pub fn from_fn<F>(name: impl Into<String>, schedule: Option<Schedule>, f: F) -> Result<Self>
    where
        F: Fn(&mut AgentContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(name, schedule, FnSkill { f: Box::new(f) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// `true` if this skill reacts to the named event.
    pub fn listens_to(&self, event: &str) -> bool {
        matches!(&self.schedule, Some(Schedule::Event(name)) if name == event)
    }

    pub(crate) async fn run(&self, agent: &mut AgentContext<'_>) -> Result<()> {
        self.handler.run(agent).await
    }
}

impl fmt::Debug for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SkillState
// ---------------------------------------------------------------------------

/// Runtime state of one skill on one agent.
#[derive(Debug, Clone)]
pub struct SkillState {
    pub skill: Arc<Skill>,
    /// Decays every scheduler pass; no floor or ceiling.
    pub experience: f64,
    /// `None` until the first due run.
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SkillState {
    pub fn new(skill: Arc<Skill>) -> Self {
        Self {
            skill,
            experience: 0.0,
            last_executed: None,
            created_at: Utc::now(),
        }
    }

    pub fn decay(&mut self, factor: f64) {
        self.experience *= factor;
    }

    pub fn reward(&mut self, amount: f64) {
        self.experience += amount;
    }

    pub fn penalize(&mut self, amount: f64) {
        self.experience -= amount;
    }

    /// Whether the scheduler pass should run this skill at `now`.
    ///
    /// Event skills and skills without a schedule are never due here.
    pub fn is_due(&self, now: DateTime<Utc>, tolerance: Duration) -> bool {
        match self.skill.schedule() {
            Some(Schedule::Periodic(secs)) => match self.last_executed {
                None => true,
                Some(last) => {
                    let interval = Duration::milliseconds((secs * 1000.0) as i64);
                    now - last + tolerance >= interval
                }
            },
            Some(Schedule::Once(at)) => self.last_executed.is_none() && now >= *at,
            Some(Schedule::Cron(_)) => {
                let Some(cron) = &self.skill.cron else {
                    return false;
                };
                let since = self.last_executed.unwrap_or(self.created_at);
                cron.after(&since).next().is_some_and(|next| next <= now)
            }
            Some(Schedule::Event(_)) | None => false,
        }
    }

    pub fn snapshot(&self) -> SkillSnapshot {
        SkillSnapshot {
            name: self.skill.name().to_string(),
            schedule: self.skill.schedule().cloned(),
            experience: self.experience,
            last_executed: self.last_executed,
        }
    }
}

/// Serialisable view of a [`SkillState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSnapshot {
    pub name: String,
    pub schedule: Option<Schedule>,
    pub experience: f64,
    pub last_executed: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SkillRegistry
// ---------------------------------------------------------------------------

/// Global name -> skill map. Agents seed their skill states from it at
/// creation time.
#[derive(Default)]
pub struct SkillRegistry {
    skills: DashMap<String, Arc<Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, skill: Skill) {
        debug!(skill = %skill.name(), schedule = ?skill.schedule(), "registered skill");
        self.skills.insert(skill.name().to_string(), Arc::new(skill));
    }

    pub fn register_fn<F>(&self, name: impl Into<String>, schedule: Option<Schedule>, f: F) -> Result<()>
    where
        F: Fn(&mut AgentContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(Skill::from_fn(name, schedule, f)?);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}
