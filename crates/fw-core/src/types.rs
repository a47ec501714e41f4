use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type AgentId = Uuid;
pub type TaskId = Uuid;

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Initializing,
    Running,
    Paused,
    Stopped,
    Error,
}

impl AgentStatus {
    /// States from which `start` spawns a fresh execution loop.
    pub fn is_startable(&self) -> bool {
        matches!(self, AgentStatus::Created | AgentStatus::Stopped)
    }

    /// States in which queued work is accepted.
    pub fn accepts_queued(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::Paused)
    }

    /// States that terminate an execution loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Stopped | AgentStatus::Error)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Created => "CREATED",
            AgentStatus::Initializing => "INITIALIZING",
            AgentStatus::Running => "RUNNING",
            AgentStatus::Paused => "PAUSED",
            AgentStatus::Stopped => "STOPPED",
            AgentStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns `true` when moving from `self` to `target` keeps the status
    /// monotonic: Pending -> Running -> {Completed | Failed | Cancelled}.
    pub fn can_advance_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Task submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    #[default]
    Direct,
    Queue,
}

/// A unit of work submitted to an agent.
///
/// `payload` is the full task object as submitted (including `ability`,
/// `mode` and `priority`); abilities read their own input keys from it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub ability: String,
    pub mode: TaskMode,
    pub priority: i64,
    pub payload: Value,
}

impl TaskRequest {
    pub fn new(ability: impl Into<String>) -> Self {
        let ability = ability.into();
        let mut payload = Map::new();
        payload.insert("ability".into(), Value::String(ability.clone()));
        Self {
            ability,
            mode: TaskMode::Direct,
            priority: 0,
            payload: Value::Object(payload),
        }
    }

    pub fn queued(mut self, priority: i64) -> Self {
        self.mode = TaskMode::Queue;
        self.priority = priority;
        if let Value::Object(map) = &mut self.payload {
            map.insert("mode".into(), Value::String("queue".into()));
            map.insert("priority".into(), Value::from(priority));
        }
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.into(), value);
        }
        self
    }

    /// Parse a raw task object.
    ///
    /// `ability` must be a non-empty string; `mode` defaults to `"direct"`
    /// and `priority` to `0`.
    pub fn from_value(payload: Value) -> Result<Self, TaskParseError> {
        let map = payload.as_object().ok_or(TaskParseError::NotAnObject)?;

        let ability = match map.get("ability") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => return Err(TaskParseError::MissingAbility),
        };

        let mode = match map.get("mode") {
            None | Some(Value::Null) => TaskMode::Direct,
            Some(Value::String(s)) if s == "direct" => TaskMode::Direct,
            Some(Value::String(s)) if s == "queue" => TaskMode::Queue,
            Some(other) => return Err(TaskParseError::InvalidMode(other.to_string())),
        };

        let priority = match map.get("priority") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_i64()
                // Whole-number floats such as `3.0` are accepted; fractions are not.
                .or_else(|| {
                    v.as_f64()
                        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .ok_or_else(|| TaskParseError::InvalidPriority(v.to_string()))?,
        };

        Ok(Self {
            ability,
            mode,
            priority,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskParseError {
    #[error("task must be a JSON object")]
    NotAnObject,
    #[error("task is missing a non-empty `ability` field")]
    MissingAbility,
    #[error("invalid task mode: {0}")]
    InvalidMode(String),
    #[error("invalid task priority: {0} (expected an integer)")]
    InvalidPriority(String),
}

/// Outcome returned to the submitter of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub success: bool,
    pub queued: bool,
    pub agent_id: AgentId,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskSubmission {
    /// Flatten into a single JSON object. Object outputs are merged into the
    /// top level; any other output is kept under `output`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(self.success));
        map.insert("queued".into(), Value::Bool(self.queued));
        map.insert("agent_id".into(), Value::String(self.agent_id.to_string()));
        map.insert("task_id".into(), Value::String(self.task_id.to_string()));
        match &self.output {
            Some(Value::Object(out)) => {
                for (k, v) in out {
                    map.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            Some(other) => {
                map.insert("output".into(), other.clone());
            }
            None => {}
        }
        if let Some(err) = &self.error {
            map.insert("error".into(), Value::String(err.clone()));
        }
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Tracked lifecycle record for one submitted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub ability: String,
    pub mode: TaskMode,
    pub priority: i64,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub payload: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn pending(agent_id: AgentId, request: &TaskRequest) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            agent_id,
            ability: request.ability.clone(),
            mode: request.mode,
            priority: request.priority,
            status: TaskStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            ended_at: None,
            payload: request.payload.clone(),
            output: None,
            error: None,
        }
    }

    /// Move to `next` if the move is monotonic. Returns `false` (and leaves
    /// the record untouched) otherwise.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.ended_at = Some(now)
            }
            _ => {}
        }
        self.status = next;
        true
    }

    pub fn complete(&mut self, output: Value) -> bool {
        if self.advance(TaskStatus::Completed) {
            self.output = Some(output);
            true
        } else {
            false
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.advance(TaskStatus::Failed) {
            self.error = Some(error.into());
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> bool {
        if self.advance(TaskStatus::Cancelled) {
            self.error = Some(reason.into());
            true
        } else {
            false
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(s), Some(e)) => Some((e - s).num_milliseconds()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Firing rule attached to a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Schedule {
    /// Interval in seconds between runs.
    Periodic(f64),
    /// `cron` crate expression (seconds field first).
    Cron(String),
    /// Fire once at or after the given instant.
    Once(DateTime<Utc>),
    /// Fired only through an explicit event trigger.
    Event(String),
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Periodic(_) => "periodic",
            Schedule::Cron(_) => "cron",
            Schedule::Once(_) => "once",
            Schedule::Event(_) => "event",
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Creation-time description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    /// Ability names; the subset that is also a registered skill seeds the
    /// agent's skill states.
    #[serde(default)]
    pub abilities: Vec<String>,
    #[serde(default)]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub queue_type: Option<String>,
    #[serde(default)]
    pub llm_type: Option<String>,
    /// Free-form parameters handed to abilities and component constructors.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Start this agent right after creation (daemon boot only).
    #[serde(default)]
    pub autostart: bool,
}

fn default_agent_type() -> String {
    "generic".into()
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type: default_agent_type(),
            abilities: Vec::new(),
            memory_type: None,
            queue_type: None,
            llm_type: None,
            parameters: Map::new(),
            autostart: false,
        }
    }

    pub fn with_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    pub fn with_abilities<I, S>(mut self, abilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abilities = abilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Mutable subset of an agent's configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPatch {
    #[serde(default)]
    pub name: Option<String>,
    /// Merged key-by-key into the existing parameters; `null` removes a key.
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

impl AgentPatch {
    pub fn apply(&self, config: &mut AgentConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(params) = &self.parameters {
            merge_parameters(&mut config.parameters, params);
        }
    }
}

/// Merge `overrides` into `base`. A `null` override removes the key.
pub fn merge_parameters(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (k, v) in overrides {
        if v.is_null() {
            base.remove(k);
        } else {
            base.insert(k.clone(), v.clone());
        }
    }
}
