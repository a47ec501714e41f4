use std::fmt;

use fw_core::types::AgentStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LifecycleOp
// ---------------------------------------------------------------------------

/// Everything that may change an agent's status.
///
/// The first five are requested by callers; the last three are applied by
/// the execution loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOp {
    Start,
    Pause,
    Resume,
    Stop,
    ClearError,
    /// The loop has been spawned and takes the agent out of INITIALIZING.
    Spawned,
    /// An ability failed or the loop crashed.
    Fail,
    /// The loop is exiting.
    Exit,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleOp::Start => "start",
            LifecycleOp::Pause => "pause",
            LifecycleOp::Resume => "resume",
            LifecycleOp::Stop => "stop",
            LifecycleOp::ClearError => "clear_error",
            LifecycleOp::Spawned => "spawned",
            LifecycleOp::Fail => "fail",
            LifecycleOp::Exit => "exit",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A lifecycle operation was requested from a status that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {op} an agent in status {status}{}", hint(*.op, *.status))]
pub struct TransitionError {
    pub status: AgentStatus,
    pub op: LifecycleOp,
}

fn hint(op: LifecycleOp, status: AgentStatus) -> &'static str {
    match (op, status) {
        (LifecycleOp::Start, AgentStatus::Paused) => " (resume it instead)",
        (LifecycleOp::Start, AgentStatus::Error) => " (clear the error first)",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given status.
    Apply(AgentStatus),
    /// Target already satisfied; succeed without side effects.
    NoOp,
}

/// The single source of truth for agent status changes.
///
/// | op          | from                              | result        |
/// |-------------|-----------------------------------|---------------|
/// | start       | CREATED, STOPPED                  | INITIALIZING  |
/// | start       | RUNNING, INITIALIZING             | no-op         |
/// | pause       | RUNNING                           | PAUSED        |
/// | pause       | PAUSED                            | no-op         |
/// | resume      | PAUSED                            | RUNNING       |
/// | resume      | RUNNING                           | no-op         |
/// | stop        | RUNNING, PAUSED, INITIALIZING     | STOPPED       |
/// | stop        | STOPPED, ERROR                    | no-op         |
/// | clear_error | ERROR                             | STOPPED       |
/// | clear_error | any other                         | no-op         |
/// | spawned     | INITIALIZING                      | RUNNING       |
/// | fail        | any but ERROR                     | ERROR         |
/// | fail        | ERROR                             | no-op         |
/// | exit        | STOPPED, ERROR                    | no-op         |
/// | exit        | any other                         | STOPPED       |
///
/// Every other combination is rejected.
pub fn plan(status: AgentStatus, op: LifecycleOp) -> Result<Transition, TransitionError> {
    use AgentStatus::*;
    use LifecycleOp as Op;

    let t = match (op, status) {
        (Op::Start, Created | Stopped) => Transition::Apply(Initializing),
        (Op::Start, Running | Initializing) => Transition::NoOp,

        (Op::Pause, Running) => Transition::Apply(Paused),
        (Op::Pause, Paused) => Transition::NoOp,

        (Op::Resume, Paused) => Transition::Apply(Running),
        (Op::Resume, Running) => Transition::NoOp,

        (Op::Stop, Running | Paused | Initializing) => Transition::Apply(Stopped),
        (Op::Stop, Stopped | Error) => Transition::NoOp,

        (Op::ClearError, Error) => Transition::Apply(Stopped),
        (Op::ClearError, _) => Transition::NoOp,

        (Op::Spawned, Initializing) => Transition::Apply(Running),

        (Op::Fail, Error) => Transition::NoOp,
        (Op::Fail, _) => Transition::Apply(Error),

        (Op::Exit, Stopped | Error) => Transition::NoOp,
        (Op::Exit, _) => Transition::Apply(Stopped),

        _ => return Err(TransitionError { status, op }),
    };

    tracing::trace!(from = %status, op = %op, transition = ?t, "planned agent transition");
    Ok(t)
}

/// Returns `true` if `op` is accepted (as a change or a no-op) in `status`.
pub fn can_apply(status: AgentStatus, op: LifecycleOp) -> bool {
    plan(status, op).is_ok()
}
