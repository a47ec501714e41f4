//! Agent runtime: lifecycle table, ability and skill registries, the agent
//! registry with one execution loop per agent, task submission and
//! tracking, auto-restart and snapshot persistence.

pub mod abilities;
pub mod agent;
mod executor;
pub mod ledger;
pub mod lifecycle;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod skills;
pub mod state_machine;
mod supervisor;
mod tasks;
