//! Background daemon for the fleetwork agent runtime.
//!
//! The daemon wires the agent registry to its surroundings:
//! - Built-in abilities and the `heartbeat` skill
//! - Snapshot restore at boot and a periodic snapshot timer
//! - A health monitor that bounces stuck agents
//! - Graceful shutdown that stops every agent and saves a final snapshot

pub mod builtins;
pub mod daemon;
pub mod health;
pub mod shutdown;
