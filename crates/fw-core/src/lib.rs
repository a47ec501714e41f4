//! Shared data model and pluggable capabilities for the fleetwork agent
//! runtime: agent/task types, memory and queue implementations, the chat
//! provider trait, the named component registry and TOML configuration.

pub mod components;
pub mod config;
pub mod llm;
pub mod memory;
pub mod queue;
pub mod types;
