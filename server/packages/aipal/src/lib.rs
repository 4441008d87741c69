//! Relay between chat conversations and command-line AI agents.
//!
//! Agent turns run inside persistent terminal sessions (one per conversation)
//! and are read back through unique begin/end markers. See [`relay::Relay`]
//! for the entry point.

pub mod artifacts;
pub mod bridge;
pub mod cli;
pub mod config_store;
pub mod console;
pub mod context;
pub mod message;
pub mod prompt;
pub mod queue;
pub mod relay;
pub mod scripts;
pub mod telemetry;
pub mod threads;
pub mod timestamp;
pub mod transcribe;
