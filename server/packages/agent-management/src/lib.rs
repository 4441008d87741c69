//! Agent command construction and output parsing.
//!
//! Each supported command-line agent is an [`agents::AgentAdapter`] variant that
//! knows how to build the shell invocation for one turn and how to read the
//! agent's captured output back into a [`agents::ParsedOutput`].

pub mod adapters;
pub mod agents;
pub mod config;
pub mod shell;

pub use agents::{Agent, AgentAdapter, AgentId, AgentRegistry, ParsedOutput, TurnState};
pub use config::{AgentConfig, AgentError, OutputFormat};
