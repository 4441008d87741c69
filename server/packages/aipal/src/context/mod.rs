//! Persistent terminal sessions that agent turns are typed into.
//!
//! A session is addressed by name, survives between turns, and exposes its
//! recent scrollback as text. Two backends exist: a tmux server ([`TmuxContext`])
//! and an in-process pseudo terminal per session ([`PtyContext`]).

mod pty;
mod tmux;

use async_trait::async_trait;

use aipal_error::Result;

pub use pty::PtyContext;
pub use tmux::TmuxContext;

/// Control surface over a set of named, long-lived shell sessions.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Creates the session if it does not exist yet. Idempotent.
    async fn ensure(&self, session: &str) -> Result<()>;

    /// Types `command` into the session followed by Enter.
    async fn send(&self, session: &str, command: &str) -> Result<()>;

    /// Recent scrollback of the session, oldest line first.
    async fn capture(&self, session: &str) -> Result<String>;

    /// Tears the session down. Returns `false` when it did not exist.
    async fn destroy(&self, session: &str) -> Result<bool>;
}

/// Which backend the binary drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ContextKind {
    Tmux,
    Pty,
}
