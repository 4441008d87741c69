use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use aipal_error::{RelayError, Result};

use super::ExecutionContext;

/// Default number of scrollback lines read back on capture.
pub const DEFAULT_CAPTURE_LINES: u32 = 5000;

/// Sessions hosted by the local tmux server.
#[derive(Debug, Clone)]
pub struct TmuxContext {
    binary: String,
    capture_lines: u32,
}

impl TmuxContext {
    pub fn new(capture_lines: u32) -> Self {
        Self {
            binary: "tmux".to_string(),
            capture_lines,
        }
    }

    /// Uses a different tmux executable, e.g. one with a dedicated socket wrapper.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn tmux(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| RelayError::ContextUnavailable {
                message: format!("failed to run {}: {err}", self.binary),
            })
    }

    async fn checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.tmux(args).await?;
        if output.status.success() {
            return Ok(output);
        }
        Err(RelayError::InvocationFailed {
            command: format!("{} {}", self.binary, args.join(" ")),
            exit_code: output.status.code(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        })
    }

    async fn exists(&self, session: &str) -> Result<bool> {
        let output = self.tmux(&["has-session", "-t", session]).await?;
        Ok(output.status.success())
    }
}

impl Default for TmuxContext {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LINES)
    }
}

#[async_trait]
impl ExecutionContext for TmuxContext {
    async fn ensure(&self, session: &str) -> Result<()> {
        if self.exists(session).await? {
            return Ok(());
        }
        self.checked(&["new-session", "-d", "-s", session]).await?;
        info!(session = %session, "tmux session created");
        Ok(())
    }

    async fn send(&self, session: &str, command: &str) -> Result<()> {
        debug!(session = %session, bytes = command.len(), "sending keys");
        self.checked(&["send-keys", "-t", session, command, "C-m"]).await?;
        Ok(())
    }

    async fn capture(&self, session: &str) -> Result<String> {
        // -J joins wrapped lines so long JSON records stay on one line.
        let start = format!("-{}", self.capture_lines);
        let output = self
            .checked(&["capture-pane", "-p", "-J", "-t", session, "-S", &start])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn destroy(&self, session: &str) -> Result<bool> {
        if !self.exists(session).await? {
            return Ok(false);
        }
        self.checked(&["kill-session", "-t", session]).await?;
        info!(session = %session, "tmux session killed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_context_unavailable() {
        let context = TmuxContext::default().with_binary("/nonexistent/tmux-binary");
        let err = context.ensure("aipal-test").await.unwrap_err();
        assert!(matches!(err, RelayError::ContextUnavailable { .. }), "{err:?}");
    }
}
