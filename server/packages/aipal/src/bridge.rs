//! Synchronous request/response over a shared terminal session.
//!
//! Each turn is wrapped between a unique begin and end marker printed by the
//! shell itself. The bridge polls the session scrollback until the newest
//! begin marker is followed by its end marker and returns what lies between.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aipal_agent_management::shell::quote;
use aipal_error::{RelayError, Result};

use crate::context::ExecutionContext;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shell expression that expands to the decoded prompt inside a composed turn.
pub const PROMPT_EXPRESSION: &str = "\"$PROMPT\"";

/// One composed turn: fresh markers plus the command line sent to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub token: String,
    pub begin: String,
    pub end: String,
    pub command: String,
}

impl CommandInvocation {
    /// Wraps `agent_command` between freshly generated markers. When a base64
    /// prompt is given it is decoded into `$PROMPT` before the agent runs.
    pub fn compose(agent_command: &str, prompt_base64: Option<&str>) -> Self {
        let token = Uuid::new_v4().to_string();
        let begin = format!("<<<BEGIN:{token}>>>");
        let end = format!("<<<END:{token}>>>");
        let mut parts = Vec::new();
        if let Some(encoded) = prompt_base64 {
            parts.push(format!("PROMPT_B64={}", quote(encoded)));
            parts.push("PROMPT=$(printf %s \"$PROMPT_B64\" | base64 --decode)".to_string());
        }
        parts.push(format!("printf '\\n{begin}\\n'"));
        parts.push(agent_command.to_string());
        parts.push(format!("printf '\\n{end}\\n'"));
        Self {
            token,
            begin,
            end,
            command: parts.join("; "),
        }
    }
}

/// Output between the newest `begin` marker line and the first `end` marker
/// line after it, newlines trimmed. `None` until both have been printed.
pub fn extract_marked_output(captured: &str, begin: &str, end: &str) -> Option<String> {
    let begin_needle = format!("\n{begin}\n");
    let end_needle = format!("\n{end}\n");
    let start = match captured.rfind(&begin_needle) {
        Some(at) => at + begin_needle.len(),
        // The capture window may start right at the marker line.
        None if captured.starts_with(&begin_needle[1..]) => begin_needle.len() - 1,
        None => return None,
    };
    // The begin needle's trailing newline doubles as the end needle's leading
    // one when the agent printed nothing.
    let rest = &captured[start - 1..];
    let stop = rest.find(&end_needle)?;
    Some(
        rest[..stop]
            .trim_matches(|c| c == '\n' || c == '\r')
            .to_string(),
    )
}

/// Progress of a turn through the capture protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    EnsureSession,
    Send,
    WaitBegin,
    Capturing,
    Done,
    Timeout,
}

impl BridgePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgePhase::EnsureSession => "ensure_session",
            BridgePhase::Send => "send",
            BridgePhase::WaitBegin => "wait_begin",
            BridgePhase::Capturing => "capturing",
            BridgePhase::Done => "done",
            BridgePhase::Timeout => "timeout",
        }
    }
}

/// What to run for one turn.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub command: &'a str,
    pub prompt_base64: Option<&'a str>,
    pub timeout: Duration,
    /// Agent name used in the timeout message.
    pub label: &'a str,
}

/// Maps conversations to persistent sessions and runs turns inside them.
#[derive(Clone)]
pub struct SessionBridge {
    context: Arc<dyn ExecutionContext>,
    prefix: String,
    poll_interval: Duration,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("prefix", &self.prefix)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl SessionBridge {
    pub fn new(context: Arc<dyn ExecutionContext>, prefix: impl Into<String>) -> Self {
        Self {
            context,
            prefix: prefix.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session_name(&self, conversation_id: &str) -> String {
        format!("{}-{}", self.prefix, conversation_id)
    }

    /// Runs one turn and returns its raw output. On timeout the command is
    /// left running; its markers are unique so a late answer is never
    /// mistaken for a later turn's.
    pub async fn run(&self, conversation_id: &str, turn: Turn<'_>) -> Result<String> {
        let session = self.session_name(conversation_id);
        let invocation = CommandInvocation::compose(turn.command, turn.prompt_base64);
        let mut phase = BridgePhase::EnsureSession;
        debug!(session = %session, phase = phase.as_str(), token = %invocation.token, "turn started");
        self.context.ensure(&session).await?;

        phase = BridgePhase::Send;
        debug!(session = %session, phase = phase.as_str(), "sending turn");
        self.context.send(&session, &invocation.command).await?;

        let begin_needle = format!("\n{}\n", invocation.begin);
        let started = Instant::now();
        let deadline = started + turn.timeout;
        phase = BridgePhase::WaitBegin;
        loop {
            let captured = self.context.capture(&session).await?;
            if let Some(output) = extract_marked_output(&captured, &invocation.begin, &invocation.end) {
                phase = BridgePhase::Done;
                info!(
                    session = %session,
                    phase = phase.as_str(),
                    bytes = output.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn captured"
                );
                return Ok(output);
            }
            if phase == BridgePhase::WaitBegin && captured.contains(&begin_needle) {
                phase = BridgePhase::Capturing;
                debug!(session = %session, phase = phase.as_str(), "begin marker seen");
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    session = %session,
                    phase = BridgePhase::Timeout.as_str(),
                    last_phase = phase.as_str(),
                    timeout_ms = turn.timeout.as_millis() as u64,
                    "turn timed out"
                );
                return Err(RelayError::Timeout {
                    label: turn.label.to_string(),
                    timeout_ms: turn.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Destroys the conversation's session. Returns `false` if there was none.
    pub async fn reset(&self, conversation_id: &str) -> Result<bool> {
        let session = self.session_name(conversation_id);
        let destroyed = self.context.destroy(&session).await?;
        info!(session = %session, destroyed, "session reset");
        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Answers every command with a fixed reply, or stays silent.
    #[derive(Default)]
    struct EchoContext {
        reply: Option<String>,
        screens: Mutex<HashMap<String, String>>,
    }

    fn markers(command: &str) -> (String, String) {
        let pick = |prefix: &str| {
            let start = command.find(prefix).unwrap();
            let len = command[start..].find(">>>").unwrap() + 3;
            command[start..start + len].to_string()
        };
        (pick("<<<BEGIN:"), pick("<<<END:"))
    }

    #[async_trait]
    impl ExecutionContext for EchoContext {
        async fn ensure(&self, session: &str) -> Result<()> {
            self.screens.lock().unwrap().entry(session.to_string()).or_default();
            Ok(())
        }

        async fn send(&self, session: &str, command: &str) -> Result<()> {
            let mut screens = self.screens.lock().unwrap();
            let screen = screens.get_mut(session).unwrap();
            screen.push_str(&format!("$ {command}\n"));
            if let Some(reply) = &self.reply {
                let (begin, end) = markers(command);
                screen.push_str(&format!("\n{begin}\n{reply}\n\n{end}\n$ "));
            }
            Ok(())
        }

        async fn capture(&self, session: &str) -> Result<String> {
            Ok(self.screens.lock().unwrap().get(session).cloned().unwrap_or_default())
        }

        async fn destroy(&self, session: &str) -> Result<bool> {
            Ok(self.screens.lock().unwrap().remove(session).is_some())
        }
    }

    #[test]
    fn extract_uses_newest_begin_marker() {
        let captured = "\n<<<BEGIN:a>>>\nold\n<<<END:a>>>\n\n<<<BEGIN:b>>>\nX\n<<<END:b>>>\n";
        assert_eq!(
            extract_marked_output(captured, "<<<BEGIN:b>>>", "<<<END:b>>>").as_deref(),
            Some("X")
        );
    }

    #[test]
    fn extract_waits_for_end_marker() {
        let captured = "prompt\n<<<BEGIN:b>>>\npartial output";
        assert_eq!(extract_marked_output(captured, "<<<BEGIN:b>>>", "<<<END:b>>>"), None);
    }

    #[test]
    fn extract_ignores_echoed_command() {
        let invocation = CommandInvocation::compose("codex exec 'hi'", None);
        let captured = format!("$ {}\n", invocation.command);
        assert_eq!(extract_marked_output(&captured, &invocation.begin, &invocation.end), None);
    }

    #[test]
    fn begin_marker_on_first_captured_line() {
        let captured = "<<<BEGIN:d>>>\nanswer\n<<<END:d>>>\n$ ";
        assert_eq!(
            extract_marked_output(captured, "<<<BEGIN:d>>>", "<<<END:d>>>").as_deref(),
            Some("answer")
        );
        let captured = "<<<BEGIN:d>>>\n\n<<<END:d>>>\n";
        assert_eq!(
            extract_marked_output(captured, "<<<BEGIN:d>>>", "<<<END:d>>>").as_deref(),
            Some("")
        );
    }

    #[test]
    fn extract_allows_empty_output() {
        let captured = "\n<<<BEGIN:c>>>\n\n<<<END:c>>>\n";
        assert_eq!(
            extract_marked_output(captured, "<<<BEGIN:c>>>", "<<<END:c>>>").as_deref(),
            Some("")
        );
    }

    #[test]
    fn compose_decodes_prompt_before_agent() {
        let invocation = CommandInvocation::compose("codex exec \"$PROMPT\"", Some("aGk="));
        assert!(invocation.command.starts_with(
            "PROMPT_B64='aGk='; PROMPT=$(printf %s \"$PROMPT_B64\" | base64 --decode); printf '\\n<<<BEGIN:"
        ));
        assert!(invocation
            .command
            .ends_with(&format!("; codex exec \"$PROMPT\"; printf '\\n{}\\n'", invocation.end)));
        assert_eq!(invocation.begin, format!("<<<BEGIN:{}>>>", invocation.token));
    }

    #[test]
    fn compose_generates_unique_tokens() {
        let first = CommandInvocation::compose("true", None);
        let second = CommandInvocation::compose("true", None);
        assert_ne!(first.token, second.token);
    }

    fn turn(timeout: Duration) -> Turn<'static> {
        Turn {
            command: "agent \"$PROMPT\"",
            prompt_base64: Some("aGk="),
            timeout,
            label: "codex",
        }
    }

    #[tokio::test]
    async fn run_returns_latest_reply() {
        let context = Arc::new(EchoContext {
            reply: Some("hello back".to_string()),
            ..Default::default()
        });
        let bridge = SessionBridge::new(context.clone(), "aipal").with_poll_interval(Duration::from_millis(5));
        assert_eq!(bridge.run("42", turn(Duration::from_secs(1))).await.unwrap(), "hello back");
        assert_eq!(bridge.run("42", turn(Duration::from_secs(1))).await.unwrap(), "hello back");
        assert!(context.screens.lock().unwrap().contains_key("aipal-42"));
    }

    #[tokio::test]
    async fn run_times_out_with_label() {
        let bridge = SessionBridge::new(Arc::new(EchoContext::default()), "aipal")
            .with_poll_interval(Duration::from_millis(5));
        let err = bridge.run("42", turn(Duration::from_millis(30))).await.unwrap_err();
        assert_eq!(err.to_string(), "Timeout waiting for codex response");
    }

    #[tokio::test]
    async fn reset_reports_absent_session() {
        let bridge = SessionBridge::new(Arc::new(EchoContext::default()), "aipal");
        assert!(!bridge.reset("7").await.unwrap());
    }
}
