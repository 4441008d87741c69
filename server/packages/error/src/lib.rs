//! Error types shared by the aipal crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`RelayError`], used for logging and for
/// deciding how a failure is surfaced to the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    Invocation,
    Sandbox,
    InvalidRequest,
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::Invocation => "invocation",
            ErrorType::Sandbox => "sandbox",
            ErrorType::InvalidRequest => "invalid_request",
            ErrorType::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Timeout waiting for {label} response")]
    Timeout { label: String, timeout_ms: u64 },

    #[error("command failed: {command}")]
    InvocationFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("execution context unavailable: {message}")]
    ContextUnavailable { message: String },

    #[error("Invalid command name: {name}")]
    InvalidScriptName { name: String },

    #[error("Command {name} resolves outside the scripts directory")]
    ScriptOutsideRoot { name: String },

    #[error("Unknown command: /{name}")]
    ScriptNotFound { name: String },

    #[error("Command /{name} is not executable")]
    ScriptNotExecutable { name: String },

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Command /{name} timed out after {timeout_secs} seconds")]
    ScriptTimedOut { name: String, timeout_secs: u64 },

    #[error("Command /{name} failed")]
    ScriptFailed {
        name: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("transcription failed: {message}")]
    Transcription { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            RelayError::Timeout { .. } => ErrorType::Timeout,
            RelayError::InvocationFailed { .. } | RelayError::ContextUnavailable { .. } => {
                ErrorType::Invocation
            }
            RelayError::InvalidScriptName { .. }
            | RelayError::ScriptOutsideRoot { .. }
            | RelayError::ScriptNotFound { .. }
            | RelayError::ScriptNotExecutable { .. }
            | RelayError::InvalidArguments { .. }
            | RelayError::ScriptTimedOut { .. }
            | RelayError::ScriptFailed { .. } => ErrorType::Sandbox,
            RelayError::InvalidRequest { .. } => ErrorType::InvalidRequest,
            RelayError::Transcription { .. }
            | RelayError::Config { .. }
            | RelayError::Io(_)
            | RelayError::Json(_) => ErrorType::Internal,
        }
    }

    /// Exit code carried by the failure, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RelayError::InvocationFailed { exit_code, .. }
            | RelayError::ScriptFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Diagnostic stream captured alongside the failure, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RelayError::InvocationFailed { stderr, .. } | RelayError::ScriptFailed { stderr, .. } => {
                stderr.as_deref().map(str::trim).filter(|s| !s.is_empty())
            }
            _ => None,
        }
    }

    /// Renders the error for a chat reply: the message, then `code:` and
    /// `stderr:` lines when present.
    pub fn user_detail(&self) -> String {
        let mut parts = vec![self.to_string()];
        if let Some(code) = self.exit_code() {
            parts.push(format!("code: {code}"));
        }
        if let Some(stderr) = self.stderr() {
            parts.push(format!("stderr: {stderr}"));
        }
        parts.join("\n")
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_agent() {
        let err = RelayError::Timeout {
            label: "codex".to_string(),
            timeout_ms: 1000,
        };
        assert_eq!(err.to_string(), "Timeout waiting for codex response");
        assert_eq!(err.error_type(), ErrorType::Timeout);
    }

    #[test]
    fn user_detail_includes_code_and_stderr() {
        let err = RelayError::ScriptFailed {
            name: "inbox".to_string(),
            exit_code: Some(2),
            stderr: Some("  no mail\n".to_string()),
        };
        assert_eq!(err.user_detail(), "Command /inbox failed\ncode: 2\nstderr: no mail");
    }

    #[test]
    fn user_detail_skips_blank_stderr() {
        let err = RelayError::InvocationFailed {
            command: "tmux".to_string(),
            exit_code: None,
            stderr: Some("   ".to_string()),
        };
        assert_eq!(err.user_detail(), "command failed: tmux");
    }

    #[test]
    fn sandbox_errors_have_distinct_messages() {
        let missing = RelayError::ScriptNotFound { name: "x".into() }.to_string();
        let not_exec = RelayError::ScriptNotExecutable { name: "x".into() }.to_string();
        let invalid = RelayError::InvalidScriptName { name: "x".into() }.to_string();
        assert_ne!(missing, not_exec);
        assert_ne!(missing, invalid);
        assert_ne!(not_exec, invalid);
    }
}
