use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::agents::AgentId;

/// Timeout applied to a turn when neither the agent nor the process sets one.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_millis(120_000);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unsupported output format {value} for {agent}")]
    UnsupportedOutput { agent: AgentId, value: String },
    #[error("invalid {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// How an agent's captured output should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Newline-delimited JSON event records.
    CodexJson,
    /// A single JSON object.
    GeminiJson,
    /// Plain text, passed through.
    Text,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "codex-json" | "jsonl" => Some(Self::CodexJson),
            "gemini-json" | "json" => Some(Self::GeminiJson),
            "text" | "" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodexJson => "codex-json",
            Self::GeminiJson => "gemini-json",
            Self::Text => "text",
        }
    }
}

/// Static per-process configuration for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub id: AgentId,
    /// Name used in user-facing messages.
    pub label: String,
    /// Executable invoked for each turn.
    pub command: String,
    /// Static argument fragment inserted verbatim into the command line.
    pub args: String,
    /// Command template with `{prompt}`, `{model}` and `{thinking}` placeholders.
    pub template: Option<String>,
    pub output: OutputFormat,
    pub timeout: Duration,
    pub model_arg: Option<String>,
    pub thinking_arg: Option<String>,
    /// Pass the agent's unsafe auto-approve flag.
    pub auto_approve: bool,
    /// Whether stderr is merged into the captured output.
    pub merge_stderr: bool,
    /// Whether the agent may read from the interactive terminal.
    pub needs_pty: bool,
}

impl AgentConfig {
    /// Built-in defaults for `id`.
    pub fn defaults(id: AgentId) -> Self {
        match id {
            AgentId::Codex => Self {
                id,
                label: id.as_str().to_string(),
                command: "codex".to_string(),
                args: "--json".to_string(),
                template: None,
                output: OutputFormat::CodexJson,
                timeout: DEFAULT_TURN_TIMEOUT,
                model_arg: Some("--model".to_string()),
                thinking_arg: None,
                auto_approve: false,
                merge_stderr: true,
                needs_pty: false,
            },
            AgentId::Gemini => Self {
                id,
                label: id.as_str().to_string(),
                command: "gemini".to_string(),
                args: String::new(),
                template: None,
                output: OutputFormat::GeminiJson,
                timeout: DEFAULT_TURN_TIMEOUT,
                model_arg: Some("--model".to_string()),
                thinking_arg: None,
                auto_approve: false,
                merge_stderr: false,
                needs_pty: false,
            },
            AgentId::Generic => Self {
                id,
                label: "agent".to_string(),
                command: "agent".to_string(),
                args: String::new(),
                template: None,
                output: OutputFormat::Text,
                timeout: DEFAULT_TURN_TIMEOUT,
                model_arg: None,
                thinking_arg: None,
                auto_approve: false,
                merge_stderr: true,
                needs_pty: true,
            },
        }
    }

    /// Resolves the configuration for `id` from variables returned by `lookup`
    /// (normally the process environment). Keys are prefixed with
    /// [`AgentId::env_prefix`], e.g. `CODEX_CMD`, `GEMINI_TIMEOUT_MS`.
    /// Empty values count as unset.
    pub fn resolve<F>(id: AgentId, default_timeout: Duration, lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = id.env_prefix();
        let get = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::defaults(id);
        config.timeout = default_timeout;
        if let Some(label) = get("LABEL") {
            config.label = label;
        }
        if let Some(command) = get("CMD") {
            config.command = command;
        }
        if let Some(args) = get("ARGS") {
            config.args = args;
        }
        config.template = get("TEMPLATE").or(config.template);
        if let Some(output) = get("OUTPUT") {
            config.output = OutputFormat::parse(&output)
                .ok_or(AgentError::UnsupportedOutput { agent: id, value: output })?;
        }
        if let Some(flag) = get("MODEL_ARG") {
            config.model_arg = Some(flag);
        }
        if let Some(flag) = get("THINKING_ARG") {
            config.thinking_arg = Some(flag);
        }
        if let Some(raw) = get("TIMEOUT_MS") {
            let millis = raw.parse::<u64>().ok().filter(|ms| *ms > 0).ok_or_else(|| {
                AgentError::InvalidValue {
                    key: format!("{prefix}_TIMEOUT_MS"),
                    value: raw.clone(),
                }
            })?;
            config.timeout = Duration::from_millis(millis);
        }
        if let Some(raw) = get("MERGE_STDERR") {
            config.merge_stderr = parse_switch(&format!("{prefix}_MERGE_STDERR"), &raw)?;
        }
        if let Some(raw) = get("NEEDS_PTY") {
            config.needs_pty = parse_switch(&format!("{prefix}_NEEDS_PTY"), &raw)?;
        }
        if id == AgentId::Gemini {
            if let Some(raw) = get("YOLO") {
                config.auto_approve = parse_switch("GEMINI_YOLO", &raw)?;
            }
        }
        debug!(
            agent = %id,
            command = %config.command,
            output = config.output.as_str(),
            timeout_ms = config.timeout.as_millis() as u64,
            template = config.template.is_some(),
            "agent configured"
        );
        Ok(config)
    }
}

fn parse_switch(key: &str, raw: &str) -> Result<bool, AgentError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
