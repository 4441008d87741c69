use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::agents::{Agent, ParsedOutput, TurnState};
use crate::config::AgentConfig;
use crate::shell::{prompt_value, push_flag, quote};

const OUTPUT_FORMAT: &str = "json";

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([0-9a-fA-F-]{8,})\]").expect("valid session id pattern"))
}

/// `gemini -p` style agent printing one JSON object per turn.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    config: AgentConfig,
}

impl GeminiAdapter {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl Agent for GeminiAdapter {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn build_command(&self, prompt: &str, state: &TurnState<'_>) -> String {
        let mut parts = vec![
            self.config.command.clone(),
            "-p".to_string(),
            prompt_value(prompt, state.prompt_expression),
            "--output-format".to_string(),
            OUTPUT_FORMAT.to_string(),
        ];
        if self.config.auto_approve {
            parts.push("--yolo".to_string());
        }
        if let Some(thread_id) = state.thread_id.filter(|id| !id.trim().is_empty()) {
            parts.push("--resume".to_string());
            parts.push(quote(thread_id));
        }
        if !self.config.args.trim().is_empty() {
            parts.push(self.config.args.trim().to_string());
        }
        push_flag(&mut parts, self.config.model_arg.as_deref(), state.model);
        push_flag(&mut parts, self.config.thinking_arg.as_deref(), state.thinking);
        parts.join(" ")
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        parse_json_blob(raw)
    }

    fn list_sessions_command(&self) -> Option<String> {
        Some(format!("{} --list-sessions", self.config.command))
    }

    /// The most recent listing entry wins, so the last match is returned.
    fn parse_session_list(&self, output: &str) -> Option<String> {
        output
            .lines()
            .filter_map(|line| session_id_pattern().captures_iter(line).last())
            .last()
            .map(|captures| captures[1].to_string())
    }
}

/// Reads a single JSON object: `error.message` if present, else `response`.
pub fn parse_json_blob(raw: &str) -> ParsedOutput {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedOutput::default();
    }
    let payload = match serde_json::from_str::<Value>(trimmed) {
        Ok(payload @ Value::Object(_)) => payload,
        _ => return ParsedOutput::raw(trimmed),
    };

    if let Some(message) = payload
        .get("error")
        .and_then(|error| error.get("message"))
        .filter(|message| !message.is_null())
    {
        let text = match message {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return ParsedOutput {
            text,
            thread_id: None,
            saw_json: true,
        };
    }

    let text = payload
        .get("response")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    ParsedOutput {
        text,
        thread_id: None,
        saw_json: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentId;

    fn adapter(auto_approve: bool) -> GeminiAdapter {
        let mut config = AgentConfig::defaults(AgentId::Gemini);
        config.auto_approve = auto_approve;
        GeminiAdapter::new(config)
    }

    #[test]
    fn resume_flag_only_with_thread() {
        let fresh = adapter(false).build_command("hi", &TurnState::default());
        assert_eq!(fresh, "gemini -p 'hi' --output-format json");

        let state = TurnState {
            thread_id: Some("abc"),
            ..Default::default()
        };
        let resumed = adapter(false).build_command("hi", &state);
        assert!(resumed.contains("--resume 'abc'"), "{resumed}");
    }

    #[test]
    fn yolo_follows_switch() {
        assert!(adapter(true).build_command("hi", &TurnState::default()).contains("--yolo"));
        assert!(!adapter(false).build_command("hi", &TurnState::default()).contains("--yolo"));
    }

    #[test]
    fn error_message_becomes_text() {
        let parsed = parse_json_blob(r#"{"error":{"message":"boom"}}"#);
        assert_eq!(parsed.text, "boom");
        assert!(parsed.saw_json);
    }

    #[test]
    fn response_is_trimmed() {
        let parsed = parse_json_blob(r#"{"response":" hi "}"#);
        assert_eq!(parsed.text, "hi");
        assert!(parsed.saw_json);
    }

    #[test]
    fn non_json_passes_through() {
        let parsed = parse_json_blob("  plain words \n");
        assert_eq!(parsed.text, "plain words");
        assert!(!parsed.saw_json);

        let parsed = parse_json_blob("[1, 2]");
        assert_eq!(parsed.text, "[1, 2]");
        assert!(!parsed.saw_json);
    }

    #[test]
    fn empty_output_is_empty() {
        assert_eq!(parse_json_blob("   "), ParsedOutput::default());
    }

    #[test]
    fn session_list_returns_last_match() {
        let output = "\
Available sessions:
  1. First chat (2 hours ago) [1a2b3c4d-0000-1111-2222-333344445555]
  2. Second chat (5 minutes ago) [deadbeef-aaaa-bbbb-cccc-ddddeeeeffff]
  [short]
";
        assert_eq!(
            adapter(false).parse_session_list(output).as_deref(),
            Some("deadbeef-aaaa-bbbb-cccc-ddddeeeeffff")
        );
        assert_eq!(adapter(false).parse_session_list("no sessions"), None);
    }

    #[test]
    fn list_sessions_command_uses_configured_binary() {
        assert_eq!(
            adapter(false).list_sessions_command().as_deref(),
            Some("gemini --list-sessions")
        );
    }
}
