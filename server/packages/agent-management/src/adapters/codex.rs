use serde_json::Value;

use crate::agents::{Agent, ParsedOutput, TurnState};
use crate::config::AgentConfig;
use crate::shell::{prompt_value, push_flag, quote};

const MESSAGE_ITEM_TYPES: [&str; 3] = ["message", "agent_message", "assistant_message"];

/// `codex exec` style agent emitting newline-delimited JSON events.
#[derive(Debug, Clone)]
pub struct CodexAdapter {
    config: AgentConfig,
}

impl CodexAdapter {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl Agent for CodexAdapter {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn build_command(&self, prompt: &str, state: &TurnState<'_>) -> String {
        let mut parts = vec![self.config.command.clone(), "exec".to_string()];
        if let Some(thread_id) = state.thread_id.filter(|id| !id.trim().is_empty()) {
            parts.push("resume".to_string());
            parts.push(quote(thread_id));
        }
        if !self.config.args.trim().is_empty() {
            parts.push(self.config.args.trim().to_string());
        }
        push_flag(&mut parts, self.config.model_arg.as_deref(), state.model);
        push_flag(&mut parts, self.config.thinking_arg.as_deref(), state.thinking);
        parts.push(prompt_value(prompt, state.prompt_expression));
        parts.join(" ")
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        parse_event_stream(raw)
    }
}

/// Reads a JSON event stream, skipping any line that is not a JSON object.
///
/// The continuity id comes from `thread.started` (`thread_id`) or a session
/// start record (`session_id`); reply text from completed message items.
pub fn parse_event_stream(raw: &str) -> ParsedOutput {
    let mut saw_json = false;
    let mut thread_id = None;
    let mut messages: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if !event.is_object() {
            continue;
        }
        saw_json = true;

        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "thread.started" => {
                if let Some(id) = event.get("thread_id").and_then(Value::as_str) {
                    thread_id = Some(id.to_string());
                }
            }
            "session.started" | "session_configured" => {
                if let Some(id) = event.get("session_id").and_then(Value::as_str) {
                    thread_id = Some(id.to_string());
                }
            }
            "item.completed" => {
                let Some(item) = event.get("item") else {
                    continue;
                };
                let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
                if !MESSAGE_ITEM_TYPES.contains(&item_type) {
                    continue;
                }
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    let text = text.trim();
                    if !text.is_empty() {
                        messages.push(text.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if !saw_json {
        return ParsedOutput::raw(raw);
    }

    ParsedOutput {
        text: messages.join("\n\n"),
        thread_id: thread_id.filter(|id| !id.is_empty()),
        saw_json,
    }
}
