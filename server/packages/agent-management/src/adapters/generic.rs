use crate::adapters::{parse_event_stream, parse_json_blob};
use crate::agents::{Agent, ParsedOutput, TurnState};
use crate::config::{AgentConfig, OutputFormat};
use crate::shell::{prompt_value, push_flag, quote};

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const MODEL_PLACEHOLDER: &str = "{model}";
const THINKING_PLACEHOLDER: &str = "{thinking}";

/// Any other CLI, driven by a command template and a declared output format.
#[derive(Debug, Clone)]
pub struct GenericAdapter {
    config: AgentConfig,
}

impl GenericAdapter {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn template(&self) -> Option<&str> {
        self.config
            .template
            .as_deref()
            .map(str::trim)
            .filter(|template| !template.is_empty())
    }
}

fn knob_value(value: Option<&str>) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .map(quote)
        .unwrap_or_default()
}

impl Agent for GenericAdapter {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn build_command(&self, prompt: &str, state: &TurnState<'_>) -> String {
        let prompt = prompt_value(prompt, state.prompt_expression);
        let Some(template) = self.template() else {
            let mut parts = vec![self.config.command.clone()];
            if !self.config.args.trim().is_empty() {
                parts.push(self.config.args.trim().to_string());
            }
            push_flag(&mut parts, self.config.model_arg.as_deref(), state.model);
            push_flag(&mut parts, self.config.thinking_arg.as_deref(), state.thinking);
            parts.push(prompt);
            return parts.join(" ");
        };

        // Knobs are substituted before the prompt so placeholder-looking text
        // inside the prompt is left alone.
        let mut command = template.to_string();
        let mut extra = Vec::new();
        if command.contains(MODEL_PLACEHOLDER) {
            command = command.replace(MODEL_PLACEHOLDER, &knob_value(state.model));
        } else {
            push_flag(&mut extra, self.config.model_arg.as_deref(), state.model);
        }
        if command.contains(THINKING_PLACEHOLDER) {
            command = command.replace(THINKING_PLACEHOLDER, &knob_value(state.thinking));
        } else {
            push_flag(&mut extra, self.config.thinking_arg.as_deref(), state.thinking);
        }

        if command.contains(PROMPT_PLACEHOLDER) {
            command = command.replace(PROMPT_PLACEHOLDER, &prompt);
            if !extra.is_empty() {
                command.push(' ');
                command.push_str(&extra.join(" "));
            }
        } else {
            extra.push(prompt);
            command.push(' ');
            command.push_str(&extra.join(" "));
        }
        command.trim().to_string()
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        match self.config.output {
            OutputFormat::CodexJson => parse_event_stream(raw),
            OutputFormat::GeminiJson => parse_json_blob(raw),
            OutputFormat::Text => ParsedOutput::raw(raw),
        }
    }
}
