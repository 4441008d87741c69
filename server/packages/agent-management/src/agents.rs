use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::{CodexAdapter, GeminiAdapter, GenericAdapter};
use crate::config::{AgentConfig, AgentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Codex,
    Gemini,
    Generic,
}

impl AgentId {
    pub fn all() -> [AgentId; 3] {
        [AgentId::Codex, AgentId::Gemini, AgentId::Generic]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Codex => "codex",
            AgentId::Gemini => "gemini",
            AgentId::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "codex" => Some(AgentId::Codex),
            "gemini" => Some(AgentId::Gemini),
            "generic" => Some(AgentId::Generic),
            _ => None,
        }
    }

    /// Prefix of the environment variables configuring this agent.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            AgentId::Codex => "CODEX",
            AgentId::Gemini => "GEMINI",
            AgentId::Generic => "AGENT",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-turn inputs to command construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnState<'a> {
    /// Continuity identifier from the previous successful turn.
    pub thread_id: Option<&'a str>,
    pub model: Option<&'a str>,
    pub thinking: Option<&'a str>,
    /// Shell expression expanding to the prompt, e.g. `"$PROMPT"`.
    pub prompt_expression: Option<&'a str>,
}

/// An agent's reading of one turn's captured output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub text: String,
    pub thread_id: Option<String>,
    /// Whether structured output was recognized.
    pub saw_json: bool,
}

impl ParsedOutput {
    /// Unstructured passthrough of `raw`, trimmed.
    pub fn raw(raw: &str) -> Self {
        Self {
            text: raw.trim().to_string(),
            thread_id: None,
            saw_json: false,
        }
    }
}

/// Capability shared by every agent variant.
pub trait Agent {
    fn config(&self) -> &AgentConfig;

    /// Shell command line running one turn. Never fails: a missing
    /// continuity id just starts a fresh conversation.
    fn build_command(&self, prompt: &str, state: &TurnState<'_>) -> String;

    /// Never fails: unrecognized output degrades to [`ParsedOutput::raw`].
    fn parse_output(&self, raw: &str) -> ParsedOutput;

    /// Command listing the agent's stored sessions, for agents whose turn
    /// output does not carry a continuity id.
    fn list_sessions_command(&self) -> Option<String> {
        None
    }

    fn parse_session_list(&self, _output: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub enum AgentAdapter {
    Codex(CodexAdapter),
    Gemini(GeminiAdapter),
    Generic(GenericAdapter),
}

impl AgentAdapter {
    pub fn new(config: AgentConfig) -> Self {
        match config.id {
            AgentId::Codex => AgentAdapter::Codex(CodexAdapter::new(config)),
            AgentId::Gemini => AgentAdapter::Gemini(GeminiAdapter::new(config)),
            AgentId::Generic => AgentAdapter::Generic(GenericAdapter::new(config)),
        }
    }

    fn inner(&self) -> &dyn Agent {
        match self {
            AgentAdapter::Codex(agent) => agent,
            AgentAdapter::Gemini(agent) => agent,
            AgentAdapter::Generic(agent) => agent,
        }
    }

    pub fn id(&self) -> AgentId {
        self.config().id
    }

    pub fn label(&self) -> &str {
        &self.config().label
    }
}

impl Agent for AgentAdapter {
    fn config(&self) -> &AgentConfig {
        self.inner().config()
    }

    fn build_command(&self, prompt: &str, state: &TurnState<'_>) -> String {
        self.inner().build_command(prompt, state)
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        self.inner().parse_output(raw)
    }

    fn list_sessions_command(&self) -> Option<String> {
        self.inner().list_sessions_command()
    }

    fn parse_session_list(&self, output: &str) -> Option<String> {
        self.inner().parse_session_list(output)
    }
}

/// Maps configured agent names to adapters. Unknown names resolve to the
/// default agent, so lookups never fail.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    default: AgentAdapter,
    others: HashMap<AgentId, AgentAdapter>,
}

impl AgentRegistry {
    pub fn new(default: AgentAdapter) -> Self {
        Self {
            default,
            others: HashMap::new(),
        }
    }

    /// Registry holding every built-in agent, configured through `lookup`.
    pub fn from_lookup<F>(default: AgentId, default_timeout: Duration, lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new(AgentAdapter::new(AgentConfig::resolve(
            default,
            default_timeout,
            &lookup,
        )?));
        for id in AgentId::all() {
            if id != default {
                registry.register(AgentAdapter::new(AgentConfig::resolve(id, default_timeout, &lookup)?));
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: AgentAdapter) {
        if adapter.id() == self.default.id() {
            self.default = adapter;
        } else {
            self.others.insert(adapter.id(), adapter);
        }
    }

    pub fn default_id(&self) -> AgentId {
        self.default.id()
    }

    fn lookup(&self, id: AgentId) -> Option<&AgentAdapter> {
        if id == self.default.id() {
            Some(&self.default)
        } else {
            self.others.get(&id)
        }
    }

    pub fn normalize(&self, name: Option<&str>) -> AgentId {
        name.and_then(AgentId::parse)
            .filter(|id| self.lookup(*id).is_some())
            .unwrap_or_else(|| self.default.id())
    }

    pub fn is_known(&self, name: &str) -> bool {
        AgentId::parse(name).is_some_and(|id| self.lookup(id).is_some())
    }

    pub fn get(&self, name: Option<&str>) -> &AgentAdapter {
        self.lookup(self.normalize(name)).unwrap_or(&self.default)
    }

    pub fn label(&self, name: Option<&str>) -> &str {
        self.get(name).label()
    }

    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.others.keys().copied().collect();
        ids.push(self.default.id());
        ids.sort_by_key(|id| id.as_str());
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TURN_TIMEOUT;

    fn registry() -> AgentRegistry {
        AgentRegistry::from_lookup(AgentId::Codex, DEFAULT_TURN_TIMEOUT, |_| None).unwrap()
    }

    #[test]
    fn normalize_falls_back_to_default() {
        let registry = registry();
        assert_eq!(registry.normalize(None), AgentId::Codex);
        assert_eq!(registry.normalize(Some("claude")), AgentId::Codex);
        assert_eq!(registry.normalize(Some("  GEMINI ")), AgentId::Gemini);
    }

    #[test]
    fn unregistered_agent_is_unknown() {
        let registry = AgentRegistry::new(AgentAdapter::new(AgentConfig::defaults(AgentId::Gemini)));
        assert!(registry.is_known("gemini"));
        assert!(!registry.is_known("codex"));
        assert_eq!(registry.get(Some("codex")).id(), AgentId::Gemini);
    }

    #[test]
    fn label_comes_from_config() {
        let registry = AgentRegistry::from_lookup(AgentId::Gemini, DEFAULT_TURN_TIMEOUT, |key| {
            (key == "GEMINI_LABEL").then(|| "Gemini CLI".to_string())
        })
        .unwrap();
        assert_eq!(registry.label(None), "Gemini CLI");
        assert_eq!(registry.label(Some("codex")), "codex");
        assert_eq!(registry.ids(), vec![AgentId::Codex, AgentId::Gemini, AgentId::Generic]);
    }
}
