#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::TempDir;

use aipal::artifacts::ArtifactPathGuard;
use aipal::bridge::SessionBridge;
use aipal::config_store::JsonConfigStore;
use aipal::context::ExecutionContext;
use aipal::prompt::PromptEncoder;
use aipal::relay::{Relay, ReplySink, Transcriber};
use aipal::scripts::ScriptSandbox;
use aipal_agent_management::{AgentId, AgentRegistry};
use aipal_error::{RelayError, Result};

/// One command the relay typed into a session.
#[derive(Debug, Clone)]
pub struct Call {
    pub session: String,
    /// The agent invocation between the markers.
    pub agent_command: String,
    /// Decoded prompt, when the turn carried one.
    pub prompt: Option<String>,
}

type Responder = Box<dyn Fn(&Call) -> Option<String> + Send + Sync>;

/// Terminal stand-in that answers each command through a responder. A
/// responder returning `None` leaves the command hanging.
pub struct ScriptedContext {
    responder: Responder,
    screens: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

impl ScriptedContext {
    pub fn new(responder: impl Fn(&Call) -> Option<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            screens: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.screens.lock().unwrap().keys().cloned().collect();
        sessions.sort();
        sessions
    }
}

#[async_trait]
impl ExecutionContext for ScriptedContext {
    async fn ensure(&self, session: &str) -> Result<()> {
        self.screens
            .lock()
            .unwrap()
            .entry(session.to_string())
            .or_default();
        Ok(())
    }

    async fn send(&self, session: &str, command: &str) -> Result<()> {
        let token = between(command, "<<<BEGIN:", ">>>").ok_or_else(|| RelayError::InvalidRequest {
            message: format!("no marker in {command}"),
        })?;
        let begin = format!("<<<BEGIN:{token}>>>");
        let end = format!("<<<END:{token}>>>");
        let agent_command = between(command, &format!("printf '\\n{begin}\\n'; "), &format!("; printf '\\n{end}\\n'"))
            .unwrap_or_default()
            .to_string();
        let prompt = between(command, "PROMPT_B64='", "'")
            .map(|encoded| String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap());
        let call = Call {
            session: session.to_string(),
            agent_command,
            prompt,
        };
        let reply = (self.responder)(&call);
        self.calls.lock().unwrap().push(call);

        let mut screens = self.screens.lock().unwrap();
        let screen = screens.entry(session.to_string()).or_default();
        screen.push_str(&format!("$ {command}\n"));
        if let Some(reply) = reply {
            screen.push_str(&format!("\n{begin}\n{reply}\n\n{end}\n$ "));
        }
        Ok(())
    }

    async fn capture(&self, session: &str) -> Result<String> {
        Ok(self
            .screens
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn destroy(&self, session: &str) -> Result<bool> {
        Ok(self.screens.lock().unwrap().remove(session).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Photo(PathBuf),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, Sent)>>,
}

impl RecordingSink {
    pub fn sent(&self, conversation_id: &str) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(conversation, _)| conversation == conversation_id)
            .map(|(_, sent)| sent.clone())
            .collect()
    }

    pub fn texts(&self, conversation_id: &str) -> Vec<String> {
        self.sent(conversation_id)
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text(text) => Some(text),
                Sent::Photo(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn reply(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), Sent::Text(text.to_string())));
        Ok(())
    }

    async fn send_photo(&self, conversation_id: &str, path: &Path) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), Sent::Photo(path.to_path_buf())));
        Ok(())
    }

    async fn typing(&self, _conversation_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Returns whatever it was built with.
pub struct FixedTranscriber(pub String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A relay wired to a scripted context, with its directories kept alive.
pub struct Harness {
    pub relay: Arc<Relay>,
    pub context: Arc<ScriptedContext>,
    pub sink: Arc<RecordingSink>,
    pub dir: TempDir,
}

impl Harness {
    pub fn image_dir(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.dir.path().join("scripts")
    }
}

pub struct HarnessOptions {
    pub agent: AgentId,
    pub env: Vec<(&'static str, &'static str)>,
    pub timeout: Duration,
    pub transcriber: Option<String>,
    pub script_output_to_agent: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            agent: AgentId::Codex,
            env: Vec::new(),
            timeout: Duration::from_secs(2),
            transcriber: None,
            script_output_to_agent: false,
        }
    }
}

pub fn harness(
    options: HarnessOptions,
    responder: impl Fn(&Call) -> Option<String> + Send + Sync + 'static,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let image_dir = dir.path().join("images");
    let scripts_dir = dir.path().join("scripts");
    std::fs::create_dir_all(&image_dir).unwrap();
    std::fs::create_dir_all(&scripts_dir).unwrap();

    let env: HashMap<String, String> = options
        .env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let registry = AgentRegistry::from_lookup(options.agent, options.timeout, |key| env.get(key).cloned()).unwrap();

    let context = ScriptedContext::new(responder);
    let sink = Arc::new(RecordingSink::default());
    let bridge = SessionBridge::new(context.clone(), "aipal").with_poll_interval(Duration::from_millis(5));
    let mut relay = Relay::new(
        registry,
        bridge,
        PromptEncoder::new(&image_dir),
        ScriptSandbox::new(&scripts_dir).with_timeout(Duration::from_secs(5)),
        ArtifactPathGuard::new(&image_dir),
        Arc::new(JsonConfigStore::new(dir.path().join("config.json"))),
        sink.clone(),
    )
    .with_script_output_to_agent(options.script_output_to_agent);
    if let Some(transcript) = options.transcriber {
        relay = relay.with_transcriber(Arc::new(FixedTranscriber(transcript)));
    }

    Harness {
        relay: Arc::new(relay),
        context,
        sink,
        dir,
    }
}

pub fn codex_turn(thread_id: Option<&str>, text: &str) -> String {
    let mut lines = Vec::new();
    if let Some(thread_id) = thread_id {
        lines.push(serde_json::json!({"type": "thread.started", "thread_id": thread_id}).to_string());
    }
    lines.push(
        serde_json::json!({"type": "item.completed", "item": {"type": "agent_message", "text": text}})
            .to_string(),
    );
    lines.join("\n")
}
