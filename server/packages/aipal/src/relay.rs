//! Routes inbound chat events to agents, scripts and built-in commands.
//!
//! [`Relay`] owns every piece of per-conversation state: the thread store,
//! the session bridge and the queue that keeps each conversation's events in
//! order. Transport concerns stay behind [`ReplySink`] and [`Transcriber`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use aipal_agent_management::{Agent, AgentAdapter, AgentConfig, AgentRegistry, TurnState};
use aipal_error::{RelayError, Result};

use crate::artifacts::{self, ArtifactPathGuard};
use crate::bridge::{SessionBridge, Turn, PROMPT_EXPRESSION};
use crate::config_store::{ConfigMap, ConfigStore, RuntimeSettings};
use crate::message::{chunk_text, parse_slash_command, SlashCommand, MAX_REPLY_CHARS};
use crate::prompt::PromptEncoder;
use crate::queue::{PerConversationQueue, QueueTicket};
use crate::scripts::ScriptSandbox;
use crate::threads::ThreadStateStore;

const TYPING_INTERVAL: Duration = Duration::from_secs(4);
const SESSION_LIST_TIMEOUT: Duration = Duration::from_secs(30);

pub const NO_RESPONSE: &str = "(no response)";
pub const EMPTY_TRANSCRIPT: &str = "I couldn't transcribe the audio.";
pub const DEFAULT_IMAGE_CAPTION: &str = "User sent an image.";
pub const SESSION_RESET: &str = "Session reset.";
pub const NO_ACTIVE_SESSION: &str = "No active session.";

pub const ERROR_RESPONSE: &str = "Error processing response.";
pub const ERROR_AUDIO: &str = "Error processing audio.";
pub const ERROR_IMAGE: &str = "Error processing image.";
pub const ERROR_SCRIPT: &str = "Error running script.";
pub const ERROR_SETTINGS: &str = "Error updating settings.";

/// Outbound half of the chat transport.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, conversation_id: &str, text: &str) -> Result<()>;

    async fn send_photo(&self, conversation_id: &str, path: &Path) -> Result<()>;

    /// Shows a "typing" indicator. Called repeatedly while a turn runs.
    async fn typing(&self, conversation_id: &str) -> Result<()>;
}

/// Speech-to-text for audio messages.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Text(String),
    /// Already downloaded audio file.
    Audio { path: PathBuf },
    /// Already downloaded image; must live under the image root.
    Image { path: PathBuf, caption: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub conversation_id: String,
    pub kind: InboundKind,
}

impl InboundEvent {
    pub fn text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: InboundKind::Text(text.into()),
        }
    }

    pub fn audio(conversation_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: InboundKind::Audio { path: path.into() },
        }
    }

    pub fn image(conversation_id: impl Into<String>, path: impl Into<PathBuf>, caption: Option<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: InboundKind::Image {
                path: path.into(),
                caption,
            },
        }
    }
}

/// Wraps the agent invocation with the redirections its capture flags ask for.
pub fn apply_capture_flags(command: &str, config: &AgentConfig) -> String {
    let mut redirects = Vec::new();
    if !config.needs_pty {
        redirects.push("< /dev/null");
    }
    redirects.push(if config.merge_stderr { "2>&1" } else { "2>/dev/null" });
    format!("{{ {command}; }} {}", redirects.join(" "))
}

/// Sends typing indicators until dropped.
struct TypingGuard(JoinHandle<()>);

impl TypingGuard {
    fn start(sink: Arc<dyn ReplySink>, conversation_id: &str) -> Self {
        let conversation_id = conversation_id.to_string();
        Self(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TYPING_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(err) = sink.typing(&conversation_id).await {
                    debug!(conversation_id = %conversation_id, error = %err, "typing indicator failed");
                }
            }
        }))
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Relay {
    registry: AgentRegistry,
    bridge: SessionBridge,
    threads: ThreadStateStore,
    queue: PerConversationQueue,
    encoder: PromptEncoder,
    scripts: ScriptSandbox,
    guard: ArtifactPathGuard,
    config: Arc<dyn ConfigStore>,
    sink: Arc<dyn ReplySink>,
    transcriber: Option<Arc<dyn Transcriber>>,
    script_output_to_agent: bool,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .field("bridge", &self.bridge)
            .field("queue", &self.queue)
            .field("guard", &self.guard)
            .field("script_output_to_agent", &self.script_output_to_agent)
            .finish()
    }
}

impl Relay {
    pub fn new(
        registry: AgentRegistry,
        bridge: SessionBridge,
        encoder: PromptEncoder,
        scripts: ScriptSandbox,
        guard: ArtifactPathGuard,
        config: Arc<dyn ConfigStore>,
        sink: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            registry,
            bridge,
            threads: ThreadStateStore::new(),
            queue: PerConversationQueue::new(),
            encoder,
            scripts,
            guard,
            config,
            sink,
            transcriber: None,
            script_output_to_agent: false,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Feeds script output to the agent as extra context instead of replying
    /// with it directly.
    pub fn with_script_output_to_agent(mut self, enabled: bool) -> Self {
        self.script_output_to_agent = enabled;
        self
    }

    pub fn threads(&self) -> &ThreadStateStore {
        &self.threads
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Queues `event` behind everything already queued for its conversation.
    pub fn handle(self: &Arc<Self>, event: InboundEvent) -> QueueTicket {
        let relay = Arc::clone(self);
        let conversation_id = event.conversation_id.clone();
        self.queue
            .enqueue(&conversation_id, async move { relay.process(event).await })
    }

    async fn process(self: Arc<Self>, event: InboundEvent) -> Result<()> {
        let conversation_id = event.conversation_id.as_str();
        match &event.kind {
            InboundKind::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                if let Some(command) = parse_slash_command(text) {
                    return self.handle_command(conversation_id, text, command).await;
                }
                let _typing = TypingGuard::start(self.sink.clone(), conversation_id);
                match self.run_turn(conversation_id, text, &[], None).await {
                    Ok(response) => self.deliver(conversation_id, &response).await,
                    Err(err) => self.reply_error(conversation_id, ERROR_RESPONSE, &err).await,
                }
            }
            InboundKind::Audio { path } => {
                let _typing = TypingGuard::start(self.sink.clone(), conversation_id);
                match self.transcribe_and_run(conversation_id, path).await {
                    Ok(Some(response)) => self.deliver(conversation_id, &response).await,
                    Ok(None) => self.reply(conversation_id, EMPTY_TRANSCRIPT).await,
                    Err(err) => self.reply_error(conversation_id, ERROR_AUDIO, &err).await,
                }
            }
            InboundKind::Image { path, caption } => {
                if !self.guard.contains(path) {
                    warn!(
                        conversation_id = %conversation_id,
                        path = %path.display(),
                        "ignoring image outside image root"
                    );
                    return Ok(());
                }
                let _typing = TypingGuard::start(self.sink.clone(), conversation_id);
                let caption = caption
                    .as_deref()
                    .map(str::trim)
                    .filter(|caption| !caption.is_empty())
                    .unwrap_or(DEFAULT_IMAGE_CAPTION);
                let attachments = [artifacts::resolve(path)];
                match self.run_turn(conversation_id, caption, &attachments, None).await {
                    Ok(response) => self.deliver(conversation_id, &response).await,
                    Err(err) => self.reply_error(conversation_id, ERROR_IMAGE, &err).await,
                }
            }
        }
    }

    async fn transcribe_and_run(&self, conversation_id: &str, path: &Path) -> Result<Option<String>> {
        let transcriber = self.transcriber.as_ref().ok_or_else(|| RelayError::Transcription {
            message: "no transcriber configured".to_string(),
        })?;
        let transcript = transcriber.transcribe(path).await?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Ok(None);
        }
        info!(conversation_id = %conversation_id, chars = transcript.chars().count(), "audio transcribed");
        self.run_turn(conversation_id, transcript, &[], None).await.map(Some)
    }

    async fn settings(&self) -> RuntimeSettings {
        match self.config.read_config().await {
            Ok(config) => RuntimeSettings::from_config(&config),
            Err(err) => {
                warn!(error = %err, "failed to read settings, using defaults");
                RuntimeSettings::default()
            }
        }
    }

    /// Runs one agent turn and returns the text to reply with.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        attachments: &[PathBuf],
        extra_context: Option<&str>,
    ) -> Result<String> {
        let settings = self.settings().await;
        let adapter = self.registry.get(settings.agent.as_deref());
        let encoded = self.encoder.encode(user_text, attachments, extra_context);
        let previous_thread = self.threads.get_for(conversation_id, adapter.id());
        let state = TurnState {
            thread_id: previous_thread.as_deref(),
            model: settings.model.as_deref(),
            thinking: settings.thinking.as_deref(),
            prompt_expression: Some(PROMPT_EXPRESSION),
        };
        let command = apply_capture_flags(&adapter.build_command(&encoded.text, &state), adapter.config());
        info!(
            conversation_id = %conversation_id,
            agent = %adapter.id(),
            resume = previous_thread.is_some(),
            "running agent turn"
        );

        let raw = self
            .bridge
            .run(
                conversation_id,
                Turn {
                    command: &command,
                    prompt_base64: Some(&encoded.base64),
                    timeout: adapter.config().timeout,
                    label: adapter.label(),
                },
            )
            .await?;

        let parsed = adapter.parse_output(&raw);
        debug!(
            conversation_id = %conversation_id,
            saw_json = parsed.saw_json,
            thread_id = ?parsed.thread_id,
            "agent output parsed"
        );
        if parsed.thread_id.is_some() {
            self.threads
                .update(conversation_id, adapter.id(), parsed.thread_id.as_deref());
        } else if parsed.saw_json && previous_thread.is_none() {
            self.discover_thread(conversation_id, adapter).await;
        }

        if parsed.text.trim().is_empty() {
            Ok(raw)
        } else {
            Ok(parsed.text)
        }
    }

    /// Looks up the session a fresh turn created, for agents that only
    /// report it through a session listing.
    async fn discover_thread(&self, conversation_id: &str, adapter: &AgentAdapter) {
        let Some(list_command) = adapter.list_sessions_command() else {
            return;
        };
        let command = format!("{list_command} < /dev/null 2>/dev/null");
        let turn = Turn {
            command: &command,
            prompt_base64: None,
            timeout: adapter.config().timeout.min(SESSION_LIST_TIMEOUT),
            label: adapter.label(),
        };
        match self.bridge.run(conversation_id, turn).await {
            Ok(listing) => match adapter.parse_session_list(&listing) {
                Some(thread_id) => {
                    debug!(conversation_id = %conversation_id, thread_id = %thread_id, "session discovered");
                    self.threads.update(conversation_id, adapter.id(), Some(&thread_id));
                }
                None => debug!(conversation_id = %conversation_id, "no session in listing"),
            },
            Err(err) => {
                warn!(conversation_id = %conversation_id, error = %err, "session listing failed");
            }
        }
    }

    /// Forgets the conversation's thread and destroys its session.
    pub async fn reset(&self, conversation_id: &str) -> Result<bool> {
        self.threads.clear(conversation_id);
        self.bridge.reset(conversation_id).await
    }

    async fn handle_command(&self, conversation_id: &str, text: &str, command: SlashCommand) -> Result<()> {
        debug!(conversation_id = %conversation_id, command = %command.name, "slash command");
        match command.name.as_str() {
            "start" => {
                let settings = self.settings().await;
                let label = self.registry.label(settings.agent.as_deref()).to_string();
                self.reply(
                    conversation_id,
                    &format!("Ready. Send a message and I will pass it to {label}."),
                )
                .await
            }
            "reset" => {
                let message = match self.reset(conversation_id).await {
                    Ok(true) => SESSION_RESET,
                    Ok(false) => NO_ACTIVE_SESSION,
                    Err(err) => {
                        warn!(conversation_id = %conversation_id, error = %err, "session reset failed");
                        NO_ACTIVE_SESSION
                    }
                };
                self.reply(conversation_id, message).await
            }
            "agent" => self.select_agent(conversation_id, &command.args).await,
            "model" => self.update_knob(conversation_id, "model", "Model", &command.args).await,
            "thinking" => {
                self.update_knob(conversation_id, "thinking", "Thinking level", &command.args)
                    .await
            }
            name => self.run_script(conversation_id, text, name, &command.args).await,
        }
    }

    fn available_agents(&self) -> String {
        self.registry
            .ids()
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn store_setting(&self, key: &str, value: Value) -> Result<ConfigMap> {
        let mut patch = ConfigMap::new();
        patch.insert(key.to_string(), value);
        self.config.update_config(patch).await
    }

    async fn select_agent(&self, conversation_id: &str, name: &str) -> Result<()> {
        if name.is_empty() {
            let settings = self.settings().await;
            let message = format!(
                "Current agent: {}. Available: {}.",
                self.registry.label(settings.agent.as_deref()),
                self.available_agents()
            );
            return self.reply(conversation_id, &message).await;
        }
        if !self.registry.is_known(name) {
            let message = format!("Unknown agent: {name}. Available: {}.", self.available_agents());
            return self.reply(conversation_id, &message).await;
        }

        let id = self.registry.normalize(Some(name));
        if let Err(err) = self.store_setting("agent", Value::String(id.as_str().to_string())).await {
            return self.reply_error(conversation_id, ERROR_SETTINGS, &err).await;
        }
        // A thread id from one agent means nothing to another.
        self.threads.clear(conversation_id);
        info!(conversation_id = %conversation_id, agent = %id, "agent selected");
        let message = format!("Agent set to {}.", self.registry.label(Some(id.as_str())));
        self.reply(conversation_id, &message).await
    }

    async fn update_knob(&self, conversation_id: &str, key: &str, title: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            let config = self.config.read_config().await.unwrap_or_default();
            let message = match config.get(key).and_then(Value::as_str).filter(|v| !v.is_empty()) {
                Some(current) => format!("{title}: {current}."),
                None => format!("{title}: agent default."),
            };
            return self.reply(conversation_id, &message).await;
        }

        let (stored, message) = if value.eq_ignore_ascii_case("default") {
            (Value::Null, format!("{title} reset to the agent default."))
        } else {
            (Value::String(value.to_string()), format!("{title} set to {value}."))
        };
        match self.store_setting(key, stored).await {
            Ok(_) => self.reply(conversation_id, &message).await,
            Err(err) => self.reply_error(conversation_id, ERROR_SETTINGS, &err).await,
        }
    }

    async fn run_script(&self, conversation_id: &str, text: &str, name: &str, args: &str) -> Result<()> {
        let _typing = TypingGuard::start(self.sink.clone(), conversation_id);
        let output = match self.scripts.run(name, args).await {
            Ok(output) => output,
            Err(err) => return self.reply_error(conversation_id, ERROR_SCRIPT, &err).await,
        };
        let stdout = output.stdout.trim();
        if !self.script_output_to_agent {
            return self.deliver(conversation_id, stdout).await;
        }

        let context = format!("Output of /{name}:\n{stdout}");
        match self.run_turn(conversation_id, text, &[], Some(&context)).await {
            Ok(response) => self.deliver(conversation_id, &response).await,
            Err(err) => self.reply_error(conversation_id, ERROR_RESPONSE, &err).await,
        }
    }

    async fn reply(&self, conversation_id: &str, text: &str) -> Result<()> {
        for chunk in chunk_text(text, MAX_REPLY_CHARS) {
            self.sink.reply(conversation_id, &chunk).await?;
        }
        Ok(())
    }

    async fn reply_error(&self, conversation_id: &str, label: &str, err: &RelayError) -> Result<()> {
        error!(
            conversation_id = %conversation_id,
            error = %err,
            error_type = err.error_type().as_str(),
            "{label}"
        );
        let text = format!("{label}\n{}", err.user_detail());
        self.reply(conversation_id, text.trim()).await
    }

    /// Sends the agent's answer: text first, then each referenced image that
    /// passed the guard and still exists.
    pub async fn deliver(&self, conversation_id: &str, response: &str) -> Result<()> {
        let extracted = self.guard.extract_references(response);
        let text = extracted.cleaned_text.trim();
        if !text.is_empty() {
            self.reply(conversation_id, text).await?;
        }
        for path in &extracted.paths {
            match tokio::fs::try_exists(path).await {
                Ok(true) => {}
                _ => {
                    warn!(conversation_id = %conversation_id, path = %path.display(), "image no longer exists");
                    continue;
                }
            }
            if let Err(err) = self.sink.send_photo(conversation_id, path).await {
                warn!(conversation_id = %conversation_id, path = %path.display(), error = %err, "failed to send image");
            }
        }
        if text.is_empty() && extracted.paths.is_empty() {
            self.reply(conversation_id, NO_RESPONSE).await?;
        }
        Ok(())
    }
}
