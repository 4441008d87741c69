use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::info;

use aipal_agent_management::config::DEFAULT_TURN_TIMEOUT;
use aipal_agent_management::{AgentError, AgentId, AgentRegistry};
use aipal_error::RelayError;

use crate::artifacts::ArtifactPathGuard;
use crate::bridge::SessionBridge;
use crate::config_store::JsonConfigStore;
use crate::console::{run_chat, ConsoleSink};
use crate::context::{ContextKind, ExecutionContext, PtyContext, TmuxContext};
use crate::prompt::PromptEncoder;
use crate::relay::{InboundEvent, Relay};
use crate::scripts::{is_valid_script_name, ScriptSandbox, DEFAULT_MAX_OUTPUT};
use crate::telemetry::init_logging;
use crate::timestamp::parse_offset;
use crate::transcribe::{CommandTranscriber, DEFAULT_TRANSCRIBE_COMMAND};

#[derive(Parser, Debug)]
#[command(name = "aipal")]
#[command(about = "Relay conversations to command-line AI agents", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: RelaySettings,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat from the terminal: each stdin line is one message.
    Chat {
        #[arg(long, default_value = "console")]
        conversation: String,
    },
    /// Send a single message and print the reply.
    Send {
        conversation: String,
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Destroy a conversation's terminal session.
    Reset { conversation: String },
    /// Run a script from the scripts directory as a slash command.
    Script {
        name: String,
        #[arg(long, default_value = "console")]
        conversation: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RelaySettings {
    /// Default agent: codex, gemini or generic.
    #[arg(long, env = "AIPAL_AGENT", default_value = "codex")]
    agent: String,

    #[arg(long, env = "TMUX_SESSION_PREFIX", default_value = "aipal")]
    session_prefix: String,

    /// Scrollback lines read back per poll. A leading `-` is accepted.
    #[arg(long, env = "TMUX_LINES", default_value = "5000", value_parser = parse_lines, allow_hyphen_values = true)]
    capture_lines: u32,

    /// Turn timeout for agents without their own `<AGENT>_TIMEOUT_MS`.
    #[arg(long, env = "AGENT_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[arg(long, env = "AIPAL_POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,

    #[arg(long, env = "AIPAL_CONTEXT", value_enum, default_value_t = ContextKind::Tmux)]
    context: ContextKind,

    #[arg(long, env = "IMAGE_DIR")]
    image_dir: Option<PathBuf>,

    #[arg(long, env = "SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    #[arg(long, env = "SCRIPT_TIMEOUT_SECS", default_value_t = 120)]
    script_timeout_secs: u64,

    #[arg(long, env = "SCRIPT_MAX_OUTPUT", default_value_t = DEFAULT_MAX_OUTPUT)]
    script_max_output: usize,

    /// Pass script output to the agent instead of replying with it.
    #[arg(long, env = "SCRIPT_OUTPUT_TO_AGENT")]
    script_output_to_agent: bool,

    #[arg(long, env = "AIPAL_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// UTC offset (`+01:00`, `UTC`) for timestamping user messages.
    #[arg(long, env = "AIPAL_TIMESTAMP_OFFSET")]
    timestamp_offset: Option<String>,

    /// Speech-to-text command used for audio messages.
    #[arg(long, env = "PARAKEET_CMD", default_value = DEFAULT_TRANSCRIBE_COMMAND)]
    transcribe_cmd: String,

    #[arg(long, env = "PARAKEET_MODEL")]
    transcribe_model: Option<String>,

    #[arg(long, env = "PARAKEET_TIMEOUT_MS", default_value_t = 120_000)]
    transcribe_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent configuration error: {0}")]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
}

fn parse_lines(value: &str) -> Result<u32, String> {
    let digits = value.trim().trim_start_matches('-');
    match digits.parse::<u32>() {
        Ok(lines) if lines > 0 => Ok(lines),
        _ => Err(format!("expected a positive line count, got {value}")),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl RelaySettings {
    fn turn_timeout(&self) -> Duration {
        self.timeout_ms
            .or_else(|| env_var("CODEX_TIMEOUT_MS").and_then(|raw| raw.trim().parse().ok()))
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TURN_TIMEOUT)
    }

    fn image_dir(&self) -> PathBuf {
        self.image_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("aipal").join("images"))
    }

    fn scripts_dir(&self) -> PathBuf {
        self.scripts_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("aipal")
                .join("scripts")
        })
    }

    /// Wires every component from these settings and the agent environment.
    pub fn build_relay(&self) -> Result<Arc<Relay>, CliError> {
        let default_agent =
            AgentId::parse(&self.agent).ok_or_else(|| CliError::UnknownAgent(self.agent.clone()))?;
        let registry = AgentRegistry::from_lookup(default_agent, self.turn_timeout(), env_var)?;

        let context: Arc<dyn ExecutionContext> = match self.context {
            ContextKind::Tmux => Arc::new(TmuxContext::new(self.capture_lines)),
            ContextKind::Pty => Arc::new(PtyContext::new(self.capture_lines)),
        };
        let bridge = SessionBridge::new(context, self.session_prefix.clone())
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms.max(1)));

        let image_dir = self.image_dir();
        std::fs::create_dir_all(&image_dir)?;
        let mut encoder = PromptEncoder::new(&image_dir);
        if let Some(offset) = self.timestamp_offset.as_deref().filter(|v| !v.trim().is_empty()) {
            encoder = encoder.with_timestamps(parse_offset(offset)?);
        }

        let scripts = ScriptSandbox::new(self.scripts_dir())
            .with_timeout(Duration::from_secs(self.script_timeout_secs))
            .with_max_output(self.script_max_output);
        let config_path = self.config_path.clone().unwrap_or_else(JsonConfigStore::default_path);
        let transcriber = CommandTranscriber::new(
            self.transcribe_cmd.clone(),
            std::env::temp_dir().join("aipal").join("transcripts"),
        )
        .with_model(self.transcribe_model.clone())
        .with_timeout(Duration::from_millis(self.transcribe_timeout_ms.max(1)));

        info!(
            agent = %default_agent,
            context = ?self.context,
            image_dir = %image_dir.display(),
            scripts_dir = %scripts.root().display(),
            config_path = %config_path.display(),
            transcribe_cmd = %self.transcribe_cmd,
            "relay configured"
        );

        let relay = Relay::new(
            registry,
            bridge,
            encoder,
            scripts,
            ArtifactPathGuard::new(&image_dir),
            Arc::new(JsonConfigStore::new(config_path)),
            Arc::new(ConsoleSink::default()),
        )
        .with_script_output_to_agent(self.script_output_to_agent)
        .with_transcriber(Arc::new(transcriber));
        Ok(Arc::new(relay))
    }
}

/// Slash-command text for `aipal script`. Names that could never be a
/// command are rejected here instead of reaching the agent as a prompt.
fn script_command_text(name: &str, args: &[String]) -> Result<String, RelayError> {
    if !is_valid_script_name(name) {
        return Err(RelayError::InvalidScriptName {
            name: name.to_string(),
        });
    }
    if args.is_empty() {
        Ok(format!("/{name}"))
    } else {
        Ok(format!("/{name} {}", shell_words::join(args)))
    }
}

pub fn run_aipal() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Runtime(err.to_string()))?;

    runtime.block_on(async move {
        let relay = cli.settings.build_relay()?;
        match cli.command {
            Command::Chat { conversation } => run_chat(relay, &conversation).await?,
            Command::Send { conversation, message } => {
                relay
                    .handle(InboundEvent::text(conversation, message.join(" ")))
                    .wait()
                    .await;
            }
            Command::Reset { conversation } => {
                relay.handle(InboundEvent::text(conversation, "/reset")).wait().await;
            }
            Command::Script { name, conversation, args } => {
                let text = script_command_text(&name, &args)?;
                relay.handle(InboundEvent::text(conversation, text)).wait().await;
            }
        }
        Ok(())
    })
}
