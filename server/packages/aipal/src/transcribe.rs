//! Speech-to-text through an external command.
//!
//! The command is invoked as
//! `<cmd> <audio> --output-dir <dir> --output-format txt --output-template <name> [--model <m>]`
//! and is expected to write `<dir>/<name>.txt`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use aipal_error::{RelayError, Result};

use crate::relay::Transcriber;

pub const DEFAULT_TRANSCRIBE_COMMAND: &str = "parakeet-mlx";
pub const DEFAULT_TRANSCRIBE_TIMEOUT: Duration = Duration::from_millis(120_000);

#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    command: String,
    model: Option<String>,
    timeout: Duration,
    output_dir: PathBuf,
}

impl CommandTranscriber {
    pub fn new(command: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            model: None,
            timeout: DEFAULT_TRANSCRIBE_TIMEOUT,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|model| !model.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn arguments(&self, audio_path: &Path, template: &str) -> Vec<String> {
        let mut args = vec![
            audio_path.display().to_string(),
            "--output-dir".to_string(),
            self.output_dir.display().to_string(),
            "--output-format".to_string(),
            "txt".to_string(),
            "--output-template".to_string(),
            template.to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let template = format!("transcript-{}", uuid::Uuid::new_v4());
        let started = Instant::now();

        let child = Command::new(&self.command)
            .args(self.arguments(audio_path, &template))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => RelayError::Transcription {
                    message: format!("can't find {}. Install it and try again.", self.command),
                },
                _ => err.into(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(command = %self.command, timeout_ms = self.timeout.as_millis() as u64, "transcription timed out");
                return Err(RelayError::Timeout {
                    label: self.command.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        if !output.status.success() {
            return Err(RelayError::InvocationFailed {
                command: self.command.clone(),
                exit_code: output.status.code(),
                stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }

        let transcript_path = self.output_dir.join(format!("{template}.txt"));
        let text = tokio::fs::read_to_string(&transcript_path).await?;
        if let Err(err) = tokio::fs::remove_file(&transcript_path).await {
            debug!(path = %transcript_path.display(), error = %err, "failed to remove transcript");
        }
        debug!(
            command = %self.command,
            duration_ms = started.elapsed().as_millis() as u64,
            chars = text.chars().count(),
            "audio transcribed"
        );
        Ok(text.trim().to_string())
    }
}
