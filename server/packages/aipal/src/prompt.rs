use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use time::{OffsetDateTime, UtcOffset};

use crate::timestamp::prefix_with_timestamp;

/// Final prompt text and its base64 form for transport through the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPrompt {
    pub text: String,
    pub base64: String,
}

/// Assembles what the agent reads for one turn.
#[derive(Debug, Clone)]
pub struct PromptEncoder {
    image_root: PathBuf,
    timestamp_offset: Option<UtcOffset>,
}

impl PromptEncoder {
    pub fn new(image_root: impl Into<PathBuf>) -> Self {
        Self {
            image_root: image_root.into(),
            timestamp_offset: None,
        }
    }

    /// Prefixes user text with the local time at `offset`.
    pub fn with_timestamps(mut self, offset: UtcOffset) -> Self {
        self.timestamp_offset = Some(offset);
        self
    }

    pub fn build(&self, user_text: &str, attachments: &[PathBuf], extra_context: Option<&str>) -> String {
        self.build_at(user_text, attachments, extra_context, OffsetDateTime::now_utc())
    }

    pub fn build_at(
        &self,
        user_text: &str,
        attachments: &[PathBuf],
        extra_context: Option<&str>,
        at: OffsetDateTime,
    ) -> String {
        let mut lines = Vec::new();
        let trimmed = user_text.trim();
        if !trimmed.is_empty() {
            lines.push(match self.timestamp_offset {
                Some(offset) => prefix_with_timestamp(trimmed, at, offset),
                None => trimmed.to_string(),
            });
        }
        if !attachments.is_empty() {
            lines.push("User sent image file(s):".to_string());
            lines.extend(attachments.iter().map(|path| format!("- {}", path.display())));
            lines.push("Read images from those paths if needed.".to_string());
        }
        if let Some(context) = extra_context.map(str::trim).filter(|context| !context.is_empty()) {
            lines.push(context.to_string());
        }
        lines.push(output_instructions(&self.image_root));
        lines.join("\n")
    }

    pub fn encode(&self, user_text: &str, attachments: &[PathBuf], extra_context: Option<&str>) -> EncodedPrompt {
        let text = self.build(user_text, attachments, extra_context);
        let base64 = STANDARD.encode(text.as_bytes());
        EncodedPrompt { text, base64 }
    }
}

fn output_instructions(image_root: &Path) -> String {
    format!(
        "If you generate an image, save it under {} and reply with [[image:/absolute/path]] so the bot can send it.",
        image_root.display()
    )
}
