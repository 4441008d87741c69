//! Terminal transport: stdin lines in, replies on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use aipal_error::Result;

use crate::relay::{InboundEvent, Relay, ReplySink};

/// Prints replies to stdout. Typing indicators are not shown.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    stdout: Mutex<Option<tokio::io::Stdout>>,
}

impl ConsoleSink {
    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdout.lock().await;
        let stdout = guard.get_or_insert_with(tokio::io::stdout);
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ReplySink for ConsoleSink {
    async fn reply(&self, _conversation_id: &str, text: &str) -> Result<()> {
        self.write_line(text).await
    }

    async fn send_photo(&self, _conversation_id: &str, path: &Path) -> Result<()> {
        self.write_line(&format!("[image] {}", path.display())).await
    }

    async fn typing(&self, _conversation_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Reads one console line into an event. `!image <path> [caption]` and
/// `!audio <path>` stand in for attachments.
pub fn parse_console_line(conversation_id: &str, line: &str) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix("!image ") {
        let rest = rest.trim();
        let (path, caption) = match rest.split_once(char::is_whitespace) {
            Some((path, caption)) => (path, Some(caption.trim().to_string())),
            None => (rest, None),
        };
        return Some(InboundEvent::image(conversation_id, PathBuf::from(path), caption));
    }
    if let Some(path) = line.strip_prefix("!audio ") {
        return Some(InboundEvent::audio(conversation_id, PathBuf::from(path.trim())));
    }
    Some(InboundEvent::text(conversation_id, line))
}

/// Feeds stdin to `relay` until end of input, one event at a time.
pub async fn run_chat(relay: Arc<Relay>, conversation_id: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = parse_console_line(conversation_id, &line) {
            relay.handle(event).wait().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InboundKind;

    #[test]
    fn plain_lines_are_text() {
        let event = parse_console_line("c", "  hello  ").unwrap();
        assert_eq!(event.kind, InboundKind::Text("hello".to_string()));
        assert!(parse_console_line("c", "   ").is_none());
    }

    #[test]
    fn image_lines_carry_caption() {
        let event = parse_console_line("c", "!image /tmp/a.png what is this?").unwrap();
        assert_eq!(
            event.kind,
            InboundKind::Image {
                path: PathBuf::from("/tmp/a.png"),
                caption: Some("what is this?".to_string()),
            }
        );
        let event = parse_console_line("c", "!image /tmp/a.png").unwrap();
        assert_eq!(
            event.kind,
            InboundKind::Image {
                path: PathBuf::from("/tmp/a.png"),
                caption: None,
            }
        );
    }

    #[test]
    fn audio_lines() {
        let event = parse_console_line("c", "!audio /tmp/v.ogg").unwrap();
        assert_eq!(
            event.kind,
            InboundKind::Audio {
                path: PathBuf::from("/tmp/v.ogg"),
            }
        );
    }
}
