use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use aipal_error::{RelayError, Result};

use super::ExecutionContext;

/// Bytes of raw output kept per session before the oldest are dropped.
const MAX_SCROLLBACK_BYTES: usize = 4 * 1024 * 1024;

/// Typed once into each new shell: no prompts, and no echo or line
/// buffering so long command lines are not truncated by the tty.
const SHELL_INIT: &str = "stty -echo -icanon 2>/dev/null; PS1=''; PS2=''; export PS1 PS2\n";

/// Accumulated terminal output, decoded incrementally as UTF-8.
#[derive(Debug, Default)]
struct Scrollback {
    text: String,
    pending: Vec<u8>,
}

impl Scrollback {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }
        if self.text.len() > MAX_SCROLLBACK_BYTES {
            let mut cut = self.text.len() - MAX_SCROLLBACK_BYTES;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    /// The last `lines` lines with terminal line endings normalized.
    fn tail(&self, lines: usize) -> String {
        let normalized = self.text.replace("\r\n", "\n").replace('\r', "");
        let all: Vec<&str> = normalized.split('\n').collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

struct PtySession {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: Arc<StdMutex<Scrollback>>,
}

/// One `/bin/sh` per session, each in its own pseudo terminal, owned by this
/// process. Sessions do not outlive the process.
pub struct PtyContext {
    shell: String,
    capture_lines: usize,
    sessions: Mutex<HashMap<String, PtySession>>,
}

impl std::fmt::Debug for PtyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyContext")
            .field("shell", &self.shell)
            .field("capture_lines", &self.capture_lines)
            .finish()
    }
}

impl PtyContext {
    pub fn new(capture_lines: u32) -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            capture_lines: capture_lines as usize,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn spawn_session(&self, session: &str) -> Result<PtySession> {
        let unavailable = |what: &str, err: String| RelayError::ContextUnavailable {
            message: format!("{what} for {session}: {err}"),
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 50,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| unavailable("failed to create PTY", e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.env("TERM", "dumb");
        cmd.env("PS1", "");
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| unavailable("failed to spawn shell", e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| unavailable("failed to get PTY writer", e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| unavailable("failed to get PTY reader", e.to_string()))?;

        let output = Arc::new(StdMutex::new(Scrollback::default()));
        let sink = output.clone();
        let name = session.to_string();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut scrollback) => scrollback.push(&buf[..n]),
                        Err(_) => break,
                    },
                    Err(err) => {
                        debug!(session = %name, error = %err, "PTY read ended");
                        break;
                    }
                }
            }
        });

        writer.write_all(SHELL_INIT.as_bytes())?;
        writer.flush()?;

        Ok(PtySession {
            _master: pair.master,
            child,
            writer,
            output,
        })
    }
}

impl Default for PtyContext {
    fn default() -> Self {
        Self::new(super::tmux::DEFAULT_CAPTURE_LINES)
    }
}

#[async_trait]
impl ExecutionContext for PtyContext {
    async fn ensure(&self, session: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get_mut(session) {
            match existing.child.try_wait() {
                Ok(None) => return Ok(()),
                _ => {
                    warn!(session = %session, "PTY shell exited, starting a new one");
                    sessions.remove(session);
                }
            }
        }
        let spawned = self.spawn_session(session)?;
        sessions.insert(session.to_string(), spawned);
        info!(session = %session, "PTY session created");
        Ok(())
    }

    async fn send(&self, session: &str, command: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let pty = sessions
            .get_mut(session)
            .ok_or_else(|| RelayError::ContextUnavailable {
                message: format!("no PTY session named {session}"),
            })?;
        pty.writer.write_all(command.as_bytes())?;
        pty.writer.write_all(b"\n")?;
        pty.writer.flush()?;
        Ok(())
    }

    async fn capture(&self, session: &str) -> Result<String> {
        let sessions = self.sessions.lock().await;
        let pty = sessions
            .get(session)
            .ok_or_else(|| RelayError::ContextUnavailable {
                message: format!("no PTY session named {session}"),
            })?;
        let scrollback = pty.output.lock().map_err(|_| RelayError::ContextUnavailable {
            message: format!("scrollback for {session} is poisoned"),
        })?;
        Ok(scrollback.tail(self.capture_lines))
    }

    async fn destroy(&self, session: &str) -> Result<bool> {
        let Some(mut pty) = self.sessions.lock().await.remove(session) else {
            return Ok(false);
        };
        if let Err(err) = pty.child.kill() {
            debug!(session = %session, error = %err, "PTY shell already gone");
        }
        info!(session = %session, "PTY session closed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn scrollback_joins_split_utf8() {
        let mut scrollback = Scrollback::default();
        let bytes = "héllo".as_bytes();
        scrollback.push(&bytes[..2]);
        scrollback.push(&bytes[2..]);
        assert_eq!(scrollback.tail(10), "héllo");
    }

    #[test]
    fn scrollback_tail_normalizes_crlf() {
        let mut scrollback = Scrollback::default();
        scrollback.push(b"one\r\ntwo\r\nthree");
        assert_eq!(scrollback.tail(2), "two\nthree");
    }

    #[test]
    fn scrollback_replaces_invalid_bytes() {
        let mut scrollback = Scrollback::default();
        scrollback.push(b"a\xffb");
        assert_eq!(scrollback.tail(1), "a\u{fffd}b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_round_trip() {
        let context = PtyContext::new(200);
        context.ensure("aipal-pty-test").await.unwrap();
        context.ensure("aipal-pty-test").await.unwrap();
        context
            .send("aipal-pty-test", "printf 'ready-%s\\n' 42")
            .await
            .unwrap();

        let mut captured = String::new();
        for _ in 0..50 {
            captured = context.capture("aipal-pty-test").await.unwrap();
            if captured.lines().any(|line| line.trim() == "ready-42") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(captured.lines().any(|line| line.trim() == "ready-42"), "{captured}");

        assert!(context.destroy("aipal-pty-test").await.unwrap());
        assert!(!context.destroy("aipal-pty-test").await.unwrap());
    }
}
