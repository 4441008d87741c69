//! Slash commands backed by executables in a scripts directory.
//!
//! A command `/name args...` runs `<root>/name` directly (no shell) with the
//! arguments split shell-style. Only plain names are accepted, and the
//! resolved file must live inside the root and be executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use aipal_error::{RelayError, Result};

use crate::artifacts::contains;

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum bytes kept from each of stdout and stderr (64KB).
pub const DEFAULT_MAX_OUTPUT: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether either stream exceeded the output cap.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    root: PathBuf,
    timeout: Duration,
    max_output: usize,
}

/// Script names are restricted to `[A-Za-z0-9_-]+`.
pub fn is_valid_script_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ScriptSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates `name` and returns the executable it refers to.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_script_name(name) {
            return Err(RelayError::InvalidScriptName {
                name: name.to_string(),
            });
        }
        let candidate = self.root.join(name);
        if !contains(&self.root, &candidate) {
            return Err(RelayError::ScriptOutsideRoot {
                name: name.to_string(),
            });
        }
        let metadata = match std::fs::metadata(&candidate) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::ScriptNotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() || !is_executable(&metadata) {
            return Err(RelayError::ScriptNotExecutable {
                name: name.to_string(),
            });
        }
        Ok(candidate)
    }

    /// Runs `/name raw_args` and returns its output when it exits successfully.
    pub async fn run(&self, name: &str, raw_args: &str) -> Result<ScriptOutput> {
        let path = self.resolve(name)?;
        let args = shell_words::split(raw_args).map_err(|err| RelayError::InvalidArguments {
            message: err.to_string(),
        })?;

        info!(script = %name, args = args.len(), "Executing script");
        let started = Instant::now();
        let mut child = Command::new(&path)
            .args(&args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_output;

        let execution = async {
            let (stdout, stderr, status) =
                tokio::join!(read_capped(stdout, cap), read_capped(stderr, cap), child.wait());
            Ok::<_, std::io::Error>((stdout?, stderr?, status?))
        };

        let ((stdout, out_truncated), (stderr, err_truncated), status) =
            match tokio::time::timeout(self.timeout, execution).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(script = %name, timeout_secs = self.timeout.as_secs(), "Script timed out");
                    return Err(RelayError::ScriptTimedOut {
                        name: name.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
            };

        let output = ScriptOutput {
            stdout,
            stderr,
            truncated: out_truncated || err_truncated,
        };
        debug!(
            script = %name,
            exit_code = ?status.code(),
            duration_ms = started.elapsed().as_millis() as u64,
            truncated = output.truncated,
            "Script completed"
        );
        if !status.success() {
            warn!(script = %name, exit_code = ?status.code(), stderr = %output.stderr.trim(), "Script failed");
            return Err(RelayError::ScriptFailed {
                name: name.to_string(),
                exit_code: status.code(),
                stderr: Some(output.stderr),
            });
        }
        Ok(output)
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Drains `reader` to the end, keeping at most `cap` bytes so the child
/// never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<(String, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((String::new(), false));
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok((String::from_utf8_lossy(&kept).into_owned(), truncated))
}
