//! Containment checks for files the agent asks us to send.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

fn image_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\[\[image:([^\]\n]+)\]\]").expect("valid image token pattern"))
}

/// Absolute form of `path` with `.` and `..` folded, without touching the
/// filesystem. Relative paths are taken from the current directory.
pub fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                resolved.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
        }
    }
    resolved
}

/// Whether `candidate` is `root` or lies below it.
pub fn contains(root: &Path, candidate: &Path) -> bool {
    let root = resolve(root);
    let candidate = resolve(candidate);
    candidate == root || candidate.starts_with(&root)
}

/// Text with artifact tokens removed plus the references that passed the guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub cleaned_text: String,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ArtifactPathGuard {
    root: PathBuf,
}

impl ArtifactPathGuard {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: resolve(root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, candidate: &Path) -> bool {
        contains(&self.root, candidate)
    }

    /// Pulls `[[image:<path>]]` references out of `text`. References outside
    /// the root are dropped; the tokens never reach the user either way.
    pub fn extract_references(&self, text: &str) -> Extracted {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut lines = Vec::new();

        for line in text.lines() {
            if !image_token().is_match(line) {
                lines.push(line.to_string());
                continue;
            }
            for captures in image_token().captures_iter(line) {
                let raw = captures[1].trim();
                let raw = raw.strip_prefix("file://").unwrap_or(raw);
                if raw.is_empty() {
                    continue;
                }
                let reference = Path::new(raw);
                let resolved = if reference.is_absolute() {
                    resolve(reference)
                } else {
                    resolve(&self.root.join(reference))
                };
                if !self.contains(&resolved) {
                    warn!(path = %resolved.display(), root = %self.root.display(), "ignoring image path outside image root");
                    continue;
                }
                if !paths.contains(&resolved) {
                    paths.push(resolved);
                }
            }
            let stripped = image_token().replace_all(line, "");
            lines.push(stripped.split_whitespace().collect::<Vec<_>>().join(" "));
        }

        Extracted {
            cleaned_text: lines.join("\n").trim().to_string(),
            paths,
        }
    }
}
