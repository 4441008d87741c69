//! Runtime settings that chat commands can change (`/agent`, `/model`, `/thinking`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use aipal_error::{RelayError, Result};

pub type ConfigMap = Map<String, Value>;

/// Key-value settings persisted across restarts.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read_config(&self) -> Result<ConfigMap>;

    /// Shallow-merges `patch` into the stored settings and returns the result.
    async fn update_config(&self, patch: ConfigMap) -> Result<ConfigMap>;
}

/// Settings read at the start of every turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl RuntimeSettings {
    /// Picks the known string keys out of `config`; anything else is ignored.
    pub fn from_config(config: &ConfigMap) -> Self {
        let text = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            agent: text("agent"),
            model: text("model"),
            thinking: text("thinking"),
        }
    }
}

/// Stores settings as a pretty-printed JSON object in a single file.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/aipal/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("aipal")
            .join("config.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ConfigMap> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigMap::new()),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            return Ok(ConfigMap::new());
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Err(RelayError::Config {
                message: format!("{} does not contain a JSON object", self.path.display()),
            }),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn read_config(&self) -> Result<ConfigMap> {
        self.load().await
    }

    async fn update_config(&self, patch: ConfigMap) -> Result<ConfigMap> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load().await?;
        config.extend(patch);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut contents = serde_json::to_string_pretty(&config)?;
        contents.push('\n');
        tokio::fs::write(&self.path, contents).await?;
        debug!(path = %self.path.display(), keys = config.len(), "config updated");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn patch(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonConfigStore::new(dir.path().join("config.json"));
        assert!(store.read_config().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_merge_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = JsonConfigStore::new(&path);
        store.update_config(patch(json!({"model": "gpt-5.2"}))).await.unwrap();
        store.update_config(patch(json!({"thinking": "medium"}))).await.unwrap();

        let reopened = JsonConfigStore::new(&path);
        let config = reopened.read_config().await.unwrap();
        assert_eq!(Value::Object(config), json!({"model": "gpt-5.2", "thinking": "medium"}));
    }

    #[tokio::test]
    async fn non_object_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = JsonConfigStore::new(&path).read_config().await.unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }), "{err:?}");
    }

    #[test]
    fn runtime_settings_ignore_blank_and_foreign_values() {
        let settings = RuntimeSettings::from_config(&patch(json!({
            "agent": " gemini ",
            "model": "",
            "thinking": 3
        })));
        assert_eq!(
            settings,
            RuntimeSettings {
                agent: Some("gemini".to_string()),
                model: None,
                thinking: None,
            }
        );
    }
}
