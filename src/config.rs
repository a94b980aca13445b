use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::StoreTier;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-exten-sync.
///
/// Opaque to the reconciliation core: only the remote store and the watcher
/// read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Remote repository URL; empty means not configured yet.
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "defaults::branch")]
    pub branch: String,
    /// Path of the data file inside the repository.
    #[serde(default = "defaults::file_path")]
    pub file_path: String,
    /// Pull automatically while running in watch mode.
    #[serde(default)]
    pub auto_sync: bool,
    /// Seconds between automatic pulls in watch mode.
    #[serde(default = "defaults::sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Completion-watcher poll cadence while pending actions exist.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Root for the durable store tiers and the transport's working tree.
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    /// The host profile's installed-extension inventory file.
    #[serde(default = "defaults::inventory_path")]
    pub inventory_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            repo_url: String::new(),
            username: String::new(),
            password: String::new(),
            branch: defaults::branch(),
            file_path: defaults::file_path(),
            auto_sync: false,
            sync_interval_secs: defaults::sync_interval_secs(),
            poll_interval_ms: defaults::poll_interval_ms(),
            data_dir: defaults::data_dir(),
            inventory_path: defaults::inventory_path(),
        }
    }
}

impl Settings {
    /// Load configuration from the config file and environment variables.
    /// A missing config file yields defaults; commands that need a remote
    /// fail later with a not-configured status instead.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading git-exten-sync config from {:?}", config_path);
        let mut settings = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Settings::default()
        };

        if let Ok(url) = env::var("EXTEN_SYNC_REPO_URL") {
            settings.repo_url = url;
        }
        if let Ok(username) = env::var("EXTEN_SYNC_USERNAME") {
            settings.username = username;
        }
        if let Ok(password) = env::var("EXTEN_SYNC_PASSWORD") {
            settings.password = password;
        }
        if let Ok(branch) = env::var("EXTEN_SYNC_BRANCH") {
            settings.branch = branch;
        }
        if let Ok(path) = env::var("EXTEN_SYNC_DATA_DIR") {
            settings.data_dir = expand_tilde(&PathBuf::from(path));
        }
        if let Ok(path) = env::var("EXTEN_SYNC_INVENTORY") {
            settings.inventory_path = expand_tilde(&PathBuf::from(path));
        }
        if let Ok(interval) = env::var("EXTEN_SYNC_POLL_INTERVAL_MS") {
            settings.poll_interval_ms = interval
                .parse()
                .context("Failed to parse EXTEN_SYNC_POLL_INTERVAL_MS as u64")?;
        }
        Ok(settings)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;

        let mut settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path:?}"))?;

        settings.data_dir = expand_tilde(&settings.data_dir);
        settings.inventory_path = expand_tilde(&settings.inventory_path);

        Ok(settings)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {parent:?}"))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;

        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-exten-sync/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    /// Strict import of a user-supplied settings document. Malformed input
    /// is rejected outright; unknown keys are dropped, known keys merged
    /// over the current values.
    pub fn merge_import(&self, bytes: &[u8]) -> Result<Settings, SyncError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::MalformedDocument(e.to_string()))?;
        let serde_json::Value::Object(map) = value else {
            return Err(SyncError::MalformedDocument(
                "settings document must be a JSON object".to_string(),
            ));
        };

        let mut current = serde_json::to_value(self)
            .map_err(|e| SyncError::MalformedDocument(e.to_string()))?;
        if let Some(known) = current.as_object_mut() {
            for (key, value) in map {
                if known.contains_key(&key) {
                    known.insert(key, value);
                }
            }
        }
        serde_json::from_value(current).map_err(|e| SyncError::MalformedDocument(e.to_string()))
    }

    pub fn is_configured(&self) -> bool {
        !self.repo_url.trim().is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Directory backing one durable store tier, under the data dir.
    pub fn store_dir(&self, tier: StoreTier) -> PathBuf {
        self.data_dir.join(tier.dir_name())
    }

    /// Working tree for the git transport.
    pub fn repo_workdir(&self) -> PathBuf {
        self.data_dir.join("repo")
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn branch() -> String {
        "main".to_string()
    }

    pub(crate) fn file_path() -> String {
        "extensions.json".to_string()
    }

    pub(crate) fn sync_interval_secs() -> u64 {
        300
    }

    pub(crate) fn poll_interval_ms() -> u64 {
        1_000
    }

    pub(crate) fn data_dir() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".local/share/git-exten-sync"))
            .unwrap_or_else(|| PathBuf::from(".git-exten-sync"))
    }

    pub(crate) fn inventory_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".config/git-exten-sync/installed.json"))
            .unwrap_or_else(|| PathBuf::from("installed.json"))
    }
}
