use crate::retention::RetentionPolicy;
use autobackup_common::LifecycleEvent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config format: {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),
}

/// Service configuration. Keys are PascalCase on disk; missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AutoBackupConfig {
    /// Master switch. When off no event is subscribed and repair does not run.
    pub enabled: bool,
    pub auto_backup: EventTriggers,
    /// Snapshots kept per profile. Zero or negative keeps everything.
    pub maximum_backup_per_profile: i64,
    pub maximum_backup_delete_log: bool,
    pub backup_saved_log: bool,
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_backup: EventTriggers::default(),
            maximum_backup_per_profile: 10,
            maximum_backup_delete_log: true,
            backup_saved_log: true,
        }
    }
}

/// Which lifecycle events take a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EventTriggers {
    pub on_game_start: bool,
    pub on_raid_start: bool,
    pub on_raid_end: bool,
    pub on_logout: bool,
}

impl Default for EventTriggers {
    fn default() -> Self {
        Self {
            on_game_start: true,
            on_raid_start: false,
            on_raid_end: true,
            on_logout: true,
        }
    }
}

impl EventTriggers {
    pub fn enabled(&self, event: LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::GameStart => self.on_game_start,
            LifecycleEvent::RaidStart => self.on_raid_start,
            LifecycleEvent::RaidEnd => self.on_raid_end,
            LifecycleEvent::Logout => self.on_logout,
        }
    }
}

impl AutoBackupConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Whether `event` reaches the service at all.
    pub fn is_subscribed(&self, event: LifecycleEvent) -> bool {
        self.enabled && self.auto_backup.enabled(event)
    }

    pub fn subscribed_events(&self) -> Vec<LifecycleEvent> {
        LifecycleEvent::ALL
            .into_iter()
            .filter(|e| self.is_subscribed(*e))
            .collect()
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_count: self.maximum_backup_per_profile,
            log_deletions: self.maximum_backup_delete_log,
        }
    }
}
