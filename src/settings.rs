use serde::{Deserialize, Serialize};
use std::path::Path;
use anyhow::{Context, Result};

use crate::error::JukeboxError;

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "GUILD_JUKEBOX_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub command_prefix: String,
    /// Prepended to queries that are not direct links.
    pub search_prefix: String,
    pub default_volume: u8,
    pub queue_page_size: usize,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            search_prefix: "ytsearch:".to_string(),
            default_volume: 100,
            queue_page_size: 10,
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let mut settings: Settings = serde_json::from_str(&content)
            .context("Failed to parse settings JSON")?;
        settings.default_volume = settings.default_volume.min(100);
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings dir: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), JukeboxError> {
        if self.command_prefix.trim().is_empty() {
            return Err(JukeboxError::Config("command_prefix must not be empty".to_string()));
        }
        if self.search_prefix.is_empty() {
            return Err(JukeboxError::Config("search_prefix must not be empty".to_string()));
        }
        if self.queue_page_size == 0 {
            return Err(JukeboxError::Config("queue_page_size must be at least 1".to_string()));
        }
        Ok(())
    }
}
