use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use threadlens_core::DiscoverySettings;
use threadlens_logging::lens_info;

use crate::chat::ChatSettings;
use crate::fetch::FetchSettings;
use crate::persist::write_atomic;
use crate::search::SearchSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("failed to write config: {0}")]
    Write(String),
}

/// Top-level settings. Missing sections and fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadlensConfig {
    pub fetch: FetchSettings,
    pub search: SearchSettings,
    pub chat: ChatSettings,
    pub discovery: DiscoverySettings,
}

impl ThreadlensConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        ron::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads `path`, or returns the defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            lens_info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|err| ConfigError::Write(err.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_ron_string()?;
        write_atomic(path, &text).map_err(|err| ConfigError::Write(err.to_string()))
    }
}
