//! User settings, stored as JSON in the per-user config directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};
use crate::state::library::atomic_write;

const APP_DIR_NAME: &str = "video-catalog";
const SETTINGS_FILENAME: &str = "settings.json";

/// How preview thumbnails are produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub enabled: bool,
    /// Position of the representative frame, from the start of the video
    pub frame_offset_ms: u64,
    pub max_width: u32,
    pub max_height: u32,
    /// `ffmpeg` executable used when not decoding in-process
    pub ffmpeg_binary: PathBuf,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        PreviewSettings {
            enabled: true,
            frame_offset_ms: 500,
            max_width: 320,
            max_height: 240,
            ffmpeg_binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl PreviewSettings {
    pub fn frame_offset(&self) -> Duration {
        Duration::from_millis(self.frame_offset_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Dataset opened in the previous session
    pub last_dataset: Option<PathBuf>,
    /// `tracing` filter directive, overridden by the environment
    pub log_filter: Option<String>,
    pub preview: PreviewSettings,
}

impl Settings {
    /// `<config dir>/video-catalog/settings.json`, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join(APP_DIR_NAME).join(SETTINGS_FILENAME))
    }

    /// Load from the default location. Problems fall back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            warn!("⚠️  No config directory, using default settings");
            return Settings::default();
        };
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("⚠️  {}; using default settings", e);
                Settings::default()
            }
        }
    }

    /// Load from `path`; a missing file gives defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(CatalogError::persistence(path, e)),
        };
        serde_json::from_str(&text).map_err(|e| CatalogError::MalformedMetadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_path().ok_or_else(|| {
            CatalogError::persistence(
                APP_DIR_NAME,
                io::Error::new(io::ErrorKind::NotFound, "no config directory"),
            )
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CatalogError::persistence(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            CatalogError::persistence(path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        atomic_write(path, json.as_bytes()).map_err(|e| CatalogError::persistence(path, e))
    }
}
