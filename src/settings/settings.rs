// Settings management and persistence
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audio::output::PerformanceMode;
use crate::audio::scaler::MAX_VOLUME;
use crate::error::SettingsError;

/// Playback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub repeat: bool,
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>, // None = time-derived at startup
    pub performance_mode: PerformanceMode,
    pub current_track: usize, // Physical index into the track listing
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            repeat: false,
            shuffle: false,
            shuffle_seed: None,
            performance_mode: PerformanceMode::default(),
            current_track: 0,
        }
    }
}

/// Volume settings, 0-100
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub master: u8,
    pub tracks: BTreeMap<String, u8>, // Keyed by file name
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            master: MAX_VOLUME,
            tracks: BTreeMap::new(),
        }
    }
}

impl VolumeSettings {
    pub fn track(&self, name: &str) -> u8 {
        self.tracks.get(name).copied().unwrap_or(MAX_VOLUME)
    }

    /// Master and per-track volume combined
    pub fn effective(&self, name: &str) -> u8 {
        let combined = u32::from(self.master) * u32::from(self.track(name)) / u32::from(MAX_VOLUME);
        combined.min(u32::from(MAX_VOLUME)) as u8
    }
}

/// Library settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    pub track_path: Option<PathBuf>,
}

/// Main player settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub version: i32, // Settings schema version for future migrations
    pub playback: PlaybackSettings,
    pub volume: VolumeSettings,
    pub library: LibrarySettings,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            version: 1,
            playback: PlaybackSettings::default(),
            volume: VolumeSettings::default(),
            library: LibrarySettings::default(),
        }
    }
}

impl PlayerSettings {
    /// Get the settings file path
    pub fn get_settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(app_dir: &Path) -> Result<Self, SettingsError> {
        let path = Self::get_settings_path(app_dir);

        if !path.exists() {
            info!("No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let settings: PlayerSettings = serde_json::from_str(&content)?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    ///
    /// The file is replaced by rename, so a reader sees either the old or the
    /// new contents. Concurrent callers must serialize around this.
    pub fn save(&self, app_dir: &Path) -> Result<(), SettingsError> {
        // Ensure directory exists
        fs::create_dir_all(app_dir)?;

        let path = Self::get_settings_path(app_dir);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }
}
