// Shared settings store
// Every get/set takes the lock with a bounded wait; persistence is explicit

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::settings::PlayerSettings;
use crate::audio::engine::VolumeSource;
use crate::audio::output::PerformanceMode;
use crate::audio::scaler::MAX_VOLUME;
use crate::error::{LockError, SettingsError};
use crate::playback::LOCK_TIMEOUT;

pub struct SettingsStore {
    app_dir: Option<PathBuf>,
    inner: Mutex<PlayerSettings>,
    /// Serializes writers of the settings file
    save_lock: Mutex<()>,
    lock_timeout: Duration,
}

impl SettingsStore {
    /// Load from `app_dir`, writing defaults there if no file exists yet.
    pub fn open(app_dir: &Path) -> Result<Self, SettingsError> {
        let existed = PlayerSettings::get_settings_path(app_dir).exists();
        let settings = PlayerSettings::load(app_dir)?;
        if !existed {
            settings.save(app_dir)?;
        }
        Ok(Self {
            app_dir: Some(app_dir.to_path_buf()),
            inner: Mutex::new(settings),
            save_lock: Mutex::new(()),
            lock_timeout: LOCK_TIMEOUT,
        })
    }

    /// A store that never touches disk
    pub fn in_memory(settings: PlayerSettings) -> Self {
        Self {
            app_dir: None,
            inner: Mutex::new(settings),
            save_lock: Mutex::new(()),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn app_dir(&self) -> Option<&Path> {
        self.app_dir.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlayerSettings>, SettingsError> {
        self.inner
            .try_lock_for(self.lock_timeout)
            .ok_or(SettingsError::Busy(LockError {
                what: "settings",
                waited: self.lock_timeout,
            }))
    }

    pub fn read<T>(&self, f: impl FnOnce(&PlayerSettings) -> T) -> Result<T, SettingsError> {
        Ok(f(&*self.lock()?))
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut PlayerSettings) -> T) -> Result<T, SettingsError> {
        Ok(f(&mut *self.lock()?))
    }

    pub fn snapshot(&self) -> Result<PlayerSettings, SettingsError> {
        self.read(Clone::clone)
    }

    /// Write the current settings to disk. A no-op for in-memory stores.
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(app_dir) = &self.app_dir else {
            return Ok(());
        };
        let _saving = self
            .save_lock
            .try_lock_for(self.lock_timeout)
            .ok_or(SettingsError::Busy(LockError {
                what: "settings file",
                waited: self.lock_timeout,
            }))?;
        // Serialize from a copy so the settings lock is not held across file I/O
        self.snapshot()?.save(app_dir)
    }

    pub fn repeat(&self) -> Result<bool, SettingsError> {
        self.read(|s| s.playback.repeat)
    }

    pub fn set_repeat(&self, repeat: bool) -> Result<(), SettingsError> {
        self.update(|s| s.playback.repeat = repeat)
    }

    pub fn shuffle(&self) -> Result<bool, SettingsError> {
        self.read(|s| s.playback.shuffle)
    }

    pub fn set_shuffle(&self, shuffle: bool) -> Result<(), SettingsError> {
        self.update(|s| s.playback.shuffle = shuffle)
    }

    pub fn shuffle_seed(&self) -> Result<Option<u64>, SettingsError> {
        self.read(|s| s.playback.shuffle_seed)
    }

    pub fn performance_mode(&self) -> Result<PerformanceMode, SettingsError> {
        self.read(|s| s.playback.performance_mode)
    }

    pub fn current_track(&self) -> Result<usize, SettingsError> {
        self.read(|s| s.playback.current_track)
    }

    pub fn set_current_track(&self, track: usize) -> Result<(), SettingsError> {
        self.update(|s| s.playback.current_track = track)
    }

    pub fn master_volume(&self) -> Result<u8, SettingsError> {
        self.read(|s| s.volume.master)
    }

    pub fn set_master_volume(&self, volume: u8) -> Result<(), SettingsError> {
        self.update(|s| s.volume.master = volume.min(MAX_VOLUME))
    }

    pub fn track_volume(&self, name: &str) -> Result<u8, SettingsError> {
        self.read(|s| s.volume.track(name))
    }

    pub fn set_track_volume(&self, name: &str, volume: u8) -> Result<(), SettingsError> {
        self.update(|s| {
            s.volume.tracks.insert(name.to_string(), volume.min(MAX_VOLUME));
        })
    }

    pub fn log_dump(&self) {
        match self.snapshot() {
            Ok(settings) => info!("Settings: {:?}", settings),
            Err(e) => debug!("Settings unavailable for dump: {}", e),
        }
    }
}

/// Volume for one track: master x track / 100, read fresh on every burst.
pub struct TrackVolume<'a> {
    store: &'a SettingsStore,
    name: &'a str,
}

impl<'a> TrackVolume<'a> {
    pub fn new(store: &'a SettingsStore, name: &'a str) -> Self {
        Self { store, name }
    }
}

impl VolumeSource for TrackVolume<'_> {
    fn volume(&self) -> Result<u8, SettingsError> {
        self.store.read(|s| s.volume.effective(self.name))
    }
}
