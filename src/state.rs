// Application state management
// Shared by reference between the control thread and the audio thread
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::LockError;
use crate::playback::{PlaybackIntent, LOCK_TIMEOUT};
use crate::settings::SettingsStore;

/// Delay between attempts when shared state is busy
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Attempts before a non-real-time caller gives up
pub const RETRY_ATTEMPTS: u32 = 8;

/// A user request for what to play after the current track is interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
    /// Physical track index
    Select(usize),
}

pub struct AppState {
    pub intent: PlaybackIntent,
    pub settings: SettingsStore,
    navigation: Mutex<Option<Navigation>>,
}

impl AppState {
    pub fn new(intent: PlaybackIntent, settings: SettingsStore) -> Self {
        Self {
            intent,
            settings,
            navigation: Mutex::new(None),
        }
    }

    /// Record a navigation request. A newer request replaces an unconsumed one.
    pub fn request_navigation(&self, navigation: Navigation) -> Result<(), LockError> {
        let mut slot = self.navigation.try_lock_for(LOCK_TIMEOUT).ok_or(LockError {
            what: "navigation",
            waited: LOCK_TIMEOUT,
        })?;
        *slot = Some(navigation);
        Ok(())
    }

    pub fn take_navigation(&self) -> Result<Option<Navigation>, LockError> {
        let mut slot = self.navigation.try_lock_for(LOCK_TIMEOUT).ok_or(LockError {
            what: "navigation",
            waited: LOCK_TIMEOUT,
        })?;
        Ok(slot.take())
    }
}

/// Run `op` until it succeeds, sleeping `backoff` between failures.
///
/// Returns the last error once `attempts` are used up.
pub fn retry_with_backoff<T, E, F>(what: &str, attempts: u32, backoff: Duration, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}; retrying", what, attempt, attempts, e);
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
