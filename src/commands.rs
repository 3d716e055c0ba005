// UI command handlers
// Called from the control thread; lock failures are retried with backoff
use tracing::{info, warn};

use crate::state::{retry_with_backoff, AppState, Navigation, RETRY_ATTEMPTS, RETRY_BACKOFF};

fn retry<T, E: std::fmt::Display>(
    what: &str,
    op: impl FnMut() -> Result<T, E>,
) -> Result<T, String> {
    retry_with_backoff(what, RETRY_ATTEMPTS, RETRY_BACKOFF, op)
        .map_err(|e| format!("Failed to {}: {}", what, e))
}

/// Persist after a UI mutation. The in-memory value stays authoritative on failure.
fn persist(state: &AppState) {
    if let Err(e) = state.settings.save() {
        warn!("Failed to save settings: {}", e);
    }
}

pub fn toggle_playback(state: &AppState) -> Result<bool, String> {
    let playing = retry("toggle playback", || state.intent.toggle())?;
    info!("Playback {}", if playing { "resumed" } else { "paused" });
    Ok(playing)
}

pub fn play(state: &AppState) -> Result<(), String> {
    retry("resume playback", || state.intent.resume())
}

pub fn pause(state: &AppState) -> Result<(), String> {
    retry("pause playback", || state.intent.pause())
}

fn navigate(state: &AppState, navigation: Navigation) -> Result<(), String> {
    retry("request navigation", || state.request_navigation(navigation))?;
    retry("interrupt playback", || state.intent.interrupt())?;
    info!("Navigation requested: {:?}", navigation);
    Ok(())
}

pub fn next_track(state: &AppState) -> Result<(), String> {
    navigate(state, Navigation::Next)
}

pub fn previous_track(state: &AppState) -> Result<(), String> {
    navigate(state, Navigation::Previous)
}

/// Jump to a track by its index in the listing
pub fn select_track(state: &AppState, track: usize) -> Result<(), String> {
    navigate(state, Navigation::Select(track))
}

/// Flip shuffle; takes effect at the next track boundary
pub fn toggle_shuffle(state: &AppState) -> Result<bool, String> {
    let shuffle = retry("toggle shuffle", || {
        state.settings.update(|s| {
            s.playback.shuffle = !s.playback.shuffle;
            s.playback.shuffle
        })
    })?;
    info!("Shuffle {}", if shuffle { "on" } else { "off" });
    persist(state);
    Ok(shuffle)
}

pub fn toggle_repeat(state: &AppState) -> Result<bool, String> {
    let repeat = retry("toggle repeat", || {
        state.settings.update(|s| {
            s.playback.repeat = !s.playback.repeat;
            s.playback.repeat
        })
    })?;
    info!("Repeat {}", if repeat { "on" } else { "off" });
    persist(state);
    Ok(repeat)
}

pub fn set_volume(state: &AppState, volume: u8) -> Result<(), String> {
    retry("set volume", || state.settings.set_master_volume(volume))?;
    persist(state);
    Ok(())
}

pub fn set_track_volume(state: &AppState, name: &str, volume: u8) -> Result<(), String> {
    retry("set track volume", || state.settings.set_track_volume(name, volume))?;
    persist(state);
    Ok(())
}

/// Ask the audio thread to finish; wakes it if paused
pub fn close(state: &AppState) -> Result<(), String> {
    retry("close playback", || state.intent.close())
}
