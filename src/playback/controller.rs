// Playback intent shared between the UI thread and the audio thread
// One mutex guards every flag; the condvar is signalled on each transition

use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::LockError;

/// How long any operation waits for the intent lock before giving up
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Why a paused writer woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Playing,
    Interrupted,
    Closing,
}

#[derive(Debug, Default)]
struct IntentState {
    playing: bool,
    interrupt: bool,
    closing: bool,
}

/// What the user wants the audio thread to do.
///
/// The writer never polls `playing`: it blocks in
/// [`PlaybackIntent::wait_while_paused`] until a transition is signalled.
/// Every operation takes the lock with a bounded wait and reports a
/// [`LockError`] rather than blocking forever.
#[derive(Debug)]
pub struct PlaybackIntent {
    state: Mutex<IntentState>,
    changed: Condvar,
    lock_timeout: Duration,
}

impl Default for PlaybackIntent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl PlaybackIntent {
    pub fn new(playing: bool) -> Self {
        Self {
            state: Mutex::new(IntentState {
                playing,
                ..IntentState::default()
            }),
            changed: Condvar::new(),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, IntentState>, LockError> {
        self.state
            .try_lock_for(self.lock_timeout)
            .ok_or(LockError {
                what: "playback",
                waited: self.lock_timeout,
            })
    }

    pub fn resume(&self) -> Result<(), LockError> {
        debug!("resuming audio...");
        let mut state = self.lock()?;
        state.playing = true;
        self.changed.notify_all();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), LockError> {
        debug!("pausing audio...");
        let mut state = self.lock()?;
        state.playing = false;
        self.changed.notify_all();
        Ok(())
    }

    /// Flip between playing and paused, returning the new state.
    pub fn toggle(&self) -> Result<bool, LockError> {
        let mut state = self.lock()?;
        state.playing = !state.playing;
        self.changed.notify_all();
        debug!("toggled playback; playing = {}", state.playing);
        Ok(state.playing)
    }

    pub fn is_playing(&self) -> Result<bool, LockError> {
        Ok(self.lock()?.playing)
    }

    /// Ask the writer to abandon the current track.
    pub fn interrupt(&self) -> Result<(), LockError> {
        info!("interrupt requested");
        let mut state = self.lock()?;
        state.interrupt = true;
        self.changed.notify_all();
        Ok(())
    }

    /// Consume a pending interrupt. Each request is delivered at most once.
    pub fn check_and_clear_interrupt(&self) -> Result<bool, LockError> {
        let mut state = self.lock()?;
        Ok(std::mem::take(&mut state.interrupt))
    }

    /// Signal that the application is shutting down; wakes every waiter.
    pub fn close(&self) -> Result<(), LockError> {
        info!("close requested");
        let mut state = self.lock()?;
        state.closing = true;
        self.changed.notify_all();
        Ok(())
    }

    pub fn is_closing(&self) -> Result<bool, LockError> {
        Ok(self.lock()?.closing)
    }

    /// Block until playback may proceed.
    ///
    /// Returns immediately when already playing. A close or interrupt request
    /// also ends the wait so a paused track can be skipped or torn down.
    pub fn wait_while_paused(&self) -> Result<Wake, LockError> {
        let mut state = self.lock()?;
        loop {
            if state.closing {
                return Ok(Wake::Closing);
            }
            if state.interrupt {
                return Ok(Wake::Interrupted);
            }
            if state.playing {
                return Ok(Wake::Playing);
            }
            debug!("paused; waiting for resume");
            self.changed.wait(&mut state);
        }
    }
}
