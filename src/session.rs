// Session driver
// Decode the next track, stream it, then move through the order by result

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::audio::decoder::PcmDecoder;
use crate::audio::engine::{PlayResult, StreamingEngine};
use crate::audio::format::{PcmFile, SampleBuffer};
use crate::audio::output::AudioBackend;
use crate::error::{OrderError, Result};
use crate::library::Library;
use crate::queue::TrackOrder;
use crate::settings::TrackVolume;
use crate::state::{retry_with_backoff, AppState, Navigation, RETRY_ATTEMPTS, RETRY_BACKOFF};

/// Decoded PCM for the current track is written here, inside the data directory
pub const CACHE_FILE_NAME: &str = "cache.wav";

/// Why [`Session::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Close was requested.
    Closed,
    /// Every track in the listing failed to decode or open.
    NothingPlayable,
}

/// Plays the listing track by track on the calling thread.
///
/// The current logical position lives here; the physical track index is
/// mirrored into settings so a restart resumes on the same track.
pub struct Session<B, D> {
    engine: StreamingEngine<B>,
    decoder: D,
    state: Arc<AppState>,
    library: Library,
    order: TrackOrder,
    position: usize,
    cache_path: PathBuf,
    buffer: SampleBuffer,
    retry_backoff: Duration,
}

impl<B: AudioBackend, D: PcmDecoder> Session<B, D> {
    pub fn new(
        engine: StreamingEngine<B>,
        decoder: D,
        state: Arc<AppState>,
        library: Library,
        cache_dir: &Path,
        seed: u64,
    ) -> Result<Self> {
        let shuffle = retry_with_backoff("read shuffle", RETRY_ATTEMPTS, RETRY_BACKOFF, || {
            state.settings.shuffle()
        })?;
        let order = TrackOrder::new(library.len(), seed, shuffle)?;

        let saved = retry_with_backoff("read current track", RETRY_ATTEMPTS, RETRY_BACKOFF, || {
            state.settings.current_track()
        })?;
        let track = if saved < library.len() {
            saved
        } else {
            warn!("Saved track {} is past the end of the listing; starting over", saved);
            0
        };
        let position = order.position_of(track)?;

        info!(
            "Session ready: {} tracks, shuffle {}, seed {}, starting at track {}",
            library.len(),
            shuffle,
            seed,
            track
        );

        Ok(Self {
            engine,
            decoder,
            state,
            library,
            order,
            position,
            cache_path: cache_dir.join(CACHE_FILE_NAME),
            buffer: SampleBuffer::default(),
            retry_backoff: RETRY_BACKOFF,
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn order(&self) -> &TrackOrder {
        &self.order
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Physical index of the track at the current position
    pub fn current_track(&self) -> Result<usize> {
        Ok(self.order.at(self.position)?)
    }

    /// Play until closed, or until nothing in the listing can be played.
    pub fn run(&mut self) -> Result<SessionEnd> {
        let mut failures = 0;

        loop {
            if self.state.intent.is_closing()? {
                info!("Session closing");
                return Ok(SessionEnd::Closed);
            }

            self.sync_shuffle();
            let track = self.current_track()?;
            self.remember(track);

            let result = match self.play_track(track) {
                Ok(result) => {
                    failures = 0;
                    result
                }
                Err(e) => {
                    warn!("Skipping track {} ({:?}): {}", track, e.kind(), e);
                    failures += 1;
                    if failures >= self.library.len() {
                        error!("None of the {} tracks could be played", failures);
                        return Ok(SessionEnd::NothingPlayable);
                    }
                    self.advance()?;
                    continue;
                }
            };

            debug!("Track {} ended: {:?}", track, result);
            match result {
                PlayResult::Finished | PlayResult::TimeLimit => self.advance()?,
                PlayResult::Interrupted => self.navigate(),
                PlayResult::Closing => {
                    info!("Session closing");
                    return Ok(SessionEnd::Closed);
                }
                PlayResult::StreamError => {
                    warn!("Track {} ended early on a stream error", track);
                    self.advance()?;
                }
                PlayResult::ControlFailure(e) => return Err(e.into()),
            }
        }
    }

    fn play_track(&mut self, track: usize) -> Result<PlayResult> {
        let len = self.library.len();
        let path = self
            .library
            .path(track)
            .ok_or(OrderError::OutOfRange { index: track, len })?;
        let name = self.library.name(track).unwrap_or_default();
        info!("Playing track {}: {:?}", track, path);

        self.decoder.decode_to_pcm(path, &self.cache_path)?;
        let mut source = PcmFile::open(&self.cache_path)?;
        let config = source.header().stream_config();

        match self.state.settings.performance_mode() {
            Ok(mode) => self.engine.set_performance_mode(mode),
            Err(e) => warn!("Keeping previous performance mode: {}", e),
        }

        let volume = TrackVolume::new(&self.state.settings, name);
        let result = self.engine.play(
            &config,
            &mut source,
            &mut self.buffer,
            &self.state.intent,
            &volume,
        )?;
        Ok(result)
    }

    /// Move to the next position. Wrapping pauses unless repeat is on.
    fn advance(&mut self) -> Result<()> {
        let (position, wrapped) = self.order.next_position(self.position);
        self.position = position;
        if !wrapped {
            return Ok(());
        }

        info!("Reached the end of the playlist");
        self.reload_library();

        let repeat = retry_with_backoff("read repeat", RETRY_ATTEMPTS, self.retry_backoff, || {
            self.state.settings.repeat()
        })
        .unwrap_or_else(|e| {
            warn!("Repeat setting unavailable, assuming off: {}", e);
            false
        });
        if !repeat {
            info!("Repeat is off; pausing");
            retry_with_backoff("pause", RETRY_ATTEMPTS, self.retry_backoff, || {
                self.state.intent.pause()
            })?;
        }
        Ok(())
    }

    /// Pick the next position after an interrupt.
    ///
    /// Without a pending request the same track plays again.
    fn navigate(&mut self) {
        let navigation = match self.state.take_navigation() {
            Ok(navigation) => navigation,
            Err(e) => {
                warn!("Navigation request unavailable: {}", e);
                None
            }
        };

        match navigation {
            Some(Navigation::Next) => {
                self.position = self.order.next_position(self.position).0;
            }
            Some(Navigation::Previous) => {
                self.position = self.order.previous_position(self.position);
            }
            Some(Navigation::Select(track)) => match self.order.position_of(track) {
                Ok(position) => self.position = position,
                Err(e) => warn!("Ignoring selection: {}", e),
            },
            None => info!("Interrupted without navigation; replaying track"),
        }
    }

    /// Apply the shuffle setting at a track boundary.
    ///
    /// A fresh shuffle keeps the upcoming track and reorders around it.
    fn sync_shuffle(&mut self) {
        let shuffle = match self.state.settings.shuffle() {
            Ok(shuffle) => shuffle,
            Err(e) => {
                debug!("Shuffle setting unavailable: {}", e);
                return;
            }
        };

        let upcoming = self.order.at(self.position);
        if self.order.set_shuffle(shuffle) {
            info!("Shuffle enabled; playlist reshuffled");
            if let Ok(track) = upcoming {
                if let Ok(position) = self.order.position_of(track) {
                    self.position = position;
                }
            }
        }
    }

    /// Rescan the music directory and adopt any changed listing.
    ///
    /// A new track count resets the order and starts from its first position.
    fn reload_library(&mut self) {
        let library = match self.library.reload() {
            Ok(library) => library,
            Err(e) => {
                warn!("Keeping previous track listing: {:#}", e);
                return;
            }
        };
        if library.tracks() == self.library.tracks() {
            return;
        }

        if library.len() == self.library.len() {
            info!("Track listing changed; keeping the order of {} tracks", library.len());
            self.library = library;
            return;
        }

        info!(
            "Track count changed {} -> {}",
            self.library.len(),
            library.len()
        );
        if let Err(e) = self.order.resize(library.len()) {
            warn!("Keeping previous track listing: {}", e);
            return;
        }
        if self.order.is_shuffled() {
            self.order.reshuffle();
        }
        self.library = library;
        self.position = 0;
    }

    /// Mirror the current track into settings; failures leave memory authoritative.
    fn remember(&self, track: usize) {
        let stored = retry_with_backoff("store current track", RETRY_ATTEMPTS, self.retry_backoff, || {
            self.state.settings.set_current_track(track)
        })
        .and_then(|()| self.state.settings.save());
        if let Err(e) = stored {
            warn!("Failed to persist current track {}: {}", track, e);
        }
    }
}
