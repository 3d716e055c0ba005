// Streaming engine
// Owns one hardware stream per track and pushes PCM to it a burst at a time

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::format::{PcmSource, SampleBuffer, StreamConfig};
use super::output::{AudioBackend, AudioStream, PerformanceMode};
use super::scaler::{gain_from_volume, scale_buffer};
use crate::error::{HardwareError, LockError, SettingsError, StreamError};
use crate::playback::{PlaybackIntent, Wake};

/// Upper bound on a single hardware write
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on waiting for a stream state change
pub const STATE_TIMEOUT: Duration = Duration::from_secs(1);

/// How a track's write loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayResult {
    /// The PCM source ran out.
    Finished,
    /// The diagnostic time limit elapsed.
    TimeLimit,
    /// An interrupt was requested; the caller decides what plays next.
    Interrupted,
    /// The application is closing.
    Closing,
    /// The hardware rejected a write.
    StreamError,
    /// Playback state could not be read.
    ControlFailure(LockError),
}

/// Supplies the current volume (0-100) for the track being played.
pub trait VolumeSource {
    fn volume(&self) -> Result<u8, SettingsError>;
}

impl VolumeSource for u8 {
    fn volume(&self) -> Result<u8, SettingsError> {
        Ok(*self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub performance_mode: PerformanceMode,
    pub write_timeout: Duration,
    pub state_timeout: Duration,
    /// Stop each track after this long; used for diagnostics.
    pub max_duration: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            performance_mode: PerformanceMode::default(),
            write_timeout: WRITE_TIMEOUT,
            state_timeout: STATE_TIMEOUT,
            max_duration: None,
        }
    }
}

/// An open hardware stream plus the buffering state the engine adapts.
///
/// Dropping the handle runs the same stop/drain/close sequence as
/// [`StreamHandle::close`], so no exit path leaks the stream.
pub struct StreamHandle {
    stream: Box<dyn AudioStream>,
    config: StreamConfig,
    frames_per_burst: u32,
    buffer_capacity_frames: u32,
    buffer_size_frames: u32,
    last_underruns: u32,
    state_timeout: Duration,
    closed: bool,
}

impl StreamHandle {
    fn new(stream: Box<dyn AudioStream>, config: StreamConfig, state_timeout: Duration) -> Self {
        Self {
            frames_per_burst: stream.frames_per_burst(),
            buffer_capacity_frames: stream.buffer_capacity_frames(),
            buffer_size_frames: stream.buffer_size_frames(),
            last_underruns: 0,
            stream,
            config,
            state_timeout,
            closed: false,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst
    }

    pub fn buffer_capacity_frames(&self) -> u32 {
        self.buffer_capacity_frames
    }

    pub fn buffer_size_frames(&self) -> u32 {
        self.buffer_size_frames
    }

    pub fn underrun_count(&self) -> u32 {
        self.stream.xrun_count()
    }

    fn write(
        &mut self,
        buffer: &SampleBuffer,
        frames: usize,
        timeout: Duration,
    ) -> Result<usize, HardwareError> {
        self.stream.write(buffer, frames, timeout)
    }

    /// Grow the buffer by one burst if the hardware reported new underruns.
    ///
    /// Never shrinks and never passes the capacity.
    fn grow_on_underrun(&mut self) -> bool {
        if self.buffer_size_frames >= self.buffer_capacity_frames {
            return false;
        }

        let underruns = self.stream.xrun_count();
        trace!("Underruns: {}", underruns);
        if underruns <= self.last_underruns {
            return false;
        }
        self.last_underruns = underruns;

        let requested = (self.buffer_size_frames + self.frames_per_burst)
            .min(self.buffer_capacity_frames);
        match self.stream.set_buffer_size_frames(requested) {
            Ok(applied) => {
                let applied = applied.min(self.buffer_capacity_frames);
                let grew = applied > self.buffer_size_frames;
                if grew {
                    info!(
                        "Underrun detected; buffer grown {} -> {} frames",
                        self.buffer_size_frames, applied
                    );
                    self.buffer_size_frames = applied;
                }
                grew
            }
            Err(e) => {
                warn!("Failed to grow buffer to {} frames: {}", requested, e);
                false
            }
        }
    }

    /// Stop, drain and release the stream.
    pub fn close(mut self) -> Result<(), HardwareError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), HardwareError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!("Stopping stream...");
        if let Err(e) = self.stream.request_stop() {
            warn!("Stop request failed: {}", e);
        }
        match self.stream.wait_until_stopped(self.state_timeout) {
            Ok(()) => info!("Audio stream stopped."),
            Err(e) => warn!("Audio stream failed to stop ({}). Closing anyway...", e),
        }

        match self.stream.close() {
            Ok(()) => {
                info!("Audio stream closed.");
                Ok(())
            }
            Err(e) => {
                error!("Audio stream failed to close: {}", e);
                Err(e)
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

/// Opens hardware streams and runs the per-track write loop
pub struct StreamingEngine<B> {
    backend: B,
    options: EngineOptions,
}

impl<B: AudioBackend> StreamingEngine<B> {
    pub fn new(backend: B, options: EngineOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn set_performance_mode(&mut self, mode: PerformanceMode) {
        self.options.performance_mode = mode;
    }

    /// Validate `config`, then open and start a stream for it.
    pub fn open(&self, config: &StreamConfig) -> Result<StreamHandle, StreamError> {
        config.validate()?;

        let stream = self
            .backend
            .open_stream(config, self.options.performance_mode)
            .map_err(StreamError::OpenFailed)?;
        let mut handle = StreamHandle::new(stream, *config, self.options.state_timeout);

        debug!(
            "Stream geometry: burst={} capacity={} size={} rate={} channels={} encoding={:?} mode={:?}",
            handle.frames_per_burst,
            handle.buffer_capacity_frames,
            handle.buffer_size_frames,
            config.sample_rate,
            config.channel_count,
            config.sample_encoding,
            self.options.performance_mode
        );

        // A failed start drops the handle, which closes the stream
        handle
            .stream
            .start(self.options.state_timeout)
            .map_err(StreamError::OpenFailed)?;

        Ok(handle)
    }

    /// Push `source` to the stream until it ends or playback is cancelled.
    ///
    /// `buffer` is reshaped to one burst and reused for every write.
    pub fn run<S, V>(
        &self,
        handle: &mut StreamHandle,
        source: &mut S,
        buffer: &mut SampleBuffer,
        intent: &PlaybackIntent,
        volume: &V,
    ) -> PlayResult
    where
        S: PcmSource + ?Sized,
        V: VolumeSource + ?Sized,
    {
        let channels = handle.config.channel_count as usize;
        let burst = handle.frames_per_burst as usize;
        if let Err(e) = buffer.prepare(handle.config.sample_encoding, burst * channels) {
            error!("Cannot prepare sample buffer: {}", e);
            return PlayResult::StreamError;
        }

        let started = Instant::now();
        let mut volume_failed = false;
        info!("Stream started. Playing audio...");

        loop {
            if let Some(limit) = self.options.max_duration {
                if started.elapsed() >= limit {
                    info!("Audio play ended after {:?}", limit);
                    return PlayResult::TimeLimit;
                }
            }

            match intent.is_closing() {
                Ok(true) => {
                    debug!("Close requested; leaving write loop");
                    return PlayResult::Closing;
                }
                Ok(false) => {}
                Err(e) => return control_failure(e),
            }

            let read = match source.read_samples(buffer) {
                Ok(n) => n,
                Err(e) => {
                    warn!("PCM read failed, treating as end of input: {}", e);
                    0
                }
            };
            let frames = read / channels;
            if frames == 0 {
                debug!("End of PCM input");
            } else if frames < burst {
                warn!("Short read: {} of {} frames", frames, burst);
            }

            let gain = match volume.volume() {
                Ok(v) => {
                    volume_failed = false;
                    gain_from_volume(v)
                }
                Err(e) => {
                    if !volume_failed {
                        warn!("Failed to read volume, muting: {}", e);
                        volume_failed = true;
                    }
                    0.0
                }
            };
            scale_buffer(buffer, frames * channels, gain);

            match intent.check_and_clear_interrupt() {
                Ok(true) => {
                    info!("Interrupt requested; abandoning track");
                    return PlayResult::Interrupted;
                }
                Ok(false) => {}
                Err(e) => return control_failure(e),
            }

            if frames == 0 {
                return PlayResult::Finished;
            }

            match intent.wait_while_paused() {
                Ok(Wake::Playing) => {}
                Ok(Wake::Closing) => return PlayResult::Closing,
                Ok(Wake::Interrupted) => match intent.check_and_clear_interrupt() {
                    Ok(true) => {
                        info!("Interrupt requested while paused; abandoning track");
                        return PlayResult::Interrupted;
                    }
                    Ok(false) => {}
                    Err(e) => return control_failure(e),
                },
                Err(e) => return control_failure(e),
            }

            if let Err(e) = handle.write(buffer, frames, self.options.write_timeout) {
                error!("Write loop stopped due to audio error: {}", e);
                return PlayResult::StreamError;
            }

            handle.grow_on_underrun();

            if frames < burst {
                return PlayResult::Finished;
            }
        }
    }

    /// Open, run and close in one call.
    pub fn play<S, V>(
        &self,
        config: &StreamConfig,
        source: &mut S,
        buffer: &mut SampleBuffer,
        intent: &PlaybackIntent,
        volume: &V,
    ) -> Result<PlayResult, StreamError>
    where
        S: PcmSource + ?Sized,
        V: VolumeSource + ?Sized,
    {
        let mut handle = self.open(config)?;
        let result = self.run(&mut handle, source, buffer, intent, volume);
        // Close failures are logged by the handle; the track result stands
        let _ = handle.close();
        Ok(result)
    }
}

fn control_failure(e: LockError) -> PlayResult {
    error!("Lost access to playback state: {}", e);
    PlayResult::ControlFailure(e)
}
