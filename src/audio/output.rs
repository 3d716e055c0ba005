// Audio output using cpal
// Exposes the device as a blocking, burst-oriented stream fed through a ring buffer

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, SupportedBufferSize};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::format::{SampleBuffer, SampleEncoding, StreamConfig};
use crate::error::HardwareError;

/// Ring capacity expressed in bursts
const MAX_BURSTS: u32 = 16;

/// Bursts buffered when a stream is first opened
const INITIAL_BURSTS: u32 = 2;

/// Poll interval while waiting on the ring buffer
const POLL_INTERVAL: Duration = Duration::from_millis(1);

// Every encoding is carried as f32 between the writer and the callback.
// Int32 samples keep 24 bits of precision on the way through.
type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Latency/power trade-off requested when opening a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    None,
    LowLatency,
    #[default]
    PowerSaving,
}

impl PerformanceMode {
    pub fn frames_per_burst(self) -> u32 {
        match self {
            PerformanceMode::LowLatency => 256,
            PerformanceMode::None => 512,
            PerformanceMode::PowerSaving => 1024,
        }
    }
}

/// A live hardware output stream.
///
/// All counts are in frames. Implementations are driven from a single thread.
pub trait AudioStream {
    /// Frames the hardware moves per transfer.
    fn frames_per_burst(&self) -> u32;

    fn buffer_capacity_frames(&self) -> u32;

    fn buffer_size_frames(&self) -> u32;

    /// Request a new buffer size, returning the size actually applied.
    fn set_buffer_size_frames(&mut self, frames: u32) -> Result<u32, HardwareError>;

    /// Cumulative underrun count since the stream was opened.
    fn xrun_count(&self) -> u32;

    fn start(&mut self, timeout: Duration) -> Result<(), HardwareError>;

    /// Write the first `frames` frames of `buffer`, blocking up to `timeout`.
    fn write(
        &mut self,
        buffer: &SampleBuffer,
        frames: usize,
        timeout: Duration,
    ) -> Result<usize, HardwareError>;

    fn request_stop(&mut self) -> Result<(), HardwareError>;

    fn wait_until_stopped(&mut self, timeout: Duration) -> Result<(), HardwareError>;

    fn close(&mut self) -> Result<(), HardwareError>;
}

/// Opens hardware streams for a track's configuration.
pub trait AudioBackend {
    fn open_stream(
        &self,
        config: &StreamConfig,
        mode: PerformanceMode,
    ) -> Result<Box<dyn AudioStream>, HardwareError>;
}

/// State shared between the writer and the device callback
#[derive(Default)]
struct StreamShared {
    /// Set by the first device callback after `play`
    running: AtomicBool,
    /// Set once the first samples have been queued
    primed: AtomicBool,
    /// Set once a stop was requested; starvation is expected from then on
    draining: AtomicBool,
    xruns: AtomicU32,
    failure: Mutex<Option<String>>,
}

/// Backend for the default cpal output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn supports_fixed_burst(
        device: &cpal::Device,
        config: &StreamConfig,
        format: SampleFormat,
        burst: u32,
    ) -> bool {
        let Ok(mut configs) = device.supported_output_configs() else {
            return false;
        };
        configs.any(|c| {
            c.channels() == config.channel_count
                && c.sample_format() == format
                && c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && matches!(c.buffer_size(), SupportedBufferSize::Range { min, max } if *min <= burst && burst <= *max)
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: RingConsumer,
        shared: Arc<StreamShared>,
    ) -> Result<Stream, HardwareError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let callback_shared = shared.clone();
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    callback_shared.running.store(true, Ordering::Release);
                    let mut starved = false;
                    for sample in data.iter_mut() {
                        *sample = match consumer.try_pop() {
                            Some(value) => T::from_sample(value),
                            None => {
                                starved = true;
                                T::EQUILIBRIUM
                            }
                        };
                    }
                    if starved
                        && callback_shared.primed.load(Ordering::Acquire)
                        && !callback_shared.draining.load(Ordering::Acquire)
                    {
                        callback_shared.xruns.fetch_add(1, Ordering::AcqRel);
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                    *shared.failure.lock() = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| HardwareError::Open(format!("Failed to build output stream: {}", e)))
    }
}

impl AudioBackend for CpalBackend {
    fn open_stream(
        &self,
        config: &StreamConfig,
        mode: PerformanceMode,
    ) -> Result<Box<dyn AudioStream>, HardwareError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(HardwareError::NoDevice)?;

        let format = match config.sample_encoding {
            SampleEncoding::Int16 => SampleFormat::I16,
            SampleEncoding::Int32 => SampleFormat::I32,
            SampleEncoding::Float32 => SampleFormat::F32,
            SampleEncoding::Invalid => {
                return Err(HardwareError::Open("invalid sample encoding".to_string()))
            }
        };

        let burst = mode.frames_per_burst();
        let capacity = burst * MAX_BURSTS;
        let channels = config.channel_count as usize;

        let mut stream_config = cpal::StreamConfig {
            channels: config.channel_count,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if mode == PerformanceMode::LowLatency
            && Self::supports_fixed_burst(&device, config, format, burst)
        {
            stream_config.buffer_size = cpal::BufferSize::Fixed(burst);
        }

        let rb = HeapRb::<f32>::new(capacity as usize * channels);
        let (producer, consumer) = rb.split();
        let shared = Arc::new(StreamShared::default());

        let stream = match format {
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, consumer, shared.clone())?
            }
            SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &stream_config, consumer, shared.clone())?
            }
            _ => Self::build_stream::<f32>(&device, &stream_config, consumer, shared.clone())?,
        };

        info!(
            "Opened output stream on {} ({:?}, {:?})",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            format,
            stream_config.buffer_size
        );

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            producer,
            shared,
            channels,
            frames_per_burst: burst,
            capacity_frames: capacity,
            buffer_size_frames: burst * INITIAL_BURSTS,
            scratch: Vec::with_capacity(burst as usize * channels),
        }))
    }
}

/// A cpal stream presented as a blocking writer
pub struct CpalStream {
    stream: Option<Stream>,
    producer: RingProducer,
    shared: Arc<StreamShared>,
    channels: usize,
    frames_per_burst: u32,
    capacity_frames: u32,
    buffer_size_frames: u32,
    scratch: Vec<f32>,
}

impl CpalStream {
    fn stream(&self) -> Result<&Stream, HardwareError> {
        self.stream.as_ref().ok_or(HardwareError::Closed)
    }

    fn check_device(&self) -> Result<(), HardwareError> {
        match self.shared.failure.lock().take() {
            Some(message) => Err(HardwareError::Device(message)),
            None => Ok(()),
        }
    }

}

/// Convert the first `samples` samples of `buffer` for the ring.
///
/// Gain has already been applied at native width; the f32 conversion of
/// Int32 drops the low 8 bits of each sample.
fn to_ring_samples(buffer: &SampleBuffer, samples: usize, out: &mut Vec<f32>) {
    out.clear();
    match buffer {
        SampleBuffer::I16(v) => out.extend(v[..samples].iter().map(|s| s.to_sample::<f32>())),
        SampleBuffer::I32(v) => out.extend(v[..samples].iter().map(|s| s.to_sample::<f32>())),
        SampleBuffer::F32(v) => out.extend_from_slice(&v[..samples]),
    }
}

impl AudioStream for CpalStream {
    fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst
    }

    fn buffer_capacity_frames(&self) -> u32 {
        self.capacity_frames
    }

    fn buffer_size_frames(&self) -> u32 {
        self.buffer_size_frames
    }

    fn set_buffer_size_frames(&mut self, frames: u32) -> Result<u32, HardwareError> {
        self.buffer_size_frames = frames.clamp(self.frames_per_burst, self.capacity_frames);
        Ok(self.buffer_size_frames)
    }

    fn xrun_count(&self) -> u32 {
        self.shared.xruns.load(Ordering::Acquire)
    }

    /// Start the device and wait up to `timeout` for its first callback.
    fn start(&mut self, timeout: Duration) -> Result<(), HardwareError> {
        self.stream()?
            .play()
            .map_err(|e| HardwareError::Start(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        while !self.shared.running.load(Ordering::Acquire) {
            self.check_device()?;
            if Instant::now() >= deadline {
                return Err(HardwareError::Start(format!(
                    "device did not start within {:?}",
                    timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
        debug!("Output device running");
        Ok(())
    }

    fn write(
        &mut self,
        buffer: &SampleBuffer,
        frames: usize,
        timeout: Duration,
    ) -> Result<usize, HardwareError> {
        self.stream()?;
        self.check_device()?;

        let samples = (frames * self.channels).min(buffer.len());
        to_ring_samples(buffer, samples, &mut self.scratch);

        let limit = self.buffer_size_frames as usize * self.channels;
        let deadline = Instant::now() + timeout;
        let mut offset = 0;

        while offset < self.scratch.len() {
            let room = limit.saturating_sub(self.producer.occupied_len());
            let pushed = if room > 0 {
                let end = (offset + room).min(self.scratch.len());
                self.producer.push_slice(&self.scratch[offset..end])
            } else {
                0
            };

            if pushed > 0 {
                offset += pushed;
                self.shared.primed.store(true, Ordering::Release);
                continue;
            }

            if Instant::now() >= deadline {
                return Err(HardwareError::WriteTimeout(timeout));
            }
            self.check_device()?;
            thread::sleep(POLL_INTERVAL);
        }

        Ok(samples / self.channels)
    }

    fn request_stop(&mut self) -> Result<(), HardwareError> {
        self.stream()?;
        self.shared.draining.store(true, Ordering::Release);
        Ok(())
    }

    fn wait_until_stopped(&mut self, timeout: Duration) -> Result<(), HardwareError> {
        let deadline = Instant::now() + timeout;
        let mut drained = true;
        while self.producer.occupied_len() > 0 {
            if Instant::now() >= deadline {
                drained = false;
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        self.stream()?
            .pause()
            .map_err(|e| HardwareError::Device(format!("Failed to pause stream: {}", e)))?;

        if drained {
            debug!("Output ring drained");
            Ok(())
        } else {
            Err(HardwareError::StopTimeout(timeout))
        }
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        let stream = self.stream.take().ok_or(HardwareError::Closed)?;
        drop(stream);
        Ok(())
    }
}
