//! Shared fixtures for the integration tests: a simulated output device
//! and helpers for building PCM sources.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use burstplay_lib::audio::format::{PcmHeader, PcmReader, PcmSample, SampleBuffer, StreamConfig};
use burstplay_lib::audio::output::{AudioBackend, AudioStream, PerformanceMode};
use burstplay_lib::error::HardwareError;

/// Behaviour of every stream the simulated backend opens
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub frames_per_burst: u32,
    pub capacity_bursts: u32,
    pub initial_bursts: u32,
    /// Writes after which the underrun counter goes up by one (1-based)
    pub underrun_ticks: Vec<u32>,
    /// Fail the write with this 1-based index
    pub fail_write_at: Option<u32>,
    pub fail_open: bool,
    pub fail_start: bool,
    pub write_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frames_per_burst: 4,
            capacity_bursts: 16,
            initial_bursts: 2,
            underrun_ticks: Vec::new(),
            fail_write_at: None,
            fail_open: false,
            fail_start: false,
            write_delay: Duration::ZERO,
        }
    }
}

/// Everything the simulated device saw
#[derive(Debug, Default)]
pub struct SimLog {
    pub opened: u32,
    pub started: u32,
    pub stop_requests: u32,
    pub stop_waits: u32,
    pub closed: u32,
    pub writes: Vec<SampleBuffer>,
    pub buffer_sizes: Vec<u32>,
    pub modes: Vec<PerformanceMode>,
}

impl SimLog {
    pub fn written_frames(&self, channels: usize) -> usize {
        self.writes.iter().map(|w| w.len() / channels).sum()
    }
}

#[derive(Clone, Default)]
pub struct SimBackend {
    pub config: SimConfig,
    pub log: Arc<Mutex<SimLog>>,
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            log: Arc::default(),
        }
    }
}

impl AudioBackend for SimBackend {
    fn open_stream(
        &self,
        config: &StreamConfig,
        mode: PerformanceMode,
    ) -> Result<Box<dyn AudioStream>, HardwareError> {
        if self.config.fail_open {
            return Err(HardwareError::Open("simulated refusal".into()));
        }
        let mut log = self.log.lock();
        log.opened += 1;
        log.modes.push(mode);
        let burst = self.config.frames_per_burst;
        Ok(Box::new(SimStream {
            sim: self.config.clone(),
            log: self.log.clone(),
            channels: usize::from(config.channel_count),
            size: burst * self.config.initial_bursts,
            ticks: 0,
        }))
    }
}

struct SimStream {
    sim: SimConfig,
    log: Arc<Mutex<SimLog>>,
    channels: usize,
    size: u32,
    ticks: u32,
}

impl AudioStream for SimStream {
    fn frames_per_burst(&self) -> u32 {
        self.sim.frames_per_burst
    }

    fn buffer_capacity_frames(&self) -> u32 {
        self.sim.frames_per_burst * self.sim.capacity_bursts
    }

    fn buffer_size_frames(&self) -> u32 {
        self.size
    }

    fn set_buffer_size_frames(&mut self, frames: u32) -> Result<u32, HardwareError> {
        self.size = frames.min(self.buffer_capacity_frames());
        self.log.lock().buffer_sizes.push(self.size);
        Ok(self.size)
    }

    fn xrun_count(&self) -> u32 {
        self.sim
            .underrun_ticks
            .iter()
            .filter(|&&tick| tick <= self.ticks)
            .count() as u32
    }

    fn start(&mut self, _timeout: Duration) -> Result<(), HardwareError> {
        if self.sim.fail_start {
            return Err(HardwareError::Start("simulated start failure".into()));
        }
        self.log.lock().started += 1;
        Ok(())
    }

    fn write(
        &mut self,
        buffer: &SampleBuffer,
        frames: usize,
        timeout: Duration,
    ) -> Result<usize, HardwareError> {
        self.ticks += 1;
        if self.sim.fail_write_at == Some(self.ticks) {
            return Err(HardwareError::WriteTimeout(timeout));
        }
        if !self.sim.write_delay.is_zero() {
            thread::sleep(self.sim.write_delay);
        }
        let samples = frames * self.channels;
        self.log.lock().writes.push(truncated(buffer, samples));
        Ok(frames)
    }

    fn request_stop(&mut self) -> Result<(), HardwareError> {
        self.log.lock().stop_requests += 1;
        Ok(())
    }

    fn wait_until_stopped(&mut self, _timeout: Duration) -> Result<(), HardwareError> {
        self.log.lock().stop_waits += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.log.lock().closed += 1;
        Ok(())
    }
}

fn truncated(buffer: &SampleBuffer, samples: usize) -> SampleBuffer {
    match buffer {
        SampleBuffer::I16(v) => SampleBuffer::I16(v[..samples].to_vec()),
        SampleBuffer::I32(v) => SampleBuffer::I32(v[..samples].to_vec()),
        SampleBuffer::F32(v) => SampleBuffer::F32(v[..samples].to_vec()),
    }
}

/// An in-memory PCM container holding `samples`
pub fn pcm<T: PcmSample>(channels: u16, sample_rate: u32, samples: &[T]) -> Vec<u8> {
    let data_len = (samples.len() * T::ENCODING.width_bytes()) as u32;
    let mut bytes = Vec::new();
    PcmHeader::new(T::ENCODING, channels, sample_rate, data_len)
        .write_to(&mut bytes)
        .unwrap();
    for &s in samples {
        s.write_le(&mut bytes);
    }
    bytes
}

pub fn reader(bytes: Vec<u8>) -> PcmReader<Cursor<Vec<u8>>> {
    PcmReader::new(Cursor::new(bytes)).unwrap()
}
