//! Streaming engine driven against a simulated output device

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use burstplay_lib::audio::engine::{EngineOptions, PlayResult, StreamingEngine, VolumeSource};
use burstplay_lib::audio::format::{SampleBuffer, SampleEncoding, StreamConfig};
use burstplay_lib::audio::output::PerformanceMode;
use burstplay_lib::error::{LockError, SettingsError, StreamError};
use burstplay_lib::playback::PlaybackIntent;

use common::{pcm, reader, SimBackend, SimConfig};

const CHANNELS: u16 = 2;
const RATE: u32 = 44100;
const BURST: usize = 4;

fn engine(sim: SimConfig) -> (StreamingEngine<SimBackend>, SimBackend) {
    let backend = SimBackend::new(sim);
    let engine = StreamingEngine::new(backend.clone(), EngineOptions::default());
    (engine, backend)
}

fn stereo_i16(frames: usize) -> Vec<i16> {
    (0..frames * CHANNELS as usize)
        .map(|i| ((i % 200) as i16) * 100 - 10_000)
        .collect()
}

struct BrokenVolume;

impl VolumeSource for BrokenVolume {
    fn volume(&self) -> Result<u8, SettingsError> {
        Err(SettingsError::Busy(LockError {
            what: "settings",
            waited: Duration::ZERO,
        }))
    }
}

#[test]
fn test_three_bursts_at_half_volume() {
    let (engine, backend) = engine(SimConfig::default());
    let input = stereo_i16(3 * BURST);
    let mut source = reader(pcm(CHANNELS, RATE, &input));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);
    let mut buffer = SampleBuffer::default();

    let result = engine
        .play(&config, &mut source, &mut buffer, &intent, &50u8)
        .unwrap();
    assert_eq!(result, PlayResult::Finished);

    let log = backend.log.lock();
    assert_eq!(log.writes.len(), 3);
    let expected: Vec<i16> = input.iter().map(|s| s / 2).collect();
    for (write, chunk) in log.writes.iter().zip(expected.chunks(BURST * CHANNELS as usize)) {
        assert_eq!(write, &SampleBuffer::I16(chunk.to_vec()));
    }
    assert_eq!(log.written_frames(CHANNELS as usize), 3 * BURST);
}

#[test]
fn test_int32_and_float_are_scaled_natively() {
    let (engine, backend) = engine(SimConfig::default());
    let intent = PlaybackIntent::new(true);
    let mut buffer = SampleBuffer::default();

    let ints: Vec<i32> = (0..8).map(|i| i * 1_000_000).collect();
    let mut source = reader(pcm(CHANNELS, RATE, &ints));
    let config = source.header().stream_config();
    assert_eq!(config.sample_encoding, SampleEncoding::Int32);
    engine
        .play(&config, &mut source, &mut buffer, &intent, &25u8)
        .unwrap();

    let floats: Vec<f32> = vec![0.5, -0.5, 1.0, -1.0];
    let mut source = reader(pcm(1, RATE, &floats));
    let config = source.header().stream_config();
    engine
        .play(&config, &mut source, &mut buffer, &intent, &50u8)
        .unwrap();

    let log = backend.log.lock();
    assert_eq!(
        log.writes[0],
        SampleBuffer::I32((0..8).map(|i| i * 250_000).collect())
    );
    assert_eq!(log.writes[1], SampleBuffer::F32(vec![0.25, -0.25, 0.5, -0.5]));
}

#[test]
fn test_interrupt_before_first_write() {
    let (engine, backend) = engine(SimConfig::default());
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(3 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);
    intent.interrupt().unwrap();

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();
    assert_eq!(result, PlayResult::Interrupted);
    assert!(!intent.check_and_clear_interrupt().unwrap());

    let log = backend.log.lock();
    assert!(log.writes.is_empty());
    assert_eq!(log.closed, 1);
}

#[test]
fn test_interrupt_wins_over_end_of_input() {
    let (engine, backend) = engine(SimConfig::default());
    let mut source = reader(pcm::<i16>(CHANNELS, RATE, &[]));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);
    intent.interrupt().unwrap();

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();
    assert_eq!(result, PlayResult::Interrupted);
    assert!(backend.log.lock().writes.is_empty());
}

#[test]
fn test_buffer_grows_once_per_new_underrun() {
    let (engine, backend) = engine(SimConfig {
        underrun_ticks: vec![3, 7],
        ..SimConfig::default()
    });
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(10 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);

    let mut handle = engine.open(&config).unwrap();
    let initial = handle.buffer_size_frames();
    let result = engine.run(
        &mut handle,
        &mut source,
        &mut SampleBuffer::default(),
        &intent,
        &100u8,
    );
    assert_eq!(result, PlayResult::Finished);
    assert_eq!(handle.underrun_count(), 2);
    assert_eq!(handle.buffer_size_frames(), initial + 2 * BURST as u32);
    assert!(handle.buffer_size_frames() <= handle.buffer_capacity_frames());
    handle.close().unwrap();

    let log = backend.log.lock();
    assert_eq!(
        log.buffer_sizes,
        vec![initial + BURST as u32, initial + 2 * BURST as u32]
    );
}

#[test]
fn test_buffer_never_passes_capacity() {
    let (engine, backend) = engine(SimConfig {
        capacity_bursts: 3,
        underrun_ticks: vec![1, 2, 3, 4, 5],
        ..SimConfig::default()
    });
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(8 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);

    let mut handle = engine.open(&config).unwrap();
    engine.run(
        &mut handle,
        &mut source,
        &mut SampleBuffer::default(),
        &intent,
        &100u8,
    );
    assert_eq!(handle.buffer_size_frames(), handle.buffer_capacity_frames());
    drop(handle);

    let log = backend.log.lock();
    assert_eq!(log.buffer_sizes, vec![3 * BURST as u32]);
    assert_eq!(log.closed, 1);
}

#[test]
fn test_teardown_runs_exactly_once() {
    let (engine, backend) = engine(SimConfig::default());
    let config = StreamConfig::new(CHANNELS, RATE, SampleEncoding::Int16);

    // Explicit close
    let handle = engine.open(&config).unwrap();
    handle.close().unwrap();
    // Dropped without closing
    drop(engine.open(&config).unwrap());
    // Full play
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(BURST)));
    let intent = PlaybackIntent::new(true);
    engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();

    let log = backend.log.lock();
    assert_eq!(log.opened, 3);
    assert_eq!(log.stop_requests, 3);
    assert_eq!(log.stop_waits, 3);
    assert_eq!(log.closed, 3);
}

#[test]
fn test_failed_start_still_closes() {
    let (engine, backend) = engine(SimConfig {
        fail_start: true,
        ..SimConfig::default()
    });
    let config = StreamConfig::new(CHANNELS, RATE, SampleEncoding::Int16);
    let err = engine.open(&config).err().unwrap();
    assert!(matches!(err, StreamError::OpenFailed(_)));

    let log = backend.log.lock();
    assert_eq!(log.opened, 1);
    assert_eq!(log.started, 0);
    assert_eq!(log.closed, 1);
}

#[test]
fn test_refused_open() {
    let (engine, backend) = engine(SimConfig {
        fail_open: true,
        ..SimConfig::default()
    });
    let config = StreamConfig::new(CHANNELS, RATE, SampleEncoding::Int16);
    assert!(matches!(
        engine.open(&config),
        Err(StreamError::OpenFailed(_))
    ));
    assert_eq!(backend.log.lock().closed, 0);
}

#[test]
fn test_unsupported_encoding_never_opens() {
    let (engine, backend) = engine(SimConfig::default());
    let config = StreamConfig::new(CHANNELS, RATE, SampleEncoding::Invalid);
    assert!(matches!(
        engine.open(&config),
        Err(StreamError::UnsupportedFormat(_))
    ));
    assert_eq!(backend.log.lock().opened, 0);
}

#[test]
fn test_volume_failure_mutes() {
    let (engine, backend) = engine(SimConfig::default());
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(2 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &BrokenVolume)
        .unwrap();
    assert_eq!(result, PlayResult::Finished);

    let log = backend.log.lock();
    assert_eq!(log.writes.len(), 2);
    for write in &log.writes {
        assert_eq!(write, &SampleBuffer::I16(vec![0; BURST * CHANNELS as usize]));
    }
}

#[test]
fn test_short_final_burst_is_written() {
    let (engine, backend) = engine(SimConfig::default());
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(2 * BURST + 2)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();
    assert_eq!(result, PlayResult::Finished);

    let log = backend.log.lock();
    assert_eq!(log.writes.len(), 3);
    assert_eq!(log.written_frames(CHANNELS as usize), 2 * BURST + 2);
}

#[test]
fn test_write_error_ends_track() {
    let (engine, backend) = engine(SimConfig {
        fail_write_at: Some(2),
        ..SimConfig::default()
    });
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(5 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();
    assert_eq!(result, PlayResult::StreamError);

    let log = backend.log.lock();
    assert_eq!(log.writes.len(), 1);
    assert_eq!(log.closed, 1);
}

#[test]
fn test_closing_stops_the_loop() {
    let (engine, backend) = engine(SimConfig::default());
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(3 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);
    intent.close().unwrap();

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();
    assert_eq!(result, PlayResult::Closing);
    assert!(backend.log.lock().writes.is_empty());
}

#[test]
fn test_time_limit() {
    let backend = SimBackend::new(SimConfig {
        write_delay: Duration::from_millis(5),
        ..SimConfig::default()
    });
    let engine = StreamingEngine::new(
        backend.clone(),
        EngineOptions {
            max_duration: Some(Duration::from_millis(30)),
            ..EngineOptions::default()
        },
    );
    let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(1000 * BURST)));
    let config = source.header().stream_config();
    let intent = PlaybackIntent::new(true);

    let result = engine
        .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
        .unwrap();
    assert_eq!(result, PlayResult::TimeLimit);

    let log = backend.log.lock();
    assert!(!log.writes.is_empty());
    assert!(log.writes.len() < 1000);
    assert_eq!(log.closed, 1);
}

#[test]
fn test_paused_loop_waits_for_resume() {
    let (engine, backend) = engine(SimConfig::default());
    let intent = Arc::new(PlaybackIntent::new(false));

    let player = {
        let intent = intent.clone();
        thread::spawn(move || {
            let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(3 * BURST)));
            let config = source.header().stream_config();
            engine
                .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
                .unwrap()
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(backend.log.lock().writes.is_empty());
    assert!(!player.is_finished());

    intent.resume().unwrap();
    assert_eq!(player.join().unwrap(), PlayResult::Finished);
    assert_eq!(backend.log.lock().writes.len(), 3);
}

#[test]
fn test_interrupt_while_paused() {
    let (engine, backend) = engine(SimConfig::default());
    let intent = Arc::new(PlaybackIntent::new(false));

    let player = {
        let intent = intent.clone();
        thread::spawn(move || {
            let mut source = reader(pcm(CHANNELS, RATE, &stereo_i16(3 * BURST)));
            let config = source.header().stream_config();
            engine
                .play(&config, &mut source, &mut SampleBuffer::default(), &intent, &100u8)
                .unwrap()
        })
    };

    thread::sleep(Duration::from_millis(30));
    intent.interrupt().unwrap();
    assert_eq!(player.join().unwrap(), PlayResult::Interrupted);

    let log = backend.log.lock();
    assert!(log.writes.is_empty());
    assert_eq!(log.closed, 1);
}

#[test]
fn test_performance_mode_reaches_backend() {
    let (mut engine, backend) = engine(SimConfig::default());
    engine.set_performance_mode(PerformanceMode::LowLatency);
    let config = StreamConfig::new(CHANNELS, RATE, SampleEncoding::Int16);
    engine.open(&config).unwrap().close().unwrap();
    assert_eq!(backend.log.lock().modes, vec![PerformanceMode::LowLatency]);
}
