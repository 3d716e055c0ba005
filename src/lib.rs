// burstplay - On-device audio player
// Module declarations
pub mod audio;
pub mod commands;
pub mod error;
pub mod library;
pub mod playback;
pub mod queue;
pub mod session;
pub mod settings;
pub mod state;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::{error, info, warn};

use audio::{CpalBackend, EngineOptions, StreamingEngine, SymphoniaDecoder};
use library::Library;
use playback::PlaybackIntent;
use session::{Session, SessionEnd};
use settings::SettingsStore;
use state::AppState;

/// Command-line arguments for burstplay
#[derive(Parser, Debug)]
#[command(name = "burstplay")]
#[command(about = "Streams a directory of tracks to the default audio output")]
#[command(version)]
pub struct Args {
    /// Directory of tracks to play; defaults to the last one used
    #[arg(short, long, env = "BURSTPLAY_MUSIC_DIR")]
    pub music_dir: Option<PathBuf>,

    /// Where settings and the decode cache live
    #[arg(short, long, default_value = ".burstplay", env = "BURSTPLAY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Start playing immediately instead of paused
    #[arg(short, long, env = "BURSTPLAY_PLAY")]
    pub play: bool,

    /// Stop each track after this many seconds
    #[arg(long, env = "BURSTPLAY_MAX_SECONDS")]
    pub max_seconds: Option<u64>,

    /// Fixed shuffle seed
    #[arg(long, env = "BURSTPLAY_SEED")]
    pub seed: Option<u64>,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let settings = SettingsStore::open(&args.data_dir)
        .with_context(|| format!("Failed to open settings in {:?}", args.data_dir))?;
    settings.log_dump();

    let music_dir = match args.music_dir.clone() {
        Some(dir) => dir,
        None => settings
            .read(|s| s.library.track_path.clone())?
            .ok_or_else(|| anyhow!("No music directory given and none remembered"))?,
    };
    let library = Library::scan(&music_dir)?;
    settings.update(|s| s.library.track_path = Some(music_dir.clone()))?;

    let seed = match args.seed {
        Some(seed) => seed,
        None => settings.shuffle_seed()?.unwrap_or_else(time_seed),
    };

    let options = EngineOptions {
        performance_mode: settings.performance_mode()?,
        max_duration: args.max_seconds.map(Duration::from_secs),
        ..EngineOptions::default()
    };

    let state = Arc::new(AppState::new(PlaybackIntent::new(args.play), settings));

    let audio = {
        let state = state.clone();
        let cache_dir = args.data_dir.clone();
        thread::Builder::new()
            .name("audio".into())
            .spawn(move || -> error::Result<SessionEnd> {
                let engine = StreamingEngine::new(CpalBackend::new(), options);
                let mut session =
                    Session::new(engine, SymphoniaDecoder, state, library, &cache_dir, seed)?;
                session.run()
            })
            .context("Failed to spawn audio thread")?
    };

    info!("Controls: p play/pause, n next, b back, g N go to track, s shuffle, r repeat, v N volume, q quit");
    let lines = spawn_stdin_reader()?;
    control_loop(&state, &lines, || audio.is_finished());

    if let Err(e) = commands::close(&state) {
        warn!("{}", e);
    }
    match audio.join() {
        Ok(Ok(end)) => info!("Audio thread finished: {:?}", end),
        Ok(Err(e)) => error!("Audio thread failed ({:?}): {}", e.kind(), e),
        Err(_) => error!("Audio thread panicked"),
    }

    state.settings.save()?;
    Ok(())
}

/// How often the control loop checks on the audio thread while stdin is quiet
const CONTROL_POLL: Duration = Duration::from_millis(200);

/// Forward stdin lines to a channel; the reader thread ends on EOF or error.
fn spawn_stdin_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read command: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Apply commands until quit, end of input, or the audio thread ends
fn control_loop(state: &AppState, lines: &Receiver<String>, audio_done: impl Fn() -> bool) {
    loop {
        match lines.recv_timeout(CONTROL_POLL) {
            Ok(line) => {
                if audio_done() || !apply_command(state, &line) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if audio_done() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Run one command line. Returns false on quit.
fn apply_command(state: &AppState, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let (command, arg) = (words.next(), words.next());
    let result = match command {
        Some("p") => commands::toggle_playback(state).map(|_| ()),
        Some("n") => commands::next_track(state),
        Some("b") => commands::previous_track(state),
        Some("g") => match arg.map(str::parse::<usize>) {
            Some(Ok(track)) => commands::select_track(state, track),
            _ => Err("Usage: g TRACK".to_string()),
        },
        Some("s") => commands::toggle_shuffle(state).map(|_| ()),
        Some("r") => commands::toggle_repeat(state).map(|_| ()),
        Some("v") => match arg.map(str::parse::<u8>) {
            Some(Ok(volume)) => commands::set_volume(state, volume),
            _ => Err("Usage: v 0-100".to_string()),
        },
        Some("q") => return false,
        None => Ok(()),
        Some(other) => Err(format!("Unknown command {:?}", other)),
    };
    if let Err(e) = result {
        warn!("{}", e);
    }
    true
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use settings::PlayerSettings;

    fn state() -> AppState {
        AppState::new(
            PlaybackIntent::new(true),
            SettingsStore::in_memory(PlayerSettings::default()),
        )
    }

    #[test]
    fn test_control_loop_ends_when_audio_finishes_without_input() {
        let state = state();
        let (_tx, rx) = mpsc::channel::<String>();
        let done = Arc::new(AtomicBool::new(false));
        let finisher = {
            let done = done.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                done.store(true, Ordering::Release);
            })
        };

        let started = Instant::now();
        control_loop(&state, &rx, || done.load(Ordering::Acquire));
        assert!(started.elapsed() < Duration::from_secs(5));
        finisher.join().unwrap();
    }

    #[test]
    fn test_control_loop_applies_commands_until_quit() {
        let state = state();
        let (tx, rx) = mpsc::channel();
        for line in ["r", "v 40", "", "x", "q", "r"] {
            tx.send(line.to_string()).unwrap();
        }

        control_loop(&state, &rx, || false);
        assert!(state.settings.repeat().unwrap());
        assert_eq!(state.settings.master_volume().unwrap(), 40);
        // The line after quit is left unread
        assert_eq!(rx.try_recv().unwrap(), "r");
    }

    #[test]
    fn test_control_loop_ends_on_closed_input() {
        let state = state();
        let (tx, rx) = mpsc::channel();
        tx.send("p".to_string()).unwrap();
        drop(tx);

        control_loop(&state, &rx, || false);
        assert!(!state.intent.is_playing().unwrap());
    }
}
