//! Error types for burstplay
//!
//! Each concern gets its own thiserror enum; [`Error`] groups them into the
//! classes the session driver applies policy to.

use std::collections::TryReserveError;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by the audio output hardware or its driver.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("No output device available")]
    NoDevice,

    #[error("Failed to open output stream: {0}")]
    Open(String),

    #[error("Failed to start output stream: {0}")]
    Start(String),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Timed out after {0:?} waiting for the stream to stop")]
    StopTimeout(Duration),

    #[error("Output device error: {0}")]
    Device(String),

    #[error("Stream is closed")]
    Closed,
}

/// Reasons a stream could not be opened for a track.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The track's sample encoding or geometry cannot be played.
    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    /// The hardware or driver refused the stream.
    #[error("Failed to open audio stream: {0}")]
    OpenFailed(#[source] HardwareError),
}

/// A guarded piece of shared state could not be locked in time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Timed out after {waited:?} acquiring the {what} lock")]
pub struct LockError {
    pub what: &'static str,
    pub waited: Duration,
}

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Playlist is empty")]
    Empty,

    #[error("Failed to allocate track order: {0}")]
    Alloc(#[from] TryReserveError),

    #[error("Index {index} is out of range for {len} tracks")]
    OutOfRange { index: usize, len: usize },
}

/// Malformed or unreadable PCM container.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Not a RIFF/WAVE container")]
    NotWave,

    #[error("Missing `{0}` chunk")]
    MissingChunk(&'static str),

    #[error("Malformed `fmt ` chunk: {0}")]
    BadFormatChunk(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("No decodable audio track found")]
    NoAudioTrack,

    #[error("Decoder produced no audio")]
    Empty,

    #[error("Decode failed: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    #[error("Failed to write PCM output: {0}")]
    Write(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Busy(#[from] LockError),

    #[error("Settings I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The broad classes the driver reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The track cannot be played as encoded; skip it.
    Configuration,
    /// The output device misbehaved; end the track early.
    Hardware,
    /// Input was missing or unreadable; treat as end of track.
    Io,
    /// A lock could not be taken; fatal on the audio thread, retried elsewhere.
    Concurrency,
}

/// Main error type for burstplay
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("File I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Stream(StreamError::UnsupportedFormat(_)) => ErrorKind::Configuration,
            Error::Stream(StreamError::OpenFailed(_)) | Error::Hardware(_) => ErrorKind::Hardware,
            Error::Lock(_) | Error::Settings(SettingsError::Busy(_)) => ErrorKind::Concurrency,
            Error::Format(FormatError::Io(_)) => ErrorKind::Io,
            Error::Format(_) | Error::Decode(DecodeError::NoAudioTrack) => ErrorKind::Configuration,
            Error::Order(_) => ErrorKind::Configuration,
            Error::Decode(_) | Error::Settings(_) | Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Convenience Result type using burstplay Error
pub type Result<T> = std::result::Result<T, Error>;
