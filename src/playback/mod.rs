// Playback control module
// Play/pause/interrupt signalling shared by the UI and audio threads

pub mod controller;

pub use controller::{PlaybackIntent, Wake, LOCK_TIMEOUT};
