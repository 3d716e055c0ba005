// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod decoder;
pub mod engine;
pub mod format;
pub mod output;
pub mod scaler;

pub use decoder::{PcmDecoder, SymphoniaDecoder};
pub use engine::{EngineOptions, PlayResult, StreamHandle, StreamingEngine, VolumeSource};
pub use format::{PcmFile, PcmHeader, PcmReader, PcmSource, SampleBuffer, SampleEncoding, StreamConfig};
pub use output::{AudioBackend, AudioStream, CpalBackend, PerformanceMode};
