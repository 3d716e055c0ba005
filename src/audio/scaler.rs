// Gain applied to interleaved samples in their native width
// A straight scalar multiply; there is no limiter

use super::format::SampleBuffer;

/// Highest volume setting; maps to unity gain
pub const MAX_VOLUME: u8 = 100;

/// A sample that can be multiplied by a linear gain in place.
pub trait Scale: Copy {
    fn scale(self, gain: f32) -> Self;
}

impl Scale for i16 {
    fn scale(self, gain: f32) -> Self {
        (self as f32 * gain) as i16
    }
}

impl Scale for i32 {
    fn scale(self, gain: f32) -> Self {
        // f32 cannot hold every i32 exactly
        (self as f64 * gain as f64) as i32
    }
}

impl Scale for f32 {
    fn scale(self, gain: f32) -> Self {
        self * gain
    }
}

pub fn scale_samples<T: Scale>(samples: &mut [T], gain: f32) {
    for sample in samples.iter_mut() {
        *sample = sample.scale(gain);
    }
}

/// Scale the first `count` samples of `buffer`.
pub fn scale_buffer(buffer: &mut SampleBuffer, count: usize, gain: f32) {
    let count = count.min(buffer.len());
    match buffer {
        SampleBuffer::I16(v) => scale_samples(&mut v[..count], gain),
        SampleBuffer::I32(v) => scale_samples(&mut v[..count], gain),
        SampleBuffer::F32(v) => scale_samples(&mut v[..count], gain),
    }
}

/// Convert a 0-100 volume setting to a linear gain.
pub fn gain_from_volume(volume: u8) -> f32 {
    volume.min(MAX_VOLUME) as f32 / MAX_VOLUME as f32
}
