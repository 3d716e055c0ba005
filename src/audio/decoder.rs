// Audio decoder using Symphonia
// Decodes a compressed track into the PCM container the engine streams from

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer as InterleavedBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::ConvertibleSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, info, warn};

use super::format::{PcmHeader, PcmSample, SampleEncoding, PCM_HEADER_SIZE};
use crate::error::DecodeError;

/// Turns an input track into a PCM container file.
pub trait PcmDecoder {
    fn decode_to_pcm(&self, input: &Path, output: &Path) -> Result<PcmHeader, DecodeError>;
}

/// [`PcmDecoder`] backed by Symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl PcmDecoder for SymphoniaDecoder {
    fn decode_to_pcm(&self, input: &Path, output: &Path) -> Result<PcmHeader, DecodeError> {
        info!("Converting {:?} to PCM file {:?}...", input, output);
        let mut decoder = AudioDecoder::open(input)?;

        let file = File::create(output).map_err(|source| DecodeError::Open {
            path: output.display().to_string(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let header = decoder.transcode(&mut writer)?;
        info!(
            "Decoded {:?}: {} ch, {} Hz, {:?}, {} bytes",
            input,
            header.channels,
            header.sample_rate,
            header.encoding(),
            header.data_len.unwrap_or(0)
        );
        Ok(header)
    }
}

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: Option<u32>,
    channels: Option<usize>,
}

impl AudioDecoder {
    /// Open an audio file and prepare for decoding
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint using the file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate;
        let channels = track.codec_params.channels.map(|c| c.count());

        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        debug!(
            "Opened {:?}: track {} at {:?} Hz, {:?} channels",
            path, track_id, sample_rate, channels
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    /// Rate declared by the container, if any. The PCM header uses the
    /// rate of the decoded audio.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn channels(&self) -> Option<usize> {
        self.channels
    }

    /// Decode every packet into `writer` as a PCM container.
    ///
    /// The header is written last, once the data size is known.
    pub fn transcode<W: Write + Seek>(&mut self, writer: &mut W) -> Result<PcmHeader, DecodeError> {
        writer.write_all(&[0u8; PCM_HEADER_SIZE])?;

        let mut interleaver: Option<Interleaver> = None;
        let mut bytes = Vec::new();
        let mut data_len: u64 = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break; // End of stream
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Skip packets from other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let out = interleaver.get_or_insert_with(|| Interleaver::for_buffer(&decoded));
            bytes.clear();
            out.append(decoded, &mut bytes);
            writer.write_all(&bytes)?;
            data_len += bytes.len() as u64;
        }

        let out = interleaver.ok_or(DecodeError::Empty)?;
        if self.sample_rate.is_some_and(|rate| rate != out.sample_rate) {
            warn!(
                "Container declares {:?} Hz but decoded audio is {} Hz",
                self.sample_rate, out.sample_rate
            );
        }
        let data_len = u32::try_from(data_len).unwrap_or_else(|_| {
            warn!("PCM data exceeds 4 GiB; header size will be open-ended");
            u32::MAX
        });
        let header = PcmHeader::new(out.encoding(), out.channels, out.sample_rate, data_len);

        writer.seek(SeekFrom::Start(0))?;
        header.write_to(writer)?;
        writer.flush()?;

        Ok(header)
    }
}

/// Interleaves decoded planes into one native-width encoding
struct Interleaver {
    samples: InterleavedSamples,
    channels: u16,
    sample_rate: u32,
}

enum InterleavedSamples {
    I16(Option<InterleavedBuffer<i16>>),
    I32(Option<InterleavedBuffer<i32>>),
    F32(Option<InterleavedBuffer<f32>>),
}

impl Interleaver {
    /// Pick the narrowest encoding that holds the decoder's native samples.
    fn for_buffer(decoded: &AudioBufferRef<'_>) -> Self {
        let samples = match decoded {
            AudioBufferRef::U8(_)
            | AudioBufferRef::S8(_)
            | AudioBufferRef::U16(_)
            | AudioBufferRef::S16(_) => InterleavedSamples::I16(None),
            AudioBufferRef::U24(_)
            | AudioBufferRef::S24(_)
            | AudioBufferRef::U32(_)
            | AudioBufferRef::S32(_) => InterleavedSamples::I32(None),
            AudioBufferRef::F32(_) | AudioBufferRef::F64(_) => InterleavedSamples::F32(None),
        };
        let spec = decoded.spec();
        Self {
            samples,
            channels: spec.channels.count() as u16,
            sample_rate: spec.rate,
        }
    }

    fn encoding(&self) -> SampleEncoding {
        match self.samples {
            InterleavedSamples::I16(_) => SampleEncoding::Int16,
            InterleavedSamples::I32(_) => SampleEncoding::Int32,
            InterleavedSamples::F32(_) => SampleEncoding::Float32,
        }
    }

    fn append(&mut self, decoded: AudioBufferRef<'_>, out: &mut Vec<u8>) {
        match &mut self.samples {
            InterleavedSamples::I16(slot) => copy_interleaved(slot, decoded, out),
            InterleavedSamples::I32(slot) => copy_interleaved(slot, decoded, out),
            InterleavedSamples::F32(slot) => copy_interleaved(slot, decoded, out),
        }
    }
}

fn copy_interleaved<T>(
    slot: &mut Option<InterleavedBuffer<T>>,
    decoded: AudioBufferRef<'_>,
    out: &mut Vec<u8>,
) where
    T: Sample + ConvertibleSample + PcmSample,
{
    let spec = *decoded.spec();
    let needed = decoded.capacity() * spec.channels.count();
    if slot.as_ref().map_or(true, |buf| buf.capacity() < needed) {
        *slot = Some(InterleavedBuffer::<T>::new(decoded.capacity() as u64, spec));
    }

    if let Some(buf) = slot.as_mut() {
        buf.copy_interleaved_ref(decoded);
        out.reserve(buf.samples().len() * T::ENCODING.width_bytes());
        for &sample in buf.samples() {
            sample.write_le(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::{PcmReader, PcmSource, SampleBuffer};

    #[test]
    fn test_transcode_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        let output = dir.path().join("cache.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&input, spec).unwrap();
        for i in 0..2000i32 {
            writer.write_sample((i * 7 % 3000) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let header = SymphoniaDecoder.decode_to_pcm(&input, &output).unwrap();
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.encoding(), SampleEncoding::Int16);
        assert_eq!(header.data_len, Some(4000));

        let mut reader = PcmReader::open(&output).unwrap();
        assert_eq!(reader.header(), &header);
        let mut buffer = SampleBuffer::default();
        buffer.prepare(SampleEncoding::Int16, 4).unwrap();
        assert_eq!(reader.read_samples(&mut buffer).unwrap(), 4);
        assert_eq!(buffer, SampleBuffer::I16(vec![0, 7, 14, 21]));
    }

    #[test]
    fn test_interleaver_takes_rate_from_decoded_audio() {
        use symphonia::core::audio::{AsAudioBufferRef, AudioBuffer, Channels, Signal, SignalSpec};

        let spec = SignalSpec::new(48000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut decoded = AudioBuffer::<i16>::new(64, spec);
        decoded.render_reserved(Some(64));

        let mut out = Interleaver::for_buffer(&decoded.as_audio_buffer_ref());
        assert_eq!(out.sample_rate, 48000);
        assert_eq!(out.channels, 2);
        assert_eq!(out.encoding(), SampleEncoding::Int16);

        let mut bytes = Vec::new();
        out.append(decoded.as_audio_buffer_ref(), &mut bytes);
        assert_eq!(bytes.len(), 64 * 2 * 2);
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SymphoniaDecoder
            .decode_to_pcm(&dir.path().join("absent.mp3"), &dir.path().join("out.wav"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Open { .. }));
    }

    #[test]
    fn test_garbage_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("noise.mp3");
        std::fs::write(&input, b"definitely not audio").unwrap();
        assert!(SymphoniaDecoder
            .decode_to_pcm(&input, &dir.path().join("out.wav"))
            .is_err());
    }
}
