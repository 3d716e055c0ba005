// PCM container format and stream configuration
// Reads and writes the RIFF/WAVE files produced by the decoder

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{FormatError, StreamError};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size of the canonical header written by [`PcmHeader::write_to`]
pub const PCM_HEADER_SIZE: usize = 44;

/// Largest `fmt ` chunk accepted; the extensible layout needs 40 bytes
const MAX_FMT_CHUNK_SIZE: u32 = 64;

/// Sample encodings the output stream can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Int16,
    Int32,
    Float32,
    Invalid,
}

impl SampleEncoding {
    /// Map a WAVE format tag and bit depth onto an encoding.
    ///
    /// Every combination not listed is `Invalid`; there is no fallback guess.
    pub fn from_wave(format_tag: u16, bits_per_sample: u16) -> Self {
        match (format_tag, bits_per_sample) {
            (WAVE_FORMAT_PCM, 16) => SampleEncoding::Int16,
            (WAVE_FORMAT_PCM, 32) => SampleEncoding::Int32,
            (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleEncoding::Float32,
            _ => SampleEncoding::Invalid,
        }
    }

    pub fn wave_tag(self) -> u16 {
        match self {
            SampleEncoding::Int16 | SampleEncoding::Int32 => WAVE_FORMAT_PCM,
            SampleEncoding::Float32 => WAVE_FORMAT_IEEE_FLOAT,
            SampleEncoding::Invalid => 0,
        }
    }

    pub fn width_bytes(self) -> usize {
        match self {
            SampleEncoding::Int16 => 2,
            SampleEncoding::Int32 | SampleEncoding::Float32 => 4,
            SampleEncoding::Invalid => 0,
        }
    }
}

/// Immutable per-track stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub sample_encoding: SampleEncoding,
    pub sample_width_bytes: usize,
}

impl StreamConfig {
    pub fn new(channel_count: u16, sample_rate: u32, sample_encoding: SampleEncoding) -> Self {
        Self {
            channel_count,
            sample_rate,
            sample_encoding,
            sample_width_bytes: sample_encoding.width_bytes(),
        }
    }

    /// Reject anything a hardware stream must not be opened with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.sample_encoding == SampleEncoding::Invalid {
            return Err(StreamError::UnsupportedFormat(
                "sample encoding is not 16-bit int, 32-bit int or 32-bit float".to_string(),
            ));
        }
        if self.sample_width_bytes != self.sample_encoding.width_bytes() {
            return Err(StreamError::UnsupportedFormat(format!(
                "{}-byte samples do not match {:?}",
                self.sample_width_bytes, self.sample_encoding
            )));
        }
        if self.channel_count == 0 {
            return Err(StreamError::UnsupportedFormat("zero channels".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(StreamError::UnsupportedFormat("zero sample rate".to_string()));
        }
        Ok(())
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.sample_width_bytes * self.channel_count as usize
    }
}

/// A sample type that can live in the PCM container.
pub trait PcmSample: Copy + Default {
    const ENCODING: SampleEncoding;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut Vec<u8>);
}

impl PcmSample for i16 {
    const ENCODING: SampleEncoding = SampleEncoding::Int16;

    fn read_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl PcmSample for i32 {
    const ENCODING: SampleEncoding = SampleEncoding::Int32;

    fn read_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl PcmSample for f32 {
    const ENCODING: SampleEncoding = SampleEncoding::Float32;

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Interleaved samples in their native width.
///
/// One buffer is owned by the caller and reused for every burst of every
/// track; [`SampleBuffer::prepare`] only reallocates when the encoding changes
/// or the burst grows.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl Default for SampleBuffer {
    fn default() -> Self {
        SampleBuffer::I16(Vec::new())
    }
}

impl SampleBuffer {
    /// Shape the buffer for `len` samples of `encoding`.
    pub fn prepare(&mut self, encoding: SampleEncoding, len: usize) -> Result<(), StreamError> {
        match encoding {
            SampleEncoding::Int16 => match self {
                SampleBuffer::I16(v) => v.resize(len, 0),
                other => *other = SampleBuffer::I16(vec![0; len]),
            },
            SampleEncoding::Int32 => match self {
                SampleBuffer::I32(v) => v.resize(len, 0),
                other => *other = SampleBuffer::I32(vec![0; len]),
            },
            SampleEncoding::Float32 => match self {
                SampleBuffer::F32(v) => v.resize(len, 0.0),
                other => *other = SampleBuffer::F32(vec![0.0; len]),
            },
            SampleEncoding::Invalid => {
                return Err(StreamError::UnsupportedFormat(
                    "cannot allocate samples for an invalid encoding".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn encoding(&self) -> SampleEncoding {
        match self {
            SampleBuffer::I16(_) => SampleEncoding::Int16,
            SampleBuffer::I32(_) => SampleEncoding::Int32,
            SampleBuffer::F32(_) => SampleEncoding::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::I16(v) => v.len(),
            SampleBuffer::I32(v) => v.len(),
            SampleBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode little-endian bytes into the front of the buffer.
    fn fill_from_le(&mut self, bytes: &[u8]) -> usize {
        fn fill<T: PcmSample>(dst: &mut [T], bytes: &[u8]) -> usize {
            let width = T::ENCODING.width_bytes();
            let mut count = 0;
            for (sample, chunk) in dst.iter_mut().zip(bytes.chunks_exact(width)) {
                *sample = T::read_le(chunk);
                count += 1;
            }
            count
        }

        match self {
            SampleBuffer::I16(v) => fill(v, bytes),
            SampleBuffer::I32(v) => fill(v, bytes),
            SampleBuffer::F32(v) => fill(v, bytes),
        }
    }
}

/// Parsed header of a PCM container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmHeader {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Size of the `data` chunk; `None` when the writer left it open-ended.
    pub data_len: Option<u32>,
}

impl PcmHeader {
    pub fn new(encoding: SampleEncoding, channels: u16, sample_rate: u32, data_len: u32) -> Self {
        let width = encoding.width_bytes() as u16;
        Self {
            format_tag: encoding.wave_tag(),
            channels,
            sample_rate,
            block_align: width * channels,
            bits_per_sample: width * 8,
            data_len: Some(data_len),
        }
    }

    pub fn encoding(&self) -> SampleEncoding {
        SampleEncoding::from_wave(self.format_tag, self.bits_per_sample)
    }

    pub fn stream_config(&self) -> StreamConfig {
        let encoding = self.encoding();
        StreamConfig {
            channel_count: self.channels,
            sample_rate: self.sample_rate,
            sample_encoding: encoding,
            sample_width_bytes: (self.bits_per_sample / 8) as usize,
        }
    }

    /// Write the canonical 44-byte header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let data_len = self.data_len.unwrap_or(0);
        let byte_rate = self.sample_rate * self.block_align as u32;

        let mut header = Vec::with_capacity(PCM_HEADER_SIZE);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&(data_len.saturating_add(36)).to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&self.format_tag.to_le_bytes());
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&self.block_align.to_le_bytes());
        header.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&data_len.to_le_bytes());

        writer.write_all(&header)
    }

    /// Parse the RIFF header, leaving `reader` at the first data byte.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let mut riff = [0u8; 12];
        reader.read_exact(&mut riff)?;
        if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Err(FormatError::NotWave);
        }

        let mut fmt: Option<PcmHeader> = None;

        loop {
            let mut chunk = [0u8; 8];
            if let Err(e) = reader.read_exact(&mut chunk) {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    return Err(FormatError::MissingChunk("data"));
                }
                return Err(e.into());
            }
            let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

            match &chunk[0..4] {
                b"fmt " => {
                    if size > MAX_FMT_CHUNK_SIZE {
                        return Err(FormatError::BadFormatChunk(format!(
                            "chunk of {} bytes exceeds {}",
                            size, MAX_FMT_CHUNK_SIZE
                        )));
                    }
                    let mut body = vec![0u8; size as usize];
                    reader.read_exact(&mut body)?;
                    skip_padding(reader, size)?;
                    fmt = Some(Self::parse_fmt(&body)?);
                }
                b"data" => {
                    let mut header = fmt.ok_or(FormatError::MissingChunk("fmt "))?;
                    header.data_len = match size {
                        0 | u32::MAX => None,
                        n => Some(n),
                    };
                    return Ok(header);
                }
                other => {
                    debug!(
                        "Skipping `{}` chunk ({} bytes)",
                        String::from_utf8_lossy(other),
                        size
                    );
                    let padded = size as u64 + (size & 1) as u64;
                    io::copy(&mut reader.by_ref().take(padded), &mut io::sink())?;
                }
            }
        }
    }

    fn parse_fmt(body: &[u8]) -> Result<Self, FormatError> {
        if body.len() < 16 {
            return Err(FormatError::BadFormatChunk(format!(
                "expected at least 16 bytes, found {}",
                body.len()
            )));
        }
        let u16_at = |i: usize| u16::from_le_bytes([body[i], body[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([body[i], body[i + 1], body[i + 2], body[i + 3]]);

        let mut format_tag = u16_at(0);
        if format_tag == WAVE_FORMAT_EXTENSIBLE {
            // The sub-format GUID at offset 24 starts with the real tag
            if body.len() < 40 {
                return Err(FormatError::BadFormatChunk(
                    "extensible format without a sub-format".to_string(),
                ));
            }
            format_tag = u16_at(24);
        }

        let header = Self {
            format_tag,
            channels: u16_at(2),
            sample_rate: u32_at(4),
            block_align: u16_at(12),
            bits_per_sample: u16_at(14),
            data_len: None,
        };

        if header.channels == 0 {
            return Err(FormatError::BadFormatChunk("zero channels".to_string()));
        }

        Ok(header)
    }
}

fn skip_padding<R: Read>(reader: &mut R, size: u32) -> io::Result<()> {
    if size & 1 == 1 {
        let mut pad = [0u8; 1];
        reader.read_exact(&mut pad)?;
    }
    Ok(())
}

/// Incremental source of interleaved PCM samples
pub trait PcmSource {
    /// Fill `buffer` from the front, returning how many samples were read.
    ///
    /// Only whole frames are returned. Zero means the input is exhausted.
    fn read_samples(&mut self, buffer: &mut SampleBuffer) -> io::Result<usize>;
}

/// Reader over a PCM container's data chunk
pub struct PcmReader<R> {
    reader: R,
    header: PcmHeader,
    remaining: Option<u64>,
    scratch: Vec<u8>,
}

pub type PcmFile = PcmReader<BufReader<File>>;

impl PcmReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let file = File::open(path.as_ref())?;
        debug!("Opened PCM file {:?}", path.as_ref());
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> PcmReader<R> {
    pub fn new(mut reader: R) -> Result<Self, FormatError> {
        let header = PcmHeader::read_from(&mut reader)?;
        debug!(
            "PCM header: tag={} channels={} rate={} bits={} data={:?}",
            header.format_tag,
            header.channels,
            header.sample_rate,
            header.bits_per_sample,
            header.data_len
        );
        Ok(Self {
            reader,
            header,
            remaining: header.data_len.map(u64::from),
            scratch: Vec::new(),
        })
    }

    pub fn header(&self) -> &PcmHeader {
        &self.header
    }

    fn read_full(&mut self, len: usize) -> io::Result<usize> {
        self.scratch.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut self.scratch[filled..len]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> PcmSource for PcmReader<R> {
    fn read_samples(&mut self, buffer: &mut SampleBuffer) -> io::Result<usize> {
        let config = self.header.stream_config();
        let width = config.sample_width_bytes;
        let frame_bytes = config.bytes_per_frame();
        if width == 0 || frame_bytes == 0 || buffer.encoding() != config.sample_encoding {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sample buffer does not match the stream encoding",
            ));
        }

        let mut want = buffer.len() * width;
        if let Some(remaining) = self.remaining {
            want = want.min(remaining as usize);
        }
        want -= want % frame_bytes;
        if want == 0 {
            return Ok(0);
        }

        let got = self.read_full(want)?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= got as u64;
        }

        let whole = got - got % frame_bytes;
        Ok(buffer.fill_from_le(&self.scratch[..whole]))
    }
}
