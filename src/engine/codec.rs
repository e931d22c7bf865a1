//! Audio Codec
//!
//! Bytes to [`AudioBuffer`] and back. WAV is handled with `hound` in both
//! directions; compressed containers (MP3/FLAC/OGG/AAC) are decoded with
//! `symphonia` when the `compressed-input` feature is enabled. Output is
//! always WAV.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use super::AudioBuffer;
use crate::error::{AudioChatError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Bit depth used when the input gives no hint
pub const DEFAULT_BIT_DEPTH: u16 = 24;

// ============================================================================
// Formats
// ============================================================================

/// Container formats recognised on input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
    Aac,
    Unknown,
}

impl ContainerFormat {
    /// Guess the container from the leading bytes
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            ContainerFormat::Wav
        } else if bytes.starts_with(b"fLaC") {
            ContainerFormat::Flac
        } else if bytes.starts_with(b"OggS") {
            ContainerFormat::Ogg
        } else if bytes.starts_with(b"ID3") {
            ContainerFormat::Mp3
        } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            ContainerFormat::Aac
        } else if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xF6) == 0xF0 {
            // ADTS sync word with layer bits 00
            ContainerFormat::Aac
        } else if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
            ContainerFormat::Mp3
        } else {
            ContainerFormat::Unknown
        }
    }

    /// File extension hint
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ContainerFormat::Wav => Some("wav"),
            ContainerFormat::Mp3 => Some("mp3"),
            ContainerFormat::Flac => Some("flac"),
            ContainerFormat::Ogg => Some("ogg"),
            ContainerFormat::Aac => Some("m4a"),
            ContainerFormat::Unknown => None,
        }
    }

    /// Parse a user supplied format name
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "wav" | "wave" => Some(ContainerFormat::Wav),
            "mp3" => Some(ContainerFormat::Mp3),
            "flac" => Some(ContainerFormat::Flac),
            "ogg" | "vorbis" => Some(ContainerFormat::Ogg),
            "aac" | "m4a" | "mp4" => Some(ContainerFormat::Aac),
            _ => None,
        }
    }
}

/// Result of decoding input bytes
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub buffer: AudioBuffer,
    pub container: ContainerFormat,
    /// Source bit depth when the container carries one
    pub bit_depth: Option<u16>,
}

/// Requested output encoding; unset fields follow the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub container: Option<ContainerFormat>,
    pub bit_depth: Option<u16>,
}

/// Fully resolved encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSpec {
    pub container: ContainerFormat,
    pub bit_depth: u16,
}

impl OutputFormat {
    /// Resolve against the decoded input
    ///
    /// Inputs in compressed containers come back as WAV unless another
    /// container is requested explicitly.
    pub fn resolve(&self, input: &DecodedAudio) -> EncodeSpec {
        EncodeSpec {
            container: self.container.unwrap_or(ContainerFormat::Wav),
            bit_depth: self
                .bit_depth
                .or(input.bit_depth.filter(|b| matches!(b, 16 | 24 | 32)))
                .unwrap_or(DEFAULT_BIT_DEPTH),
        }
    }
}

// ============================================================================
// Codec Trait
// ============================================================================

/// Decode/encode capability consumed by the pipeline
pub trait AudioCodec: Send + Sync {
    /// Decode raw file bytes
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio>;

    /// Encode a buffer; samples are clipped to [-1, 1]
    fn encode(&self, buffer: &AudioBuffer, spec: &EncodeSpec) -> Result<Vec<u8>>;
}

/// WAV via hound, compressed formats via symphonia
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl AudioCodec for DefaultCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio> {
        if bytes.is_empty() {
            return Err(AudioChatError::Decode {
                reason: "input is empty".to_string(),
                source: None,
            });
        }

        let container = ContainerFormat::sniff(bytes);
        let (buffer, bit_depth) = match container {
            ContainerFormat::Wav => {
                let (buffer, bits) = decode_wav(bytes)?;
                (buffer, Some(bits))
            }
            other => (decode_compressed(bytes, other)?, None),
        };

        if buffer.is_empty() {
            return Err(AudioChatError::Decode {
                reason: "audio contains no samples".to_string(),
                source: None,
            });
        }
        if !buffer.is_finite() {
            return Err(AudioChatError::Decode {
                reason: "audio contains NaN or infinite samples".to_string(),
                source: None,
            });
        }

        Ok(DecodedAudio {
            buffer,
            container,
            bit_depth,
        })
    }

    fn encode(&self, buffer: &AudioBuffer, spec: &EncodeSpec) -> Result<Vec<u8>> {
        if spec.container != ContainerFormat::Wav {
            return Err(AudioChatError::Encode {
                reason: format!("{:?} output is not supported, request WAV", spec.container),
            });
        }
        encode_wav(buffer, spec.bit_depth)
    }
}

// ============================================================================
// WAV
// ============================================================================

fn wav_err(e: hound::Error) -> AudioChatError {
    AudioChatError::Decode {
        reason: format!("invalid WAV data: {}", e),
        source: Some(Box::new(e)),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<(AudioBuffer, u16)> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(wav_err)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        (SampleFormat::Int, bits) => {
            return Err(AudioChatError::Decode {
                reason: format!("unsupported WAV bit depth: {}", bits),
                source: None,
            })
        }
    };

    let buffer = AudioBuffer::from_interleaved(&samples, channels, spec.sample_rate)?;
    Ok((buffer, spec.bits_per_sample))
}

fn encode_wav(buffer: &AudioBuffer, bit_depth: u16) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let enc_err = |e: hound::Error| AudioChatError::Encode {
        reason: e.to_string(),
    };

    let mut out = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut out), spec).map_err(enc_err)?;
        for sample in buffer.to_interleaved() {
            let s = sample.clamp(-1.0, 1.0);
            match bit_depth {
                16 => writer
                    .write_sample((s * 32767.0).round() as i16)
                    .map_err(enc_err)?,
                24 => writer
                    .write_sample((s * 8388607.0).round() as i32)
                    .map_err(enc_err)?,
                32 => writer.write_sample(s).map_err(enc_err)?,
                other => {
                    return Err(AudioChatError::Encode {
                        reason: format!("unsupported bit depth: {} (use 16, 24 or 32)", other),
                    })
                }
            }
        }
        writer.finalize().map_err(enc_err)?;
    }
    Ok(out)
}

// ============================================================================
// Compressed Containers
// ============================================================================

#[cfg(feature = "compressed-input")]
fn decode_compressed(bytes: &[u8], container: ContainerFormat) -> Result<AudioBuffer> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let decode_err = |reason: String| AudioChatError::Decode {
        reason,
        source: None,
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = container.extension() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(format!("unrecognised audio container: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| decode_err("no audio track found".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("unsupported codec: {}", e)))?;

    let mut interleaved = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(format!("failed to read packet: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(decode_err(format!("decode failed: {}", e))),
        }
    }

    AudioBuffer::from_interleaved(&interleaved, channels, sample_rate)
}

#[cfg(not(feature = "compressed-input"))]
fn decode_compressed(_bytes: &[u8], container: ContainerFormat) -> Result<AudioBuffer> {
    Err(AudioChatError::Decode {
        reason: format!(
            "{:?} input requires the compressed-input feature",
            container
        ),
        source: None,
    })
}

// ============================================================================
// Tests
// ============================================================================
