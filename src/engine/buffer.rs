//! Audio Buffer
//!
//! Decoded, non-interleaved audio. A buffer is immutable once built: every
//! effect produces a new buffer instead of editing channels in place.

use crate::error::{AudioChatError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// # Arguments
/// * `db` - Value in decibels
///
/// # Returns
/// Linear amplitude (0.0 to 1.0+ range)
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// # Arguments
/// * `linear` - Linear amplitude value
///
/// # Returns
/// Value in decibels. Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

// ============================================================================
// AudioBuffer
// ============================================================================

/// Multi-channel audio buffer
///
/// Samples are stored per channel (`channels[c][frame]`). All channels have
/// the same length and the sample rate is always positive.
///
/// # Example
/// ```
/// use audiochat::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::silence(2, 44100, 44100).unwrap();
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.num_frames(), 44100);
/// assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from per-channel sample vectors
    ///
    /// Fails when there are no channels, the sample rate is zero, or the
    /// channels differ in length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(AudioChatError::Decode {
                reason: "audio has no channels".to_string(),
                source: None,
            });
        }
        if sample_rate == 0 {
            return Err(AudioChatError::Decode {
                reason: "sample rate must be positive".to_string(),
                source: None,
            });
        }
        let len = channels[0].len();
        if let Some((idx, ch)) = channels.iter().enumerate().find(|(_, c)| c.len() != len) {
            return Err(AudioChatError::Decode {
                reason: format!(
                    "channel {} has {} samples, expected {}",
                    idx,
                    ch.len(),
                    len
                ),
                source: None,
            });
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Build a mono buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(vec![samples], sample_rate)
    }

    /// Build a buffer of zeros
    pub fn silence(num_channels: usize, num_frames: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![vec![0.0; num_frames]; num_channels], sample_rate)
    }

    /// Build a buffer from interleaved samples (L, R, L, R, ...)
    pub fn from_interleaved(interleaved: &[f32], num_channels: usize, sample_rate: u32) -> Result<Self> {
        if num_channels == 0 || interleaved.len() % num_channels != 0 {
            return Err(AudioChatError::Decode {
                reason: format!(
                    "interleaved length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
                source: None,
            });
        }

        let frames = interleaved.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                channels[ch].push(sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Convert the buffer to interleaved order
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_channels() * self.num_frames());
        for frame in 0..self.num_frames() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    /// Duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Samples of one channel
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// All channels
    #[inline]
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Consume the buffer, returning its channel data
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// New buffer with the same rate and new channel data
    pub fn with_channels(&self, channels: Vec<Vec<f32>>) -> Result<Self> {
        Self::new(channels, self.sample_rate)
    }

    /// Apply a per-channel transform, producing a new buffer
    ///
    /// The closure receives the channel index and its samples and must
    /// return a channel of the same length.
    pub fn map_channels<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, &[f32]) -> Vec<f32>,
    {
        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, ch)| f(i, ch))
            .collect();
        self.with_channels(channels)
    }

    /// Apply a per-sample transform, producing a new buffer
    pub fn map_samples<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32,
    {
        Self {
            channels: self
                .channels
                .iter()
                .map(|ch| ch.iter().map(|&s| f(s)).collect())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Copy of the frame range `[start, end)`, clamped to the buffer
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.num_frames());
        let start = start.min(end);
        Self {
            channels: self
                .channels
                .iter()
                .map(|ch| ch[start..end].to_vec())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Replace the frames starting at `start` with `segment`
    ///
    /// The segment must have the same channel count and rate and fit
    /// inside the buffer.
    pub fn splice(&self, start: usize, segment: &AudioBuffer) -> Result<Self> {
        if segment.num_channels() != self.num_channels() || segment.sample_rate != self.sample_rate {
            return Err(AudioChatError::InvalidChain {
                reason: "segment layout does not match the source buffer".to_string(),
            });
        }
        if start + segment.num_frames() > self.num_frames() {
            return Err(AudioChatError::InvalidChain {
                reason: "segment extends past the end of the source buffer".to_string(),
            });
        }
        let mut channels = self.channels.clone();
        for (dst, src) in channels.iter_mut().zip(segment.channels.iter()) {
            dst[start..start + src.len()].copy_from_slice(src);
        }
        self.with_channels(channels)
    }

    /// Average of all channels
    pub fn mono_mix(&self) -> Vec<f32> {
        let n = self.num_channels() as f32;
        (0..self.num_frames())
            .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / n)
            .collect()
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0_f32, |acc, &s| acc.max(s.abs()))
    }

    /// RMS across all channels (linear)
    pub fn rms(&self) -> f32 {
        let total = self.num_channels() * self.num_frames();
        if total == 0 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum_sq / total as f64).sqrt() as f32
    }

    /// True when every sample is finite
    pub fn is_finite(&self) -> bool {
        self.channels
            .iter()
            .all(|ch| ch.iter().all(|s| s.is_finite()))
    }
}

// ============================================================================
// Tests
// ============================================================================
