//! Waveform preview
//!
//! Peak envelope for drawing: the largest magnitude across all channels
//! in each of `points` equal buckets.

use serde::{Deserialize, Serialize};

use crate::engine::AudioBuffer;
use crate::error::{AudioChatError, Result};

/// Default number of preview points
pub const DEFAULT_WAVEFORM_POINTS: usize = 1000;

/// Downsampled peak envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformPreview {
    pub sample_rate: u32,
    pub duration_secs: f64,
    /// Max-abs per bucket, 0..=1 for in-range audio
    pub peaks: Vec<f32>,
}

impl WaveformPreview {
    /// Build a preview with at most `points` buckets
    ///
    /// Buffers shorter than `points` get one bucket per frame.
    pub fn generate(buffer: &AudioBuffer, points: usize) -> Result<Self> {
        if points == 0 {
            return Err(AudioChatError::Analysis {
                reason: "waveform needs at least one point".to_string(),
            });
        }
        let frames = buffer.num_frames();
        let buckets = points.min(frames);
        let peaks = (0..buckets)
            .map(|b| {
                let start = b * frames / buckets;
                let end = ((b + 1) * frames / buckets).max(start + 1);
                buffer
                    .channels()
                    .iter()
                    .flat_map(|ch| ch[start..end].iter())
                    .fold(0.0_f32, |m, s| m.max(s.abs()))
            })
            .collect();
        Ok(Self {
            sample_rate: buffer.sample_rate(),
            duration_secs: buffer.duration_secs(),
            peaks,
        })
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}
