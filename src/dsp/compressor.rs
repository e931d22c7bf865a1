//! Compressor Effect
//!
//! Feed-forward compressor with linked stereo detection, hard or soft
//! knee gain computer and one-pole attack/release smoothing.

use serde::{Deserialize, Serialize};

use super::domain;
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Level floor for the detector (avoids log of zero)
const DETECTOR_FLOOR_DB: f32 = -120.0;

/// Maximum makeup gain in dB
const MAX_MAKEUP_DB: f32 = 24.0;

// ============================================================================
// Helper Functions
// ============================================================================

/// One-pole smoothing coefficient for a time constant
#[inline]
pub(crate) fn time_to_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = time_ms * sample_rate as f32 / 1000.0;
    if samples > 0.0 {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}

/// Peak level across channels at one frame, in dB
#[inline]
pub(crate) fn frame_level_db(buffer: &AudioBuffer, frame: usize) -> f32 {
    let peak = buffer
        .channels()
        .iter()
        .fold(0.0_f32, |acc, ch| acc.max(ch[frame].abs()));
    linear_to_db(peak).max(DETECTOR_FLOOR_DB)
}

// ============================================================================
// Parameters
// ============================================================================

/// Compression parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionParams {
    #[serde(alias = "threshold")]
    pub threshold_db: f32,
    pub ratio: f32,
    #[serde(alias = "attack")]
    pub attack_ms: f32,
    #[serde(alias = "release")]
    pub release_ms: f32,
    /// Knee width in dB (0 = hard knee)
    #[serde(alias = "knee")]
    pub knee_db: f32,
    #[serde(alias = "makeup", alias = "makeup_gain_db")]
    pub makeup_db: f32,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 3.0,
            attack_ms: 20.0,
            release_ms: 250.0,
            knee_db: 0.0,
            makeup_db: 0.0,
        }
    }
}

impl CompressionParams {
    pub fn validate(&self) -> Result<()> {
        domain::at_most("compression", "threshold_db", self.threshold_db, 0.0)?;
        domain::at_least("compression", "ratio", self.ratio, 1.0)?;
        domain::positive("compression", "attack_ms", self.attack_ms)?;
        domain::positive("compression", "release_ms", self.release_ms)?;
        domain::at_least("compression", "knee_db", self.knee_db, 0.0)?;
        domain::range("compression", "makeup_db", self.makeup_db, 0.0, MAX_MAKEUP_DB)
    }

    pub fn describe(&self) -> String {
        format!(
            "Applied compression: {}dB threshold, {}:1 ratio, {}ms attack, {}ms release",
            self.threshold_db, self.ratio, self.attack_ms, self.release_ms
        )
    }

    /// Gain change in dB for a detector level
    fn gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.threshold_db;
        let ratio = self.ratio;
        let knee = self.knee_db;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;
            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic blend from 1:1 to the full ratio across the knee
                let t = (input_db - knee_start) / knee;
                let effective_ratio = 1.0 + (ratio - 1.0) * t * t;
                (knee_start + (input_db - knee_start) / effective_ratio) - input_db
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }
}

// ============================================================================
// Processing
// ============================================================================

/// Apply compression
pub fn apply_compression(buffer: &AudioBuffer, params: &CompressionParams) -> Result<AudioBuffer> {
    params.validate()?;

    let sr = buffer.sample_rate();
    let attack = time_to_coeff(params.attack_ms, sr);
    let release = time_to_coeff(params.release_ms, sr);
    let makeup = db_to_linear(params.makeup_db);

    let frames = buffer.num_frames();
    let mut gains = Vec::with_capacity(frames);
    let mut current = 1.0_f32;
    for frame in 0..frames {
        let target = db_to_linear(params.gain_reduction_db(frame_level_db(buffer, frame)));
        let coeff = if target < current { attack } else { release };
        current = coeff * current + (1.0 - coeff) * target;
        gains.push(current * makeup);
    }

    buffer.map_channels(|_, ch| ch.iter().zip(&gains).map(|(s, g)| s * g).collect())
}

// ============================================================================
// Tests
// ============================================================================
