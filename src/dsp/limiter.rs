//! Limiter Effect
//!
//! Input gain followed by a brickwall peak limiter: instant attack,
//! exponential release.

use serde::{Deserialize, Serialize};

use super::compressor::time_to_coeff;
use super::domain;
use crate::engine::buffer::db_to_linear;
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Limiter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    /// Gain applied before limiting
    #[serde(alias = "gain", alias = "input_gain_db")]
    pub gain_db: f32,
    /// Output ceiling
    #[serde(alias = "threshold", alias = "ceiling_db")]
    pub threshold_db: f32,
    #[serde(alias = "release")]
    pub release_ms: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            threshold_db: -0.3,
            release_ms: 50.0,
        }
    }
}

impl LimiterParams {
    pub fn validate(&self) -> Result<()> {
        domain::finite("limiter", "gain_db", self.gain_db)?;
        domain::at_most("limiter", "threshold_db", self.threshold_db, 0.0)?;
        domain::positive("limiter", "release_ms", self.release_ms)
    }

    pub fn describe(&self) -> String {
        if self.gain_db > 0.0 {
            format!(
                "Increased loudness by {}dB with limiting at {}dB",
                self.gain_db, self.threshold_db
            )
        } else if self.gain_db < 0.0 {
            format!(
                "Reduced level by {}dB with limiting at {}dB",
                -self.gain_db, self.threshold_db
            )
        } else {
            format!("Applied limiter at {}dB", self.threshold_db)
        }
    }
}

/// Apply gain then limit peaks to the ceiling
pub fn apply_limiter(buffer: &AudioBuffer, params: &LimiterParams) -> Result<AudioBuffer> {
    params.validate()?;

    let input_gain = 10.0_f64.powf(params.gain_db as f64 / 20.0);
    let ceiling = db_to_linear(params.threshold_db);
    let release = time_to_coeff(params.release_ms, buffer.sample_rate());

    let boosted = buffer.map_samples(|s| (s as f64 * input_gain) as f32);

    let mut gains = Vec::with_capacity(boosted.num_frames());
    let mut current = 1.0_f32;
    for frame in 0..boosted.num_frames() {
        let peak = boosted
            .channels()
            .iter()
            .fold(0.0_f32, |acc, ch| acc.max(ch[frame].abs()));
        let target = if peak > ceiling { ceiling / peak } else { 1.0 };
        current = if target < current {
            target
        } else {
            release * current + (1.0 - release) * target
        };
        gains.push(current);
    }

    boosted.map_channels(|_, ch| {
        ch.iter()
            .zip(&gains)
            .map(|(s, g)| (s * g).clamp(-ceiling, ceiling))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_never_exceed_ceiling() {
        let samples: Vec<f32> = (0..4410)
            .map(|i| 0.8 * (i as f32 * 0.05).sin())
            .collect();
        let input = AudioBuffer::mono(samples, 44100).unwrap();
        let params = LimiterParams {
            gain_db: 12.0,
            threshold_db: -1.0,
            release_ms: 50.0,
        };
        let out = apply_limiter(&input, &params).unwrap();
        assert!(out.peak() <= db_to_linear(-1.0) + 1e-6);
        assert!(out.rms() > input.rms());
    }

    #[test]
    fn test_negative_gain_reduces_level() {
        let input = AudioBuffer::mono(vec![1.0, -1.0, 1.0, -1.0], 8000).unwrap();
        let out = apply_limiter(
            &input,
            &LimiterParams {
                gain_db: -6.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(out.peak() < 0.55);
    }

    #[test]
    fn test_validation() {
        let bad = LimiterParams {
            threshold_db: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = LimiterParams {
            release_ms: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
