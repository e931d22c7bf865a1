//! Gain and Normalization
//!
//! Static gain in dB and whole-file peak normalization.

use serde::{Deserialize, Serialize};

use super::domain;
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Gain
// ============================================================================

/// Gain parameters
///
/// Any finite dB value is accepted. Samples may exceed full scale
/// afterwards; the encoder clips to the output range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainParams {
    #[serde(alias = "gain", alias = "db")]
    pub gain_db: f32,
}

impl Default for GainParams {
    fn default() -> Self {
        Self { gain_db: 0.0 }
    }
}

impl GainParams {
    pub fn new(gain_db: f32) -> Self {
        Self { gain_db }
    }

    pub fn validate(&self) -> Result<()> {
        domain::finite("gain", "gain_db", self.gain_db)
    }

    pub fn describe(&self) -> String {
        if self.gain_db >= 0.0 {
            format!("Increased volume by {:.1}dB", self.gain_db)
        } else {
            format!("Reduced volume by {:.1}dB", -self.gain_db)
        }
    }
}

/// Apply a static gain
pub fn apply_gain(buffer: &AudioBuffer, params: &GainParams) -> Result<AudioBuffer> {
    params.validate()?;
    // f64 keeps large boosts exact before narrowing
    let linear = 10.0_f64.powf(params.gain_db as f64 / 20.0);
    Ok(buffer.map_samples(|s| (s as f64 * linear) as f32))
}

// ============================================================================
// Normalize
// ============================================================================

/// Peak normalization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    #[serde(alias = "target", alias = "peak_db")]
    pub target_peak_db: f32,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            target_peak_db: -1.0,
        }
    }
}

impl NormalizeParams {
    pub fn validate(&self) -> Result<()> {
        domain::at_most("normalize", "target_peak_db", self.target_peak_db, 0.0)
    }

    pub fn describe(&self) -> String {
        format!("Normalized peak level to {:.1}dB", self.target_peak_db)
    }
}

/// Scale the whole buffer so its peak lands on the target
///
/// Silent input is returned unchanged.
pub fn apply_normalize(buffer: &AudioBuffer, params: &NormalizeParams) -> Result<AudioBuffer> {
    params.validate()?;
    let peak = buffer.peak();
    if peak <= 0.0 {
        return Ok(buffer.clone());
    }
    let gain_db = params.target_peak_db - linear_to_db(peak);
    let gain = db_to_linear(gain_db);
    Ok(buffer.map_samples(|s| s * gain))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> AudioBuffer {
        AudioBuffer::new(
            vec![vec![0.1, -0.2, 0.3, -0.25], vec![0.05, 0.0, -0.1, 0.2]],
            44100,
        )
        .unwrap()
    }

    #[test]
    fn test_gain_roundtrip() {
        let input = ramp();
        let up = apply_gain(&input, &GainParams::new(6.0)).unwrap();
        let back = apply_gain(&up, &GainParams::new(-6.0)).unwrap();
        for (a, b) in input.channels().iter().flatten().zip(back.channels().iter().flatten()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gain_six_db_doubles() {
        let out = apply_gain(&ramp(), &GainParams::new(6.0206)).unwrap();
        assert_relative_eq!(out.channel(0)[0], 0.2, epsilon = 1e-4);
    }

    #[test]
    fn test_gain_rejects_nan() {
        assert!(apply_gain(&ramp(), &GainParams::new(f32::NAN)).is_err());
    }

    #[test]
    fn test_normalize_hits_target() {
        let out = apply_normalize(
            &ramp(),
            &NormalizeParams {
                target_peak_db: -6.0,
            },
        )
        .unwrap();
        assert_relative_eq!(out.peak(), db_to_linear(-6.0), epsilon = 1e-5);
    }

    #[test]
    fn test_normalize_silence_unchanged() {
        let silent = AudioBuffer::silence(1, 100, 8000).unwrap();
        let out = apply_normalize(&silent, &NormalizeParams::default()).unwrap();
        assert_eq!(out, silent);
    }

    #[test]
    fn test_normalize_rejects_positive_target() {
        let params = NormalizeParams {
            target_peak_db: 3.0,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(GainParams::new(6.0).describe(), "Increased volume by 6.0dB");
        assert_eq!(GainParams::new(-3.0).describe(), "Reduced volume by 3.0dB");
    }
}
