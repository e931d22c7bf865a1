//! Three-band EQ Effect
//!
//! Low shelf, mid peak and high shelf built from cascaded biquads.

use serde::{Deserialize, Serialize};

use super::biquad::{filter_channel, BiquadCoeffs, BiquadType};
use super::domain;
use crate::engine::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Band gain limit in dB (symmetric)
pub const MAX_BAND_GAIN_DB: f32 = 24.0;

/// Low shelf corner
const LOW_SHELF_HZ: f64 = 250.0;
/// Mid peak centre
const MID_PEAK_HZ: f64 = 1000.0;
/// Mid peak bandwidth
const MID_PEAK_Q: f64 = 0.7;
/// High shelf corner
const HIGH_SHELF_HZ: f64 = 4000.0;
/// Shelf slope
const SHELF_Q: f64 = 0.707;

// ============================================================================
// Parameters
// ============================================================================

/// EQ parameters, band gains in dB
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EqParams {
    #[serde(alias = "bass", alias = "low_gain")]
    pub low: f32,
    #[serde(alias = "mids", alias = "mid_gain")]
    pub mid: f32,
    #[serde(alias = "treble", alias = "high_gain")]
    pub high: f32,
}

impl EqParams {
    pub fn new(low: f32, mid: f32, high: f32) -> Self {
        Self { low, mid, high }
    }

    pub fn validate(&self) -> Result<()> {
        domain::range("eq", "low", self.low, -MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB)?;
        domain::range("eq", "mid", self.mid, -MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB)?;
        domain::range("eq", "high", self.high, -MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB)
    }

    /// "Applied EQ: 4dB boost to bass, 2dB cut to treble"
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        for (gain, band) in [(self.low, "bass"), (self.mid, "mids"), (self.high, "treble")] {
            if gain > 0.0 {
                parts.push(format!("{}dB boost to {}", gain, band));
            } else if gain < 0.0 {
                parts.push(format!("{}dB cut to {}", -gain, band));
            }
        }
        if parts.is_empty() {
            "Applied EQ: flat".to_string()
        } else {
            format!("Applied EQ: {}", parts.join(", "))
        }
    }

    fn stages(&self, sample_rate: u32) -> Vec<BiquadCoeffs> {
        let sr = sample_rate as f64;
        let mut stages = Vec::with_capacity(3);
        if self.low != 0.0 {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::LowShelf,
                sr,
                LOW_SHELF_HZ,
                self.low as f64,
                SHELF_Q,
            ));
        }
        if self.mid != 0.0 {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::Peak,
                sr,
                MID_PEAK_HZ,
                self.mid as f64,
                MID_PEAK_Q,
            ));
        }
        if self.high != 0.0 {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::HighShelf,
                sr,
                HIGH_SHELF_HZ,
                self.high as f64,
                SHELF_Q,
            ));
        }
        stages
    }
}

/// Apply the three-band EQ
pub fn apply_eq(buffer: &AudioBuffer, params: &EqParams) -> Result<AudioBuffer> {
    params.validate()?;
    let stages = params.stages(buffer.sample_rate());
    if stages.is_empty() {
        return Ok(buffer.clone());
    }
    buffer.map_channels(|_, ch| filter_channel(ch, &stages))
}

// ============================================================================
// Tests
// ============================================================================
