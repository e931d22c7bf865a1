//! Vocal Enhancement Effect
//!
//! Fixed voicing chain: rumble high-pass, warmth and presence peaks, an
//! air shelf and a de-essing shelf, each stage scaled by its parameter.

use serde::{Deserialize, Serialize};

use super::biquad::{filter_channel, BiquadCoeffs, BiquadType};
use super::domain;
use crate::engine::AudioBuffer;
use crate::error::Result;

const RUMBLE_HZ: f64 = 80.0;
const WARMTH_HZ: f64 = 200.0;
const WARMTH_MAX_DB: f64 = 3.0;
const PRESENCE_HZ: f64 = 3000.0;
const PRESENCE_MAX_DB: f64 = 6.0;
const AIR_HZ: f64 = 10_000.0;
const AIR_MAX_DB: f64 = 2.0;
const DE_ESS_HZ: f64 = 7000.0;
const DE_ESS_MAX_DB: f64 = 6.0;

/// Vocal enhancement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocalEnhancementParams {
    #[serde(alias = "presence")]
    pub clarity: f32,
    #[serde(alias = "body")]
    pub warmth: f32,
    #[serde(alias = "deess", alias = "de_esser")]
    pub de_ess: f32,
}

impl Default for VocalEnhancementParams {
    fn default() -> Self {
        Self {
            clarity: 0.5,
            warmth: 0.3,
            de_ess: 0.3,
        }
    }
}

impl VocalEnhancementParams {
    pub fn validate(&self) -> Result<()> {
        domain::unit("vocal_enhancement", "clarity", self.clarity)?;
        domain::unit("vocal_enhancement", "warmth", self.warmth)?;
        domain::unit("vocal_enhancement", "de_ess", self.de_ess)
    }

    pub fn describe(&self) -> String {
        format!(
            "Enhanced vocals: {:.0}% clarity, {:.0}% warmth, {:.0}% de-essing",
            self.clarity * 100.0,
            self.warmth * 100.0,
            self.de_ess * 100.0
        )
    }

    fn stages(&self, sample_rate: u32) -> Vec<BiquadCoeffs> {
        let sr = sample_rate as f64;
        // Shelves above the usable band are skipped rather than folded down
        let usable = sr * 0.45;
        let mut stages = vec![BiquadCoeffs::calculate(
            BiquadType::HighPass,
            sr,
            RUMBLE_HZ,
            0.0,
            0.707,
        )];
        if self.warmth > 0.0 {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::Peak,
                sr,
                WARMTH_HZ,
                self.warmth as f64 * WARMTH_MAX_DB,
                0.8,
            ));
        }
        if self.clarity > 0.0 && PRESENCE_HZ < usable {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::Peak,
                sr,
                PRESENCE_HZ,
                self.clarity as f64 * PRESENCE_MAX_DB,
                1.0,
            ));
        }
        if self.clarity > 0.0 && AIR_HZ < usable {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::HighShelf,
                sr,
                AIR_HZ,
                self.clarity as f64 * AIR_MAX_DB,
                0.707,
            ));
        }
        if self.de_ess > 0.0 && DE_ESS_HZ < usable {
            stages.push(BiquadCoeffs::calculate(
                BiquadType::HighShelf,
                sr,
                DE_ESS_HZ,
                -(self.de_ess as f64) * DE_ESS_MAX_DB,
                0.707,
            ));
        }
        stages
    }
}

/// Apply the voicing chain
pub fn apply_vocal_enhancement(
    buffer: &AudioBuffer,
    params: &VocalEnhancementParams,
) -> Result<AudioBuffer> {
    params.validate()?;
    let stages = params.stages(buffer.sample_rate());
    buffer.map_channels(|_, ch| filter_channel(ch, &stages))
}
