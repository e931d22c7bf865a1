//! Distortion Effect
//!
//! Waveshaping distortion with selectable curve and dry/wet mix. Every
//! curve is bounded, so the output stays finite for finite input.

use serde::{Deserialize, Serialize};

use super::domain;
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Largest accepted drive multiplier
pub const MAX_DRIVE: f32 = 100.0;

/// Waveshaping curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionMode {
    /// `tanh(drive * x)`
    #[default]
    #[serde(alias = "tape", alias = "soft")]
    SoftClip,
    /// `clamp(drive * x, -1, 1)`
    #[serde(alias = "hard", alias = "hardclip")]
    HardClip,
    /// tanh on the positive half, softer rational curve on the negative half
    Tube,
    /// `d / (1 + |d|)` with `d = drive * x`
    #[serde(alias = "transistor")]
    Fuzz,
}

impl DistortionMode {
    #[inline]
    fn shape(&self, x: f32, drive: f32) -> f32 {
        let driven = x * drive;
        match self {
            DistortionMode::SoftClip => driven.tanh(),
            DistortionMode::HardClip => driven.clamp(-1.0, 1.0),
            DistortionMode::Tube => {
                if driven >= 0.0 {
                    driven.tanh()
                } else {
                    driven / (1.0 + driven.abs())
                }
            }
            DistortionMode::Fuzz => driven / (1.0 + driven.abs()),
        }
    }
}

/// Distortion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    /// Pre-shaper gain multiplier (>= 1)
    pub drive: f32,
    pub mix: f32,
    #[serde(alias = "type", alias = "curve")]
    pub mode: DistortionMode,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            drive: 2.0,
            mix: 0.5,
            mode: DistortionMode::SoftClip,
        }
    }
}

impl DistortionParams {
    pub fn validate(&self) -> Result<()> {
        domain::range("distortion", "drive", self.drive, 1.0, MAX_DRIVE)?;
        domain::unit("distortion", "mix", self.mix)
    }

    pub fn describe(&self) -> String {
        let amount = if self.drive < 2.0 {
            "subtle"
        } else if self.drive < 4.0 {
            "moderate"
        } else {
            "heavy"
        };
        format!("Added {} distortion", amount)
    }
}

/// Apply distortion
pub fn apply_distortion(buffer: &AudioBuffer, params: &DistortionParams) -> Result<AudioBuffer> {
    params.validate()?;
    let mix = params.mix;
    let drive = params.drive;
    let mode = params.mode;
    Ok(buffer.map_samples(|x| (1.0 - mix) * x + mix * mode.shape(x, drive)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(DistortionMode::SoftClip)]
    #[test_case(DistortionMode::HardClip)]
    #[test_case(DistortionMode::Tube)]
    #[test_case(DistortionMode::Fuzz)]
    fn test_wet_output_bounded(mode: DistortionMode) {
        let input = AudioBuffer::mono(vec![-50.0, -1.0, -0.1, 0.0, 0.1, 1.0, 50.0], 8000).unwrap();
        let params = DistortionParams {
            drive: 10.0,
            mix: 1.0,
            mode,
        };
        let out = apply_distortion(&input, &params).unwrap();
        assert!(out.peak() <= 1.0);
        assert_eq!(out.channel(0)[3], 0.0);
    }

    #[test]
    fn test_mix_zero_is_dry() {
        let input = AudioBuffer::mono(vec![0.3, -0.7], 8000).unwrap();
        let params = DistortionParams {
            mix: 0.0,
            ..Default::default()
        };
        assert_eq!(apply_distortion(&input, &params).unwrap(), input);
    }

    #[test]
    fn test_drive_domain() {
        let params = DistortionParams {
            drive: 0.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_mode_from_json_alias() {
        let params: DistortionParams =
            serde_json::from_str(r#"{"drive": 3, "mode": "transistor"}"#).unwrap();
        assert_eq!(params.mode, DistortionMode::Fuzz);
        assert_eq!(params.mix, 0.5);
    }

    #[test]
    fn test_describe() {
        assert_eq!(DistortionParams::default().describe(), "Added moderate distortion");
    }
}
