//! Filter Effect
//!
//! Resonant low-pass, high-pass and band-pass filters (12 dB/oct biquads;
//! band-pass is a high-pass/low-pass pair).

use serde::{Deserialize, Serialize};

use super::biquad::{filter_channel, BiquadCoeffs, BiquadType};
use super::domain;
use crate::engine::AudioBuffer;
use crate::error::{AudioChatError, Result};

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterShape {
    #[default]
    #[serde(alias = "low_pass", alias = "low-pass")]
    Lowpass,
    #[serde(alias = "high_pass", alias = "high-pass")]
    Highpass,
    #[serde(alias = "band_pass", alias = "band-pass")]
    Bandpass,
}

impl FilterShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterShape::Lowpass => "lowpass",
            FilterShape::Highpass => "highpass",
            FilterShape::Bandpass => "bandpass",
        }
    }
}

/// Filter parameters
///
/// `cutoff_low` is the corner of a high-pass or the lower band edge;
/// `cutoff_high` is the corner of a low-pass or the upper band edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    #[serde(alias = "type")]
    pub filter_type: FilterShape,
    pub cutoff_low: f32,
    pub cutoff_high: f32,
    /// 0 (Q 0.5) to 1 (Q 1.5)
    pub resonance: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            filter_type: FilterShape::Lowpass,
            cutoff_low: 500.0,
            cutoff_high: 3000.0,
            resonance: 0.2,
        }
    }
}

impl FilterParams {
    pub fn lowpass(cutoff: f32) -> Self {
        Self {
            filter_type: FilterShape::Lowpass,
            cutoff_high: cutoff,
            ..Default::default()
        }
    }

    pub fn highpass(cutoff: f32) -> Self {
        Self {
            filter_type: FilterShape::Highpass,
            cutoff_low: cutoff,
            ..Default::default()
        }
    }

    pub fn bandpass(low: f32, high: f32) -> Self {
        Self {
            filter_type: FilterShape::Bandpass,
            cutoff_low: low,
            cutoff_high: high,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        domain::positive("filter", "cutoff_low", self.cutoff_low)?;
        domain::positive("filter", "cutoff_high", self.cutoff_high)?;
        domain::unit("filter", "resonance", self.resonance)?;
        if self.filter_type == FilterShape::Bandpass && self.cutoff_low >= self.cutoff_high {
            return Err(AudioChatError::parameter(
                "filter",
                "cutoff_low",
                self.cutoff_low,
                format!("below cutoff_high ({})", self.cutoff_high),
            ));
        }
        Ok(())
    }

    /// Adds the Nyquist check for the cutoffs actually used
    pub fn validate_for_rate(&self, sample_rate: u32) -> Result<()> {
        self.validate()?;
        match self.filter_type {
            FilterShape::Lowpass => {
                domain::below_nyquist("filter", "cutoff_high", self.cutoff_high, sample_rate)
            }
            FilterShape::Highpass => {
                domain::below_nyquist("filter", "cutoff_low", self.cutoff_low, sample_rate)
            }
            FilterShape::Bandpass => {
                domain::below_nyquist("filter", "cutoff_low", self.cutoff_low, sample_rate)?;
                domain::below_nyquist("filter", "cutoff_high", self.cutoff_high, sample_rate)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self.filter_type {
            FilterShape::Lowpass => format!("Applied lowpass filter at {}Hz", self.cutoff_high),
            FilterShape::Highpass => format!("Applied highpass filter at {}Hz", self.cutoff_low),
            FilterShape::Bandpass => format!(
                "Applied bandpass filter from {}Hz to {}Hz",
                self.cutoff_low, self.cutoff_high
            ),
        }
    }

    fn q(&self) -> f64 {
        0.5 + self.resonance as f64
    }
}

/// Apply the filter
pub fn apply_filter(buffer: &AudioBuffer, params: &FilterParams) -> Result<AudioBuffer> {
    params.validate_for_rate(buffer.sample_rate())?;

    let sr = buffer.sample_rate() as f64;
    let q = params.q();
    let stages = match params.filter_type {
        FilterShape::Lowpass => vec![BiquadCoeffs::calculate(
            BiquadType::LowPass,
            sr,
            params.cutoff_high as f64,
            0.0,
            q,
        )],
        FilterShape::Highpass => vec![BiquadCoeffs::calculate(
            BiquadType::HighPass,
            sr,
            params.cutoff_low as f64,
            0.0,
            q,
        )],
        FilterShape::Bandpass => vec![
            BiquadCoeffs::calculate(BiquadType::HighPass, sr, params.cutoff_low as f64, 0.0, q),
            BiquadCoeffs::calculate(BiquadType::LowPass, sr, params.cutoff_high as f64, 0.0, q),
        ],
    };

    buffer.map_channels(|_, ch| filter_channel(ch, &stages))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32) -> AudioBuffer {
        let samples = (0..22050)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
            .collect();
        AudioBuffer::mono(samples, 44100).unwrap()
    }

    #[test]
    fn test_highpass_removes_rumble() {
        let out = apply_filter(&tone(50.0), &FilterParams::highpass(1000.0)).unwrap();
        assert!(out.slice(11025, 22050).rms() < 0.01);
    }

    #[test]
    fn test_bandpass_passes_centre() {
        let input = tone(1200.0);
        let out = apply_filter(&input, &FilterParams::bandpass(500.0, 3000.0)).unwrap();
        let ratio = out.slice(11025, 22050).rms() / input.slice(11025, 22050).rms();
        assert!(ratio > 0.6, "ratio {}", ratio);
    }

    #[test]
    fn test_inverted_band_rejected() {
        assert!(FilterParams::bandpass(3000.0, 500.0).validate().is_err());
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        let err = apply_filter(&tone(100.0), &FilterParams::lowpass(30000.0)).unwrap_err();
        assert_eq!(err.error_code(), "PARAMETER_ERROR");
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            FilterParams::lowpass(1000.0).describe(),
            "Applied lowpass filter at 1000Hz"
        );
    }
}
