//! Noise Gate Effect
//!
//! Attenuates the signal while its envelope sits below the threshold.

use serde::{Deserialize, Serialize};

use super::compressor::time_to_coeff;
use super::domain;
use crate::engine::buffer::db_to_linear;
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Gate parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateParams {
    #[serde(alias = "threshold")]
    pub threshold_db: f32,
    #[serde(alias = "attack")]
    pub attack_ms: f32,
    #[serde(alias = "release")]
    pub release_ms: f32,
    /// Attenuation while closed
    #[serde(alias = "range")]
    pub range_db: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            attack_ms: 1.0,
            release_ms: 100.0,
            range_db: -80.0,
        }
    }
}

impl GateParams {
    pub fn validate(&self) -> Result<()> {
        domain::at_most("gate", "threshold_db", self.threshold_db, 0.0)?;
        domain::positive("gate", "attack_ms", self.attack_ms)?;
        domain::positive("gate", "release_ms", self.release_ms)?;
        domain::at_most("gate", "range_db", self.range_db, 0.0)
    }

    pub fn describe(&self) -> String {
        format!(
            "Applied noise gate: {}dB threshold, {}dB range",
            self.threshold_db, self.range_db
        )
    }
}

/// Apply the gate
pub fn apply_gate(buffer: &AudioBuffer, params: &GateParams) -> Result<AudioBuffer> {
    params.validate()?;

    let sr = buffer.sample_rate();
    let attack = time_to_coeff(params.attack_ms, sr);
    let release = time_to_coeff(params.release_ms, sr);
    let threshold = db_to_linear(params.threshold_db);
    let floor = db_to_linear(params.range_db);

    let mut envelope = 0.0_f32;
    let mut gain = floor;
    let mut gains = Vec::with_capacity(buffer.num_frames());
    for frame in 0..buffer.num_frames() {
        let level = buffer
            .channels()
            .iter()
            .fold(0.0_f32, |acc, ch| acc.max(ch[frame].abs()));
        // Fast envelope follower on the detector
        let env_coeff = if level > envelope { attack } else { release };
        envelope = env_coeff * envelope + (1.0 - env_coeff) * level;

        let target = if envelope >= threshold { 1.0 } else { floor };
        let coeff = if target > gain { attack } else { release };
        gain = coeff * gain + (1.0 - coeff) * target;
        gains.push(gain);
    }

    buffer.map_channels(|_, ch| ch.iter().zip(&gains).map(|(s, g)| s * g).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_noise_is_gated() {
        let noise: Vec<f32> = (0..8000)
            .map(|i| if i % 2 == 0 { 0.0005 } else { -0.0005 })
            .collect();
        let input = AudioBuffer::mono(noise, 8000).unwrap();
        let out = apply_gate(&input, &GateParams::default()).unwrap();
        assert!(out.rms() < input.rms() * 0.01);
    }

    #[test]
    fn test_loud_signal_passes() {
        let tone: Vec<f32> = (0..8000).map(|i| 0.5 * (i as f32 * 0.1).sin()).collect();
        let input = AudioBuffer::mono(tone, 8000).unwrap();
        let out = apply_gate(&input, &GateParams::default()).unwrap();
        let tail_in = input.slice(4000, 8000).rms();
        let tail_out = out.slice(4000, 8000).rms();
        assert!((tail_in - tail_out).abs() / tail_in < 0.05);
    }
}
