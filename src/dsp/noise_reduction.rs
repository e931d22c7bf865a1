//! Noise Reduction Effect
//!
//! Spectral gating. A per-bin noise profile is estimated from the quietest
//! frames of the whole file, then each bin is attenuated by
//! `max(0, 1 - noise / magnitude) ^ strength`. The profile needs the whole
//! file, so this effect never runs chunked.

use serde::{Deserialize, Serialize};

use super::domain;
use super::stft::{Stft, FRAME_SIZE, HOP_SIZE};
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Share of frames used for the noise profile at sensitivity 0
const MIN_PROFILE_SHARE: f32 = 0.05;
/// Additional share at sensitivity 1
const PROFILE_SHARE_RANGE: f32 = 0.25;

/// Noise reduction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReductionParams {
    #[serde(alias = "amount", alias = "reduction")]
    pub strength: f32,
    pub sensitivity: f32,
}

impl Default for NoiseReductionParams {
    fn default() -> Self {
        Self {
            strength: 0.5,
            sensitivity: 0.5,
        }
    }
}

impl NoiseReductionParams {
    pub fn validate(&self) -> Result<()> {
        domain::unit("noise_reduction", "strength", self.strength)?;
        domain::unit("noise_reduction", "sensitivity", self.sensitivity)
    }

    pub fn describe(&self) -> String {
        format!(
            "Applied noise reduction: {:.0}% strength",
            self.strength * 100.0
        )
    }
}

/// Apply spectral gating to every channel
pub fn apply_noise_reduction(
    buffer: &AudioBuffer,
    params: &NoiseReductionParams,
) -> Result<AudioBuffer> {
    params.validate()?;
    if params.strength == 0.0 {
        return Ok(buffer.clone());
    }

    let stft = Stft::new(FRAME_SIZE, HOP_SIZE);
    let share = MIN_PROFILE_SHARE + PROFILE_SHARE_RANGE * params.sensitivity;

    buffer.map_channels(|_, ch| {
        let mut spec = stft.analyze(ch);
        if spec.is_empty() {
            return ch.to_vec();
        }

        // Quietest frames by energy form the profile
        let mut order: Vec<(usize, f32)> = spec
            .iter()
            .enumerate()
            .map(|(t, frame)| (t, frame.iter().map(|c| c.norm_sqr()).sum::<f32>()))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let take = ((order.len() as f32 * share).ceil() as usize).clamp(1, order.len());

        let bins = stft.bins();
        let mut profile = vec![0.0_f32; bins];
        for &(t, _) in order.iter().take(take) {
            for (p, c) in profile.iter_mut().zip(&spec[t]) {
                *p += c.norm();
            }
        }
        for p in profile.iter_mut() {
            *p /= take as f32;
        }

        for frame in spec.iter_mut() {
            for (c, &noise) in frame.iter_mut().zip(&profile) {
                let mag = c.norm();
                let gain = if mag > 0.0 {
                    (1.0 - noise / mag).max(0.0).powf(params.strength)
                } else {
                    0.0
                };
                *c *= gain;
            }
        }

        stft.synthesize(&spec, ch.len())
    })
}
