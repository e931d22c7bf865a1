//! Delay / Echo Effect
//!
//! Feedback delay line mixed with the dry signal. Output keeps the input
//! length; echoes past the end are dropped.

use serde::{Deserialize, Serialize};

use super::domain;
use crate::engine::AudioBuffer;
use crate::error::{AudioChatError, Result};

/// Longest accepted delay time
pub const MAX_DELAY_SECS: f32 = 10.0;

/// Delay parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayParams {
    #[serde(alias = "time", alias = "delay_time")]
    pub time_s: f32,
    /// Feedback in [0, 1)
    pub feedback: f32,
    pub mix: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            time_s: 0.25,
            feedback: 0.3,
            mix: 0.3,
        }
    }
}

impl DelayParams {
    pub fn validate(&self) -> Result<()> {
        domain::positive("delay", "time_s", self.time_s)?;
        domain::at_most("delay", "time_s", self.time_s, MAX_DELAY_SECS)?;
        domain::finite("delay", "feedback", self.feedback)?;
        if !(0.0..1.0).contains(&self.feedback) {
            return Err(AudioChatError::parameter(
                "delay",
                "feedback",
                self.feedback,
                "0.0 to below 1.0",
            ));
        }
        domain::unit("delay", "mix", self.mix)
    }

    pub fn describe(&self) -> String {
        format!(
            "Added delay: {:.0}ms delay time, {:.0}% feedback, {:.0}% mix",
            self.time_s * 1000.0,
            self.feedback * 100.0,
            self.mix * 100.0
        )
    }
}

/// Apply the delay
pub fn apply_delay(buffer: &AudioBuffer, params: &DelayParams) -> Result<AudioBuffer> {
    params.validate()?;

    let delay = ((params.time_s * buffer.sample_rate() as f32).round() as usize).max(1);
    let mix = params.mix;

    buffer.map_channels(|_, ch| {
        let mut line = vec![0.0_f32; delay];
        let mut pos = 0;
        ch.iter()
            .map(|&x| {
                let echo = line[pos];
                line[pos] = x + echo * params.feedback;
                pos = (pos + 1) % delay;
                (1.0 - mix) * x + mix * echo
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_impulse_echoes() {
        let mut samples = vec![0.0; 100];
        samples[0] = 1.0;
        let input = AudioBuffer::mono(samples, 100).unwrap();
        let params = DelayParams {
            time_s: 0.1,
            feedback: 0.5,
            mix: 0.5,
        };
        let out = apply_delay(&input, &params).unwrap();
        let ch = out.channel(0);
        assert_relative_eq!(ch[0], 0.5);
        assert_relative_eq!(ch[10], 0.5);
        assert_relative_eq!(ch[20], 0.25);
        assert_relative_eq!(ch[30], 0.125);
        assert_eq!(ch[5], 0.0);
        assert_eq!(out.num_frames(), 100);
    }

    #[test]
    fn test_feedback_must_be_below_one() {
        let params = DelayParams {
            feedback: 1.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
        let params = DelayParams {
            time_s: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            DelayParams::default().describe(),
            "Added delay: 250ms delay time, 30% feedback, 30% mix"
        );
    }
}
