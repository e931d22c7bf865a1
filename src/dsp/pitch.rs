//! Pitch and Time Effects
//!
//! Overlap-add time stretching, and pitch shifting built from a stretch
//! followed by resampling back to the original length. Harmonization
//! layers pitch-shifted copies over the dry signal.

use serde::{Deserialize, Serialize};

use super::domain;
use super::stft::hann;
use crate::engine::AudioBuffer;
use crate::error::{AudioChatError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Grain length for overlap-add
const GRAIN: usize = 1024;
/// Synthesis hop (75% overlap)
const SYNTH_HOP: usize = GRAIN / 4;
/// Most voices a harmonizer may add
pub const MAX_HARMONY_VOICES: usize = 4;
/// Widest harmony interval in semitones
pub const MAX_HARMONY_INTERVAL: f32 = 24.0;
/// Accepted time-stretch rates
const MIN_RATE: f32 = 0.25;
const MAX_RATE: f32 = 4.0;

// ============================================================================
// Helper Functions
// ============================================================================

/// Lazily evaluated overlap-add stretch of a signal
///
/// Grain `k` is read from `k * analysis_hop` in the input and written at
/// `k * SYNTH_HOP` in the output. Samples are computed on demand, so
/// extreme ratios never allocate the full stretched signal.
struct OlaReader<'a> {
    x: &'a [f32],
    window: Vec<f32>,
    analysis_hop: f64,
}

impl<'a> OlaReader<'a> {
    /// `factor` is output length over input length
    fn new(x: &'a [f32], factor: f64) -> Self {
        Self {
            x,
            window: hann(GRAIN),
            analysis_hop: SYNTH_HOP as f64 / factor,
        }
    }

    fn sample(&self, j: usize) -> f32 {
        let first = (j.saturating_add(1).saturating_sub(GRAIN) + SYNTH_HOP - 1) / SYNTH_HOP;
        let last = j / SYNTH_HOP;
        let mut acc = 0.0_f32;
        let mut norm = 0.0_f32;
        for k in first..=last {
            let offset = j - k * SYNTH_HOP;
            if offset >= GRAIN {
                continue;
            }
            let w = self.window[offset];
            let in_pos = (k as f64 * self.analysis_hop).round();
            let s = if in_pos < self.x.len() as f64 {
                self.x.get(in_pos as usize + offset).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            acc += s * w;
            norm += w;
        }
        if norm > 1e-3 {
            acc / norm
        } else {
            acc
        }
    }
}

/// Stretch `x` so the result is `factor` times as long, keeping pitch
pub(crate) fn ola_stretch(x: &[f32], factor: f64) -> Vec<f32> {
    let out_len = (x.len() as f64 * factor).round() as usize;
    if x.is_empty() {
        return Vec::new();
    }
    let reader = OlaReader::new(x, factor);
    (0..out_len).map(|j| reader.sample(j)).collect()
}

/// Shift pitch by `semitones` keeping the length
///
/// Equivalent to stretching by the pitch ratio and resampling back to the
/// input length, evaluated only at the positions the resampler reads.
pub(crate) fn shift_channel(x: &[f32], semitones: f32) -> Vec<f32> {
    if semitones == 0.0 || x.is_empty() {
        return x.to_vec();
    }
    let ratio = 2.0_f64.powf(semitones as f64 / 12.0);
    let reader = OlaReader::new(x, ratio);
    (0..x.len())
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor();
            let frac = (pos - idx) as f32;
            let j = idx as usize;
            let a = reader.sample(j);
            let b = reader.sample(j.saturating_add(1));
            a + (b - a) * frac
        })
        .collect()
}

// ============================================================================
// Pitch Shift
// ============================================================================

/// Pitch shift parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchShiftParams {
    #[serde(alias = "steps", alias = "n_steps", alias = "semitone")]
    pub semitones: f32,
}

impl PitchShiftParams {
    pub fn validate(&self) -> Result<()> {
        domain::finite("pitch_shift", "semitones", self.semitones)
    }

    pub fn describe(&self) -> String {
        let direction = if self.semitones >= 0.0 { "up" } else { "down" };
        format!(
            "Shifted pitch {} by {} semitones",
            direction,
            self.semitones.abs()
        )
    }
}

/// Apply the pitch shift
pub fn apply_pitch_shift(buffer: &AudioBuffer, params: &PitchShiftParams) -> Result<AudioBuffer> {
    params.validate()?;
    buffer.map_channels(|_, ch| shift_channel(ch, params.semitones))
}

// ============================================================================
// Time Stretch
// ============================================================================

/// Time stretch parameters; the output keeps the input length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeStretchParams {
    /// > 1 plays faster, < 1 slower
    #[serde(alias = "speed", alias = "stretch_factor")]
    pub rate: f32,
}

impl Default for TimeStretchParams {
    fn default() -> Self {
        Self { rate: 1.0 }
    }
}

impl TimeStretchParams {
    pub fn validate(&self) -> Result<()> {
        domain::range("time_stretch", "rate", self.rate, MIN_RATE, MAX_RATE)
    }

    pub fn describe(&self) -> String {
        if self.rate > 1.0 {
            format!("Sped up by {:.0}%", (self.rate - 1.0) * 100.0)
        } else if self.rate < 1.0 {
            format!("Slowed down by {:.0}%", (1.0 - self.rate) * 100.0)
        } else {
            "Kept original speed".to_string()
        }
    }
}

/// Apply the stretch, truncating or zero-padding back to the input length
pub fn apply_time_stretch(buffer: &AudioBuffer, params: &TimeStretchParams) -> Result<AudioBuffer> {
    params.validate()?;
    if params.rate == 1.0 {
        return Ok(buffer.clone());
    }
    buffer.map_channels(|_, ch| {
        let mut stretched = ola_stretch(ch, 1.0 / params.rate as f64);
        stretched.resize(ch.len(), 0.0);
        stretched
    })
}

// ============================================================================
// Harmonization
// ============================================================================

/// Harmonizer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonizationParams {
    /// Voice offsets in semitones
    #[serde(alias = "voices", alias = "harmony_intervals")]
    pub intervals: Vec<f32>,
    pub mix: f32,
}

impl Default for HarmonizationParams {
    fn default() -> Self {
        Self {
            intervals: vec![4.0, 7.0],
            mix: 0.5,
        }
    }
}

impl HarmonizationParams {
    pub fn validate(&self) -> Result<()> {
        if self.intervals.is_empty() || self.intervals.len() > MAX_HARMONY_VOICES {
            return Err(AudioChatError::parameter(
                "harmonization",
                "intervals",
                format!("{} voices", self.intervals.len()),
                format!("1 to {} voices", MAX_HARMONY_VOICES),
            ));
        }
        for interval in &self.intervals {
            domain::range(
                "harmonization",
                "intervals",
                *interval,
                -MAX_HARMONY_INTERVAL,
                MAX_HARMONY_INTERVAL,
            )?;
        }
        domain::unit("harmonization", "mix", self.mix)
    }

    pub fn describe(&self) -> String {
        let voices: Vec<String> = self
            .intervals
            .iter()
            .map(|i| format!("{:+}", i))
            .collect();
        format!(
            "Added harmony voices at {} semitones ({:.0}% mix)",
            voices.join(", "),
            self.mix * 100.0
        )
    }
}

/// Layer shifted voices: `wet = (dry + voices) / (n + 1)`
pub fn apply_harmonization(
    buffer: &AudioBuffer,
    params: &HarmonizationParams,
) -> Result<AudioBuffer> {
    params.validate()?;
    let voices = params.intervals.len() as f32 + 1.0;
    buffer.map_channels(|_, ch| {
        let mut wet = ch.to_vec();
        for &interval in &params.intervals {
            for (w, v) in wet.iter_mut().zip(shift_channel(ch, interval)) {
                *w += v;
            }
        }
        ch.iter()
            .zip(wet)
            .map(|(&dry, w)| (1.0 - params.mix) * dry + params.mix * w / voices)
            .collect()
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sr: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    /// Zero crossings per second, a cheap frequency estimate
    fn crossings_hz(x: &[f32], sr: u32) -> f32 {
        let crossings = x
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        crossings as f32 / 2.0 / (x.len() as f32 / sr as f32)
    }

    #[test]
    fn test_octave_up_doubles_frequency() {
        let sr = 16000;
        // 125 Hz keeps grains phase-aligned (period = analysis hop)
        let input = AudioBuffer::mono(tone(125.0, sr, 16000), sr).unwrap();
        let out = apply_pitch_shift(&input, &PitchShiftParams { semitones: 12.0 }).unwrap();
        assert_eq!(out.num_frames(), input.num_frames());
        let hz = crossings_hz(&out.channel(0)[2000..14000], sr);
        assert!((hz - 250.0).abs() < 25.0, "estimated {} Hz", hz);
    }

    #[test]
    fn test_zero_shift_identity() {
        let input = AudioBuffer::mono(tone(300.0, 8000, 4000), 8000).unwrap();
        let out = apply_pitch_shift(&input, &PitchShiftParams { semitones: 0.0 }).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_stretch_lengths() {
        let x = tone(100.0, 8000, 8000);
        assert_eq!(ola_stretch(&x, 2.0).len(), 16000);
        assert_eq!(ola_stretch(&x, 0.5).len(), 4000);
    }

    #[test]
    fn test_time_stretch_keeps_length() {
        let input = AudioBuffer::mono(tone(100.0, 8000, 8000), 8000).unwrap();
        let fast = apply_time_stretch(&input, &TimeStretchParams { rate: 2.0 }).unwrap();
        assert_eq!(fast.num_frames(), 8000);
        // Second half is padding after a 2x speed-up
        assert!(fast.slice(4100, 8000).peak() < 1e-6);
    }

    #[test]
    fn test_harmonization_validation() {
        let params = HarmonizationParams {
            intervals: vec![],
            mix: 0.5,
        };
        assert!(params.validate().is_err());
        let params = HarmonizationParams {
            intervals: vec![3.0, 30.0],
            mix: 0.5,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_harmonization_bounded() {
        let input = AudioBuffer::mono(tone(220.0, 8000, 8000), 8000).unwrap();
        let out = apply_harmonization(&input, &HarmonizationParams::default()).unwrap();
        assert!(out.peak() <= 0.5 + 1e-3);
        assert!(out.is_finite());
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            PitchShiftParams { semitones: 2.0 }.describe(),
            "Shifted pitch up by 2 semitones"
        );
        assert_eq!(
            PitchShiftParams { semitones: -3.5 }.describe(),
            "Shifted pitch down by 3.5 semitones"
        );
    }
}
