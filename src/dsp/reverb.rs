//! Reverb Effect
//!
//! Freeverb: eight parallel damped comb filters feeding four series
//! allpass filters. Deterministic, so repeated runs are bit-identical.

use serde::{Deserialize, Serialize};

use super::domain;
use crate::engine::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Freeverb Constants
// ============================================================================

/// Reference sample rate for the tuning below
const REFERENCE_SAMPLE_RATE: f64 = 44100.0;
/// Comb filter delays at 44100 Hz
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
/// Allpass filter delays at 44100 Hz
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];
/// Extra delay for odd (right) channels
const STEREO_SPREAD: usize = 23;
const ALLPASS_FEEDBACK: f32 = 0.5;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;
/// Input attenuation into the comb bank
const FIXED_GAIN: f32 = 0.015;
/// Wet output scale
const WET_SCALE: f32 = 3.0;

// ============================================================================
// Parameters
// ============================================================================

/// Reverb parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// 0 (small room) to 1 (large hall)
    pub room_size: f32,
    /// 0 (bright) to 1 (dark)
    pub damping: f32,
    #[serde(alias = "wet")]
    pub wet_level: f32,
    #[serde(alias = "dry")]
    pub dry_level: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            wet_level: 0.33,
            dry_level: 0.7,
        }
    }
}

impl ReverbParams {
    pub fn validate(&self) -> Result<()> {
        domain::unit("reverb", "room_size", self.room_size)?;
        domain::unit("reverb", "damping", self.damping)?;
        domain::unit("reverb", "wet_level", self.wet_level)?;
        domain::unit("reverb", "dry_level", self.dry_level)
    }

    pub fn describe(&self) -> String {
        format!(
            "Added reverb: {:.0}% room size, {:.0}% wet signal",
            self.room_size * 100.0,
            self.wet_level * 100.0
        )
    }
}

// ============================================================================
// Filter Components
// ============================================================================

/// Damped comb filter
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_store: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_store = output * (1.0 - damp) + self.filter_store * damp;
        self.buffer[self.pos] = input + self.filter_store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Schroeder allpass
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - input;
        self.buffer[self.pos] = input + delayed * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

fn scaled(delay: usize, sample_rate: u32) -> usize {
    ((delay as f64) * sample_rate as f64 / REFERENCE_SAMPLE_RATE).round() as usize
}

// ============================================================================
// Processing
// ============================================================================

/// Apply reverb
///
/// The comb bank is fed with the mono mix; each output channel gets its
/// own tank (odd channels offset by the stereo spread).
pub fn apply_reverb(buffer: &AudioBuffer, params: &ReverbParams) -> Result<AudioBuffer> {
    params.validate()?;

    let sr = buffer.sample_rate();
    let feedback = params.room_size * ROOM_SCALE + ROOM_OFFSET;
    let damp = params.damping * DAMP_SCALE;
    let wet = params.wet_level * WET_SCALE;
    let mono = buffer.mono_mix();

    buffer.map_channels(|ch_idx, ch| {
        let spread = if ch_idx % 2 == 1 { STEREO_SPREAD } else { 0 };
        let mut combs: Vec<CombFilter> = COMB_DELAYS
            .iter()
            .map(|&d| CombFilter::new(scaled(d + spread, sr)))
            .collect();
        let mut allpasses: Vec<AllpassFilter> = ALLPASS_DELAYS
            .iter()
            .map(|&d| AllpassFilter::new(scaled(d + spread, sr)))
            .collect();

        ch.iter()
            .zip(&mono)
            .map(|(&dry, &m)| {
                let input = m * FIXED_GAIN;
                let mut acc: f32 = combs
                    .iter_mut()
                    .map(|c| c.process(input, feedback, damp))
                    .sum();
                for ap in allpasses.iter_mut() {
                    acc = ap.process(acc);
                }
                dry * params.dry_level + acc * wet
            })
            .collect()
    })
}

// ============================================================================
// Tests
// ============================================================================
