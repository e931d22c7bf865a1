//! Source Separation
//!
//! Spectral-mask separator. Harmonic/percussive split by median filtering,
//! a low-frequency region for bass, and a centre-panned mid band for
//! vocals. Masks are computed once from the mono mix (plus the stereo
//! centre weight) and applied to every channel. They sum to one in every
//! bin, so the stems add back up to the input.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::stft::{Stft, FRAME_SIZE, HOP_SIZE};
use crate::engine::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Median kernel length (frames for harmonic, bins for percussive)
const MEDIAN_KERNEL: usize = 17;
/// Bass region is full weight below this
const BASS_FULL_HZ: f32 = 150.0;
/// Bass weight reaches zero here
const BASS_CUTOFF_HZ: f32 = 300.0;
/// Vocal band
const VOCAL_LOW_HZ: f32 = 250.0;
const VOCAL_HIGH_HZ: f32 = 4000.0;

const EPS: f32 = 1e-10;

// ============================================================================
// Parameters
// ============================================================================

/// Stem layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StemLayout {
    #[default]
    #[serde(rename = "2stems", alias = "2", alias = "two")]
    TwoStems,
    #[serde(rename = "4stems", alias = "4", alias = "four")]
    FourStems,
}

impl StemLayout {
    pub fn stem_names(&self) -> &'static [&'static str] {
        match self {
            StemLayout::TwoStems => &["vocals", "accompaniment"],
            StemLayout::FourStems => &["vocals", "drums", "bass", "other"],
        }
    }
}

impl fmt::Display for StemLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StemLayout::TwoStems => write!(f, "2stems"),
            StemLayout::FourStems => write!(f, "4stems"),
        }
    }
}

/// Separation parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationParams {
    #[serde(alias = "model", alias = "layout")]
    pub stems: StemLayout,
}

impl SeparationParams {
    pub fn validate(&self) -> Result<()> {
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "Separated into {} stems: {}",
            self.stems.stem_names().len(),
            self.stems.stem_names().join(", ")
        )
    }
}

// ============================================================================
// Masks
// ============================================================================

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

/// Median across time for each bin
fn harmonic_enhanced(mag: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let frames = mag.len();
    let bins = mag.first().map_or(0, Vec::len);
    let half = MEDIAN_KERNEL / 2;
    let mut out = vec![vec![0.0; bins]; frames];
    let mut window = Vec::with_capacity(MEDIAN_KERNEL);
    for k in 0..bins {
        for t in 0..frames {
            window.clear();
            let lo = t.saturating_sub(half);
            let hi = (t + half + 1).min(frames);
            window.extend((lo..hi).map(|i| mag[i][k]));
            out[t][k] = median(&mut window);
        }
    }
    out
}

/// Median across frequency for each frame
fn percussive_enhanced(mag: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let half = MEDIAN_KERNEL / 2;
    let mut window = Vec::with_capacity(MEDIAN_KERNEL);
    mag.iter()
        .map(|frame| {
            (0..frame.len())
                .map(|k| {
                    window.clear();
                    let lo = k.saturating_sub(half);
                    let hi = (k + half + 1).min(frame.len());
                    window.extend_from_slice(&frame[lo..hi]);
                    median(&mut window)
                })
                .collect()
        })
        .collect()
}

fn bass_weight(hz: f32) -> f32 {
    if hz <= BASS_FULL_HZ {
        1.0
    } else if hz >= BASS_CUTOFF_HZ {
        0.0
    } else {
        (BASS_CUTOFF_HZ - hz) / (BASS_CUTOFF_HZ - BASS_FULL_HZ)
    }
}

fn in_vocal_band(hz: f32) -> bool {
    (VOCAL_LOW_HZ..=VOCAL_HIGH_HZ).contains(&hz)
}

/// Per-stem masks, `masks[stem][t][k]`, in `StemLayout::stem_names` order
fn build_masks(buffer: &AudioBuffer, stft: &Stft, layout: StemLayout) -> Vec<Vec<Vec<f32>>> {
    let mix = stft.analyze(&buffer.mono_mix());
    let mag: Vec<Vec<f32>> = mix
        .iter()
        .map(|frame| frame.iter().map(|c| c.norm()).collect())
        .collect();

    // 1.0 for centre-panned content, towards 0 for hard-panned
    let centre: Option<Vec<Vec<f32>>> = if buffer.num_channels() >= 2 {
        let left = stft.analyze(buffer.channel(0));
        let right = stft.analyze(buffer.channel(1));
        Some(
            left.iter()
                .zip(&right)
                .map(|(l, r)| {
                    l.iter()
                        .zip(r)
                        .map(|(a, b)| {
                            let denom = a.norm() + b.norm();
                            if denom > EPS {
                                ((a + b).norm() / denom).clamp(0.0, 1.0)
                            } else {
                                1.0
                            }
                        })
                        .collect()
                })
                .collect(),
        )
    } else {
        None
    };

    let harmonic = harmonic_enhanced(&mag);
    let percussive = percussive_enhanced(&mag);
    let sr = buffer.sample_rate();

    let stems = layout.stem_names().len();
    let mut masks = vec![Vec::with_capacity(mag.len()); stems];
    for t in 0..mag.len() {
        let mut rows = vec![Vec::with_capacity(stft.bins()); stems];
        for k in 0..stft.bins() {
            let hz = stft.bin_hz(k, sr);
            let h = harmonic[t][k] * harmonic[t][k];
            let p = percussive[t][k] * percussive[t][k];
            let perc = if h + p > EPS { p / (h + p) } else { 0.0 };
            let bass = bass_weight(hz);
            let c = centre.as_ref().map_or(1.0, |c| c[t][k]);
            let band = if in_vocal_band(hz) { 1.0 } else { 0.0 };

            let vocals = (1.0 - perc) * (1.0 - bass) * band * c;
            match layout {
                StemLayout::TwoStems => {
                    rows[0].push(vocals);
                    rows[1].push(1.0 - vocals);
                }
                StemLayout::FourStems => {
                    let drums = perc;
                    let bass_mask = (1.0 - perc) * bass;
                    rows[0].push(vocals);
                    rows[1].push(drums);
                    rows[2].push(bass_mask);
                    rows[3].push((1.0 - drums - bass_mask - vocals).max(0.0));
                }
            }
        }
        for (mask, row) in masks.iter_mut().zip(rows) {
            mask.push(row);
        }
    }
    masks
}

/// Split `buffer` into stems keyed by stem name
pub fn separate(
    buffer: &AudioBuffer,
    params: &SeparationParams,
) -> Result<BTreeMap<String, AudioBuffer>> {
    params.validate()?;
    let stft = Stft::new(FRAME_SIZE, HOP_SIZE);
    let masks = build_masks(buffer, &stft, params.stems);
    let spectra: Vec<_> = buffer.channels().iter().map(|ch| stft.analyze(ch)).collect();

    let mut stems = BTreeMap::new();
    for (name, mask) in params.stems.stem_names().iter().zip(&masks) {
        let channels = spectra
            .iter()
            .map(|spec| {
                let masked: Vec<_> = spec
                    .iter()
                    .zip(mask)
                    .map(|(frame, m)| frame.iter().zip(m).map(|(c, &g)| *c * g).collect())
                    .collect();
                stft.synthesize(&masked, buffer.num_frames())
            })
            .collect();
        stems.insert(name.to_string(), buffer.with_channels(channels)?);
    }
    Ok(stems)
}

// ============================================================================
// Tests
// ============================================================================
