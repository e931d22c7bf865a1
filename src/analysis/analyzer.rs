//! Audio Analyzer
//!
//! Scalar features of a buffer: levels, spectral shape, noise floor,
//! estimated key and tempo, and a clipping flag. Everything is computed on
//! the mono mix except clipping, which looks at every channel.

use serde::{Deserialize, Serialize};

use crate::dsp::stft::{quantile, Stft, FRAME_SIZE, HOP_SIZE};
use crate::engine::buffer::linear_to_db;
use crate::engine::AudioBuffer;
use crate::error::{AudioChatError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Magnitude counted as full scale
const FULL_SCALE: f32 = 0.999;
/// Share of spectral energy below the rolloff frequency
const ROLLOFF_SHARE: f32 = 0.85;
/// Frames quieter than this carry no spectral information
const SILENT_FRAME_ENERGY: f32 = 1e-10;

const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;
const BPM_STEP: f32 = 0.5;
/// Centre of the tempo prior
const PRIOR_BPM: f32 = 120.0;

/// Pitch range used for chroma
const CHROMA_MIN_HZ: f32 = 55.0;
const CHROMA_MAX_HZ: f32 = 5000.0;

const KEYS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds for the derived flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// RMS below this is "too quiet"
    pub quiet_rms_threshold: f32,
    /// Noise floor above this asks for noise reduction
    pub noise_floor_threshold: f32,
    /// Share of full-scale samples above which the file is clipping
    pub clip_ratio_threshold: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            quiet_rms_threshold: 0.05,
            noise_floor_threshold: 0.01,
            clip_ratio_threshold: 0.001,
        }
    }
}

// ============================================================================
// Result
// ============================================================================

/// Analysis of one buffer. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: usize,
    /// 0..=1
    pub peak_level: f32,
    /// 0..=1
    pub rms_level: f32,
    /// peak / rms, 0 for silence
    pub crest_factor: f32,
    pub spectral_centroid_hz: f32,
    pub spectral_rolloff_hz: f32,
    /// 5th percentile of sample magnitude
    pub noise_floor: f32,
    /// Pitch class name, or "unknown" for silence
    pub estimated_key: String,
    /// 0 when no pulse is found
    pub estimated_tempo_bpm: f32,
    /// Share of samples at full scale
    pub clip_ratio: f32,
    pub is_clipping: bool,
    pub is_too_quiet: bool,
}

impl AnalysisResult {
    pub fn peak_db(&self) -> f32 {
        linear_to_db(self.peak_level)
    }

    pub fn rms_db(&self) -> f32 {
        linear_to_db(self.rms_level)
    }

    /// Get character description (bright/dark)
    pub fn character(&self) -> &'static str {
        if self.spectral_centroid_hz > 4000.0 {
            "bright"
        } else if self.spectral_centroid_hz > 0.0 && self.spectral_centroid_hz < 1500.0 {
            "dark/warm"
        } else {
            "balanced"
        }
    }

    /// Short human-readable summary of issues
    pub fn summary(&self) -> String {
        let mut issues = Vec::new();
        if self.is_clipping {
            issues.push(format!(
                "Clipping: {:.2}% of samples at full scale",
                self.clip_ratio * 100.0
            ));
        }
        if self.is_too_quiet {
            issues.push(format!("Quiet: {:.1} dBFS RMS", self.rms_db()));
        }
        let character = self.character();
        if character != "balanced" {
            issues.push(format!("{} character", character));
        }
        if issues.is_empty() {
            "Audio appears healthy".to_string()
        } else {
            issues.join("; ")
        }
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Deterministic, side-effect free feature extractor
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze a buffer
    ///
    /// # Errors
    /// `Analysis` for an empty buffer or one containing NaN/Inf.
    pub fn analyze(&self, buffer: &AudioBuffer) -> Result<AnalysisResult> {
        if buffer.is_empty() {
            return Err(AudioChatError::Analysis {
                reason: "buffer has no samples".to_string(),
            });
        }
        if !buffer.is_finite() {
            return Err(AudioChatError::Analysis {
                reason: "buffer contains NaN or infinite samples".to_string(),
            });
        }

        let mono = buffer.mono_mix();
        let sr = buffer.sample_rate();

        let peak = mono.iter().fold(0.0_f32, |m, s| m.max(s.abs())).min(1.0);
        let rms = ((mono.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / mono.len() as f64)
            .sqrt() as f32)
            .min(1.0);
        let crest = if rms > 0.0 { peak / rms } else { 0.0 };

        let magnitudes: Vec<f32> = mono.iter().map(|s| s.abs()).collect();
        let noise_floor = quantile(&magnitudes, 0.05).min(1.0);

        let total = buffer.num_channels() * buffer.num_frames();
        let clipped = buffer
            .channels()
            .iter()
            .flatten()
            .filter(|s| s.abs() >= FULL_SCALE)
            .count();
        let clip_ratio = clipped as f32 / total as f32;

        let stft = Stft::new(FRAME_SIZE, HOP_SIZE);
        let spectrum: Vec<Vec<f32>> = stft
            .analyze(&mono)
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect();
        let (centroid, rolloff) = spectral_shape(&spectrum, &stft, sr);
        let key = estimate_key(&spectrum, &stft, sr);
        let tempo = estimate_tempo(&spectrum, sr as f32 / HOP_SIZE as f32);

        Ok(AnalysisResult {
            duration_secs: buffer.duration_secs(),
            sample_rate: sr,
            channels: buffer.num_channels(),
            peak_level: peak,
            rms_level: rms,
            crest_factor: crest,
            spectral_centroid_hz: centroid,
            spectral_rolloff_hz: rolloff,
            noise_floor,
            estimated_key: key,
            estimated_tempo_bpm: tempo,
            clip_ratio,
            is_clipping: clip_ratio > self.config.clip_ratio_threshold,
            is_too_quiet: rms < self.config.quiet_rms_threshold,
        })
    }
}

// ============================================================================
// Spectral Features
// ============================================================================

/// Mean centroid and rolloff over frames that carry energy
fn spectral_shape(spectrum: &[Vec<f32>], stft: &Stft, sr: u32) -> (f32, f32) {
    let mut centroid_sum = 0.0_f64;
    let mut rolloff_sum = 0.0_f64;
    let mut frames = 0usize;

    for frame in spectrum {
        let energy: f32 = frame.iter().map(|m| m * m).sum();
        let magnitude: f32 = frame.iter().sum();
        if energy <= SILENT_FRAME_ENERGY || magnitude <= 0.0 {
            continue;
        }

        let weighted: f32 = frame
            .iter()
            .enumerate()
            .map(|(k, m)| stft.bin_hz(k, sr) * m)
            .sum();
        centroid_sum += (weighted / magnitude) as f64;

        let target = energy * ROLLOFF_SHARE;
        let mut cumulative = 0.0;
        let mut rolloff_bin = frame.len() - 1;
        for (k, m) in frame.iter().enumerate() {
            cumulative += m * m;
            if cumulative >= target {
                rolloff_bin = k;
                break;
            }
        }
        rolloff_sum += stft.bin_hz(rolloff_bin, sr) as f64;
        frames += 1;
    }

    if frames == 0 {
        (0.0, 0.0)
    } else {
        (
            (centroid_sum / frames as f64) as f32,
            (rolloff_sum / frames as f64) as f32,
        )
    }
}

/// Strongest pitch class of the summed chroma
fn estimate_key(spectrum: &[Vec<f32>], stft: &Stft, sr: u32) -> String {
    let mut chroma = [0.0_f64; 12];
    for frame in spectrum {
        for (k, m) in frame.iter().enumerate().skip(1) {
            let hz = stft.bin_hz(k, sr);
            if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&hz) {
                continue;
            }
            // A4 = 440 Hz is pitch class 9
            let semitones = (12.0 * (hz / 440.0).log2()).round() as i32 + 9;
            chroma[semitones.rem_euclid(12) as usize] += (m * m) as f64;
        }
    }

    let (best, energy) = chroma
        .iter()
        .enumerate()
        .fold((0, 0.0), |(bi, be), (i, &e)| if e > be { (i, e) } else { (bi, be) });
    if energy <= 0.0 {
        "unknown".to_string()
    } else {
        KEYS[best].to_string()
    }
}

/// Tempo from the autocorrelation of the spectral-flux onset envelope
///
/// Candidate tempi are weighted by a log-normal prior around 120 BPM so
/// that half- and double-time peaks lose to the beat level.
fn estimate_tempo(spectrum: &[Vec<f32>], frame_rate: f32) -> f32 {
    if spectrum.len() < 2 {
        return 0.0;
    }
    let mut envelope: Vec<f32> = spectrum
        .windows(2)
        .map(|w| {
            w[1].iter()
                .zip(&w[0])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum()
        })
        .collect();

    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    for e in envelope.iter_mut() {
        *e -= mean;
    }
    let energy: f32 = envelope.iter().map(|e| e * e).sum();
    let max_lag = 60.0 * frame_rate / MIN_BPM;
    if energy <= SILENT_FRAME_ENERGY || (envelope.len() as f32) < 2.0 * max_lag {
        return 0.0;
    }

    let sample = |pos: f32| -> f32 {
        let i = pos.floor() as usize;
        let frac = pos - i as f32;
        let a = envelope.get(i).copied().unwrap_or(0.0);
        let b = envelope.get(i + 1).copied().unwrap_or(0.0);
        a + (b - a) * frac
    };

    let mut best = (0.0_f32, f32::MIN);
    let mut bpm = MIN_BPM;
    while bpm <= MAX_BPM {
        let lag = 60.0 * frame_rate / bpm;
        let n = envelope.len() - lag.ceil() as usize;
        let corr: f32 = (0..n).map(|t| envelope[t] * sample(t as f32 + lag)).sum::<f32>() / n as f32;
        let octaves = (bpm / PRIOR_BPM).log2();
        let score = corr * (-0.5 * octaves * octaves).exp();
        if score > best.1 {
            best = (bpm, score);
        }
        bpm += BPM_STEP;
    }

    if best.1 <= 0.0 {
        0.0
    } else {
        best.0
    }
}

// ============================================================================
// Tests
// ============================================================================
