//! Short-time Fourier transform
//!
//! Hann-windowed STFT with weighted overlap-add resynthesis. Shared by the
//! analyzer, noise reduction and source separation.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Default analysis frame
pub const FRAME_SIZE: usize = 2048;
/// Default hop (75% overlap)
pub const HOP_SIZE: usize = 512;

/// Periodic Hann window
pub fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos())
        .collect()
}

/// Spectrogram: `frames[t][k]` for bins `0..=frame/2`
pub type Spectrogram = Vec<Vec<Complex<f32>>>;

/// Planned forward/inverse transforms for one frame size
pub struct Stft {
    frame: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(frame: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            frame,
            hop,
            window: hann(frame),
            forward: planner.plan_fft_forward(frame),
            inverse: planner.plan_fft_inverse(frame),
        }
    }

    /// Number of bins per frame
    pub fn bins(&self) -> usize {
        self.frame / 2 + 1
    }

    /// Frequency of a bin in Hz
    pub fn bin_hz(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.frame as f32
    }

    /// Signal padded by half a frame on the left and enough on the right
    /// for the last hop to be covered
    fn pad(&self, samples: &[f32]) -> Vec<f32> {
        let half = self.frame / 2;
        let mut padded = vec![0.0; half];
        padded.extend_from_slice(samples);
        padded.resize(padded.len() + half + self.hop, 0.0);
        padded
    }

    /// Forward transform
    pub fn analyze(&self, samples: &[f32]) -> Spectrogram {
        let padded = self.pad(samples);
        let bins = self.bins();
        let mut frames = Vec::new();
        let mut start = 0;
        while start + self.frame <= padded.len() {
            let mut buf: Vec<Complex<f32>> = padded[start..start + self.frame]
                .iter()
                .zip(&self.window)
                .map(|(&s, &w)| Complex::new(s * w, 0.0))
                .collect();
            self.forward.process(&mut buf);
            buf.truncate(bins);
            frames.push(buf);
            start += self.hop;
        }
        frames
    }

    /// Inverse transform back to `len` samples
    pub fn synthesize(&self, frames: &[Vec<Complex<f32>>], len: usize) -> Vec<f32> {
        let half = self.frame / 2;
        let total = half + len + half + self.hop + self.frame;
        let mut out = vec![0.0_f32; total];
        let mut norm = vec![0.0_f32; total];
        let scale = 1.0 / self.frame as f32;

        let mut full = vec![Complex::new(0.0, 0.0); self.frame];
        for (t, spectrum) in frames.iter().enumerate() {
            full[..spectrum.len()].copy_from_slice(spectrum);
            for k in 1..half {
                full[self.frame - k] = spectrum[k].conj();
            }
            self.inverse.process(&mut full);

            let start = t * self.hop;
            for i in 0..self.frame {
                let w = self.window[i];
                out[start + i] += full[i].re * scale * w;
                norm[start + i] += w * w;
            }
        }

        out[half..half + len]
            .iter()
            .zip(&norm[half..half + len])
            .map(|(&s, &n)| if n > 1e-6 { s / n } else { 0.0 })
            .collect()
    }
}

/// Value at the given quantile (0..=1) of an unsorted slice
pub fn quantile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f32 * q.clamp(0.0, 1.0)).round() as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_resynthesis() {
        let samples: Vec<f32> = (0..10_000)
            .map(|i| (i as f32 * 0.013).sin() * 0.7 + (i as f32 * 0.31).cos() * 0.1)
            .collect();
        let stft = Stft::new(FRAME_SIZE, HOP_SIZE);
        let spec = stft.analyze(&samples);
        let back = stft.synthesize(&spec, samples.len());
        assert_eq!(back.len(), samples.len());
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_short_signal() {
        let samples = vec![0.5, -0.5, 0.25];
        let stft = Stft::new(256, 64);
        let back = stft.synthesize(&stft.analyze(&samples), 3);
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_quantile() {
        let v = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(quantile(&v, 0.0), 1.0);
        assert_eq!(quantile(&v, 0.5), 3.0);
        assert_eq!(quantile(&v, 1.0), 5.0);
        assert_eq!(quantile(&[], 0.5), 0.0);
    }
}
