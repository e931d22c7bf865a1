//! Audio Analysis
//!
//! Feature extraction for the instruction processor and the caller, plus
//! the waveform preview used for drawing.

mod analyzer;
mod waveform;

pub use analyzer::{AnalysisConfig, AnalysisResult, Analyzer};
pub use waveform::{WaveformPreview, DEFAULT_WAVEFORM_POINTS};
