//! DSP Effects Library
//!
//! Pure effect functions over `AudioBuffer`, one module per effect family,
//! tied together by the typed `Effect` enum. No effect mutates its input
//! and none produces NaN/Inf for finite input.

pub(crate) mod biquad;
mod chain;
mod compressor;
mod delay;
mod domain;
mod effect;
mod eq;
mod filter;
mod gain;
mod gate;
mod limiter;
mod noise_reduction;
mod pitch;
mod reverb;
mod saturation;
mod separation;
mod stereo;
pub(crate) mod stft;
mod vocal;

pub use chain::{EffectsChain, ProcessingStep, RawEffect};
pub use compressor::CompressionParams;
pub use delay::DelayParams;
pub use effect::{Effect, EffectKind, EffectOutput};
pub use eq::EqParams;
pub use filter::{FilterParams, FilterShape};
pub use gain::{GainParams, NormalizeParams};
pub use gate::GateParams;
pub use limiter::LimiterParams;
pub use noise_reduction::NoiseReductionParams;
pub use pitch::{HarmonizationParams, PitchShiftParams, TimeStretchParams};
pub use reverb::ReverbParams;
pub use saturation::{DistortionMode, DistortionParams};
pub use separation::{SeparationParams, StemLayout};
pub use stereo::StereoWidthParams;
pub use vocal::VocalEnhancementParams;
