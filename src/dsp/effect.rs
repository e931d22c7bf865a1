//! Effect definitions
//!
//! `Effect` is the closed set of operations a chain may contain, each
//! carrying its typed parameters. `EffectKind` is the field-less tag with
//! the static metadata the executor and chunk processor consult.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::compressor::{apply_compression, CompressionParams};
use super::delay::{apply_delay, DelayParams};
use super::eq::{apply_eq, EqParams};
use super::filter::{apply_filter, FilterParams};
use super::gain::{apply_gain, apply_normalize, GainParams, NormalizeParams};
use super::gate::{apply_gate, GateParams};
use super::limiter::{apply_limiter, LimiterParams};
use super::noise_reduction::{apply_noise_reduction, NoiseReductionParams};
use super::pitch::{
    apply_harmonization, apply_pitch_shift, apply_time_stretch, HarmonizationParams,
    PitchShiftParams, TimeStretchParams,
};
use super::reverb::{apply_reverb, ReverbParams};
use super::saturation::{apply_distortion, DistortionParams};
use super::separation::{separate, SeparationParams};
use super::stereo::{apply_stereo_width, StereoWidthParams};
use super::vocal::{apply_vocal_enhancement, VocalEnhancementParams};
use crate::engine::AudioBuffer;
use crate::error::{AudioChatError, Result};

// ============================================================================
// Effect Kind
// ============================================================================

/// Registered effect types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Gain,
    Eq,
    Compression,
    Reverb,
    Delay,
    NoiseReduction,
    PitchShift,
    TimeStretch,
    StereoWidth,
    Distortion,
    Filter,
    Limiter,
    Gate,
    Normalize,
    VocalEnhancement,
    Harmonization,
    SourceSeparation,
}

impl EffectKind {
    pub const ALL: [EffectKind; 17] = [
        EffectKind::Gain,
        EffectKind::Eq,
        EffectKind::Compression,
        EffectKind::Reverb,
        EffectKind::Delay,
        EffectKind::NoiseReduction,
        EffectKind::PitchShift,
        EffectKind::TimeStretch,
        EffectKind::StereoWidth,
        EffectKind::Distortion,
        EffectKind::Filter,
        EffectKind::Limiter,
        EffectKind::Gate,
        EffectKind::Normalize,
        EffectKind::VocalEnhancement,
        EffectKind::Harmonization,
        EffectKind::SourceSeparation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectKind::Gain => "gain",
            EffectKind::Eq => "eq",
            EffectKind::Compression => "compression",
            EffectKind::Reverb => "reverb",
            EffectKind::Delay => "delay",
            EffectKind::NoiseReduction => "noise_reduction",
            EffectKind::PitchShift => "pitch_shift",
            EffectKind::TimeStretch => "time_stretch",
            EffectKind::StereoWidth => "stereo_width",
            EffectKind::Distortion => "distortion",
            EffectKind::Filter => "filter",
            EffectKind::Limiter => "limiter",
            EffectKind::Gate => "gate",
            EffectKind::Normalize => "normalize",
            EffectKind::VocalEnhancement => "vocal_enhancement",
            EffectKind::Harmonization => "harmonization",
            EffectKind::SourceSeparation => "source_separation",
        }
    }

    /// Parse a type name, accepting the spellings language models tend to use
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "gain" | "volume" => EffectKind::Gain,
            "eq" | "equalizer" | "equaliser" | "equalization" | "three_band_eq" => EffectKind::Eq,
            "compression" | "compressor" => EffectKind::Compression,
            "reverb" | "reverberation" => EffectKind::Reverb,
            "delay" | "echo" => EffectKind::Delay,
            "noise_reduction" | "denoise" | "noise_removal" | "noise_suppression" => {
                EffectKind::NoiseReduction
            }
            "pitch_shift" | "pitch" | "pitch_shifting" => EffectKind::PitchShift,
            "time_stretch" | "stretch" | "time_stretching" | "speed" => EffectKind::TimeStretch,
            "stereo_width" | "stereo" | "width" | "stereo_widener" | "stereo_widening" => {
                EffectKind::StereoWidth
            }
            "distortion" | "saturation" | "overdrive" => EffectKind::Distortion,
            "filter" => EffectKind::Filter,
            "limiter" | "limiting" => EffectKind::Limiter,
            "gate" | "noise_gate" => EffectKind::Gate,
            "normalize" | "normalise" | "normalization" | "normalisation" => EffectKind::Normalize,
            "vocal_enhancement" | "vocal_enhance" | "enhance_vocals" | "vocal_enhancer" => {
                EffectKind::VocalEnhancement
            }
            "harmonization" | "harmonize" | "harmonizer" | "harmony" => EffectKind::Harmonization,
            "source_separation" | "separation" | "stem_separation" | "stems" => {
                EffectKind::SourceSeparation
            }
            _ => return None,
        };
        Some(kind)
    }

    /// Whether the effect gives the same result on overlapping chunks as
    /// on the whole buffer
    pub fn is_chunkable(&self) -> bool {
        !matches!(
            self,
            EffectKind::NoiseReduction
                | EffectKind::TimeStretch
                | EffectKind::Normalize
                | EffectKind::SourceSeparation
        )
    }

    /// Terminal effects must be the last element of a chain
    pub fn is_terminal(&self) -> bool {
        matches!(self, EffectKind::SourceSeparation)
    }

    /// The effect with default parameters
    pub fn default_effect(&self) -> Effect {
        match self {
            EffectKind::Gain => Effect::Gain(GainParams::default()),
            EffectKind::Eq => Effect::Eq(EqParams::default()),
            EffectKind::Compression => Effect::Compression(CompressionParams::default()),
            EffectKind::Reverb => Effect::Reverb(ReverbParams::default()),
            EffectKind::Delay => Effect::Delay(DelayParams::default()),
            EffectKind::NoiseReduction => Effect::NoiseReduction(NoiseReductionParams::default()),
            EffectKind::PitchShift => Effect::PitchShift(PitchShiftParams::default()),
            EffectKind::TimeStretch => Effect::TimeStretch(TimeStretchParams::default()),
            EffectKind::StereoWidth => Effect::StereoWidth(StereoWidthParams::default()),
            EffectKind::Distortion => Effect::Distortion(DistortionParams::default()),
            EffectKind::Filter => Effect::Filter(FilterParams::default()),
            EffectKind::Limiter => Effect::Limiter(LimiterParams::default()),
            EffectKind::Gate => Effect::Gate(GateParams::default()),
            EffectKind::Normalize => Effect::Normalize(NormalizeParams::default()),
            EffectKind::VocalEnhancement => {
                Effect::VocalEnhancement(VocalEnhancementParams::default())
            }
            EffectKind::Harmonization => Effect::Harmonization(HarmonizationParams::default()),
            EffectKind::SourceSeparation => {
                Effect::SourceSeparation(SeparationParams::default())
            }
        }
    }

    /// Parameter domains in the form shown to language models
    pub fn parameter_domains(&self) -> &'static str {
        match self {
            EffectKind::Gain => "gain_db: any finite dB value",
            EffectKind::Eq => "low, mid, high: -24 to 24 dB (low shelf 250Hz, mid peak 1kHz, high shelf 4kHz)",
            EffectKind::Compression => {
                "threshold_db: <= 0, ratio: >= 1, attack_ms: > 0, release_ms: > 0, knee_db: >= 0, makeup_db: 0 to 24"
            }
            EffectKind::Reverb => "room_size, damping, wet_level, dry_level: 0 to 1",
            EffectKind::Delay => "time_s: > 0 up to 10, feedback: 0 to <1, mix: 0 to 1",
            EffectKind::NoiseReduction => "strength, sensitivity: 0 to 1",
            EffectKind::PitchShift => "semitones: any finite value",
            EffectKind::TimeStretch => "rate: 0.25 to 4 (>1 faster)",
            EffectKind::StereoWidth => "factor: >= 0 (0 mono, 1 unchanged, >1 wider)",
            EffectKind::Distortion => {
                "drive: 1 to 100, mix: 0 to 1, mode: soft_clip | hard_clip | tape | tube | fuzz"
            }
            EffectKind::Filter => {
                "filter_type: lowpass | highpass | bandpass, cutoff_low: > 0 Hz, cutoff_high: > 0 Hz (below Nyquist, low < high for bandpass), resonance: 0 to 1"
            }
            EffectKind::Limiter => "gain_db: any finite dB value, threshold_db: <= 0, release_ms: > 0",
            EffectKind::Gate => "threshold_db: <= 0, attack_ms: > 0, release_ms: > 0, range_db: <= 0",
            EffectKind::Normalize => "target_peak_db: <= 0",
            EffectKind::VocalEnhancement => "clarity, warmth, de_ess: 0 to 1",
            EffectKind::Harmonization => "intervals: 1 to 4 semitone offsets, each -24 to 24, mix: 0 to 1",
            EffectKind::SourceSeparation => "stems: \"2stems\" | \"4stems\" (must be the last effect)",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Effect
// ============================================================================

/// One configured effect
///
/// Serialized as `{"type": "...", "parameters": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum Effect {
    Gain(GainParams),
    Eq(EqParams),
    Compression(CompressionParams),
    Reverb(ReverbParams),
    Delay(DelayParams),
    NoiseReduction(NoiseReductionParams),
    PitchShift(PitchShiftParams),
    TimeStretch(TimeStretchParams),
    StereoWidth(StereoWidthParams),
    Distortion(DistortionParams),
    Filter(FilterParams),
    Limiter(LimiterParams),
    Gate(GateParams),
    Normalize(NormalizeParams),
    VocalEnhancement(VocalEnhancementParams),
    Harmonization(HarmonizationParams),
    SourceSeparation(SeparationParams),
}

/// Result of running one effect
#[derive(Debug, Clone, PartialEq)]
pub enum EffectOutput {
    Audio(AudioBuffer),
    Stems(BTreeMap<String, AudioBuffer>),
}

fn params_from<T: serde::de::DeserializeOwned>(kind: EffectKind, parameters: Value) -> Result<T> {
    let parameters = match parameters {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let shown = parameters.to_string();
    serde_json::from_value(parameters).map_err(|e| {
        AudioChatError::parameter(kind.as_str(), "parameters", shown, e.to_string())
    })
}

impl Effect {
    /// Build an effect from a loosely typed name and parameter object
    ///
    /// Missing parameters take their defaults; unknown names are rejected.
    pub fn from_parts(effect_type: &str, parameters: Value) -> Result<Self> {
        let kind = EffectKind::parse(effect_type).ok_or_else(|| AudioChatError::UnknownEffect {
            index: None,
            effect_type: effect_type.to_string(),
        })?;
        Ok(match kind {
            EffectKind::Gain => Effect::Gain(params_from(kind, parameters)?),
            EffectKind::Eq => Effect::Eq(params_from(kind, parameters)?),
            EffectKind::Compression => Effect::Compression(params_from(kind, parameters)?),
            EffectKind::Reverb => Effect::Reverb(params_from(kind, parameters)?),
            EffectKind::Delay => Effect::Delay(params_from(kind, parameters)?),
            EffectKind::NoiseReduction => Effect::NoiseReduction(params_from(kind, parameters)?),
            EffectKind::PitchShift => Effect::PitchShift(params_from(kind, parameters)?),
            EffectKind::TimeStretch => Effect::TimeStretch(params_from(kind, parameters)?),
            EffectKind::StereoWidth => Effect::StereoWidth(params_from(kind, parameters)?),
            EffectKind::Distortion => Effect::Distortion(params_from(kind, parameters)?),
            EffectKind::Filter => Effect::Filter(params_from(kind, parameters)?),
            EffectKind::Limiter => Effect::Limiter(params_from(kind, parameters)?),
            EffectKind::Gate => Effect::Gate(params_from(kind, parameters)?),
            EffectKind::Normalize => Effect::Normalize(params_from(kind, parameters)?),
            EffectKind::VocalEnhancement => {
                Effect::VocalEnhancement(params_from(kind, parameters)?)
            }
            EffectKind::Harmonization => Effect::Harmonization(params_from(kind, parameters)?),
            EffectKind::SourceSeparation => {
                Effect::SourceSeparation(params_from(kind, parameters)?)
            }
        })
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Gain(_) => EffectKind::Gain,
            Effect::Eq(_) => EffectKind::Eq,
            Effect::Compression(_) => EffectKind::Compression,
            Effect::Reverb(_) => EffectKind::Reverb,
            Effect::Delay(_) => EffectKind::Delay,
            Effect::NoiseReduction(_) => EffectKind::NoiseReduction,
            Effect::PitchShift(_) => EffectKind::PitchShift,
            Effect::TimeStretch(_) => EffectKind::TimeStretch,
            Effect::StereoWidth(_) => EffectKind::StereoWidth,
            Effect::Distortion(_) => EffectKind::Distortion,
            Effect::Filter(_) => EffectKind::Filter,
            Effect::Limiter(_) => EffectKind::Limiter,
            Effect::Gate(_) => EffectKind::Gate,
            Effect::Normalize(_) => EffectKind::Normalize,
            Effect::VocalEnhancement(_) => EffectKind::VocalEnhancement,
            Effect::Harmonization(_) => EffectKind::Harmonization,
            Effect::SourceSeparation(_) => EffectKind::SourceSeparation,
        }
    }

    /// Parameters as a JSON object
    pub fn parameters(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("parameters").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Check sample-rate independent parameter domains
    pub fn validate(&self) -> Result<()> {
        match self {
            Effect::Gain(p) => p.validate(),
            Effect::Eq(p) => p.validate(),
            Effect::Compression(p) => p.validate(),
            Effect::Reverb(p) => p.validate(),
            Effect::Delay(p) => p.validate(),
            Effect::NoiseReduction(p) => p.validate(),
            Effect::PitchShift(p) => p.validate(),
            Effect::TimeStretch(p) => p.validate(),
            Effect::StereoWidth(p) => p.validate(),
            Effect::Distortion(p) => p.validate(),
            Effect::Filter(p) => p.validate(),
            Effect::Limiter(p) => p.validate(),
            Effect::Gate(p) => p.validate(),
            Effect::Normalize(p) => p.validate(),
            Effect::VocalEnhancement(p) => p.validate(),
            Effect::Harmonization(p) => p.validate(),
            Effect::SourceSeparation(p) => p.validate(),
        }
    }

    /// `validate` plus checks that depend on the sample rate
    pub fn validate_for_rate(&self, sample_rate: u32) -> Result<()> {
        match self {
            Effect::Filter(p) => p.validate_for_rate(sample_rate),
            other => other.validate(),
        }
    }

    /// Human-readable step description
    pub fn describe(&self) -> String {
        match self {
            Effect::Gain(p) => p.describe(),
            Effect::Eq(p) => p.describe(),
            Effect::Compression(p) => p.describe(),
            Effect::Reverb(p) => p.describe(),
            Effect::Delay(p) => p.describe(),
            Effect::NoiseReduction(p) => p.describe(),
            Effect::PitchShift(p) => p.describe(),
            Effect::TimeStretch(p) => p.describe(),
            Effect::StereoWidth(p) => p.describe(),
            Effect::Distortion(p) => p.describe(),
            Effect::Filter(p) => p.describe(),
            Effect::Limiter(p) => p.describe(),
            Effect::Gate(p) => p.describe(),
            Effect::Normalize(p) => p.describe(),
            Effect::VocalEnhancement(p) => p.describe(),
            Effect::Harmonization(p) => p.describe(),
            Effect::SourceSeparation(p) => p.describe(),
        }
    }

    /// Run the effect on a buffer. The input is never modified.
    pub fn process(&self, buffer: &AudioBuffer) -> Result<EffectOutput> {
        let audio = match self {
            Effect::Gain(p) => apply_gain(buffer, p)?,
            Effect::Eq(p) => apply_eq(buffer, p)?,
            Effect::Compression(p) => apply_compression(buffer, p)?,
            Effect::Reverb(p) => apply_reverb(buffer, p)?,
            Effect::Delay(p) => apply_delay(buffer, p)?,
            Effect::NoiseReduction(p) => apply_noise_reduction(buffer, p)?,
            Effect::PitchShift(p) => apply_pitch_shift(buffer, p)?,
            Effect::TimeStretch(p) => apply_time_stretch(buffer, p)?,
            Effect::StereoWidth(p) => apply_stereo_width(buffer, p)?,
            Effect::Distortion(p) => apply_distortion(buffer, p)?,
            Effect::Filter(p) => apply_filter(buffer, p)?,
            Effect::Limiter(p) => apply_limiter(buffer, p)?,
            Effect::Gate(p) => apply_gate(buffer, p)?,
            Effect::Normalize(p) => apply_normalize(buffer, p)?,
            Effect::VocalEnhancement(p) => apply_vocal_enhancement(buffer, p)?,
            Effect::Harmonization(p) => apply_harmonization(buffer, p)?,
            Effect::SourceSeparation(p) => return separate(buffer, p).map(EffectOutput::Stems),
        };
        Ok(EffectOutput::Audio(audio))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let effect = Effect::Gain(GainParams::new(6.0));
        assert_eq!(
            serde_json::to_value(&effect).unwrap(),
            json!({"type": "gain", "parameters": {"gain_db": 6.0}})
        );
    }

    #[test]
    fn test_from_parts_with_aliases() {
        let effect = Effect::from_parts(
            "compressor",
            json!({"threshold": -18.0, "ratio": 4.0, "attack": 10.0}),
        )
        .unwrap();
        match effect {
            Effect::Compression(p) => {
                assert_eq!(p.threshold_db, -18.0);
                assert_eq!(p.ratio, 4.0);
                assert_eq!(p.attack_ms, 10.0);
                assert_eq!(p.release_ms, CompressionParams::default().release_ms);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_parts_missing_parameters_take_defaults() {
        assert_eq!(
            Effect::from_parts("reverb", Value::Null).unwrap(),
            EffectKind::Reverb.default_effect()
        );
    }

    #[test]
    fn test_from_parts_unknown_type() {
        let err = Effect::from_parts("flanger", json!({})).unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_EFFECT");
    }

    #[test]
    fn test_from_parts_bad_type_is_parameter_error() {
        let err = Effect::from_parts("gain", json!({"gain_db": "loud"})).unwrap_err();
        assert_eq!(err.error_code(), "PARAMETER_ERROR");
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::parse(kind.as_str()), Some(kind));
            assert_eq!(kind.default_effect().kind(), kind);
            assert!(kind.default_effect().validate().is_ok(), "{}", kind);
            assert!(!kind.parameter_domains().is_empty());
        }
    }

    #[test]
    fn test_static_metadata() {
        assert!(EffectKind::Gain.is_chunkable());
        assert!(EffectKind::Reverb.is_chunkable());
        assert!(!EffectKind::NoiseReduction.is_chunkable());
        assert!(!EffectKind::SourceSeparation.is_chunkable());
        assert!(EffectKind::SourceSeparation.is_terminal());
        assert!(!EffectKind::Limiter.is_terminal());
    }

    #[test]
    fn test_describe_compression() {
        assert_eq!(
            EffectKind::Compression.default_effect().describe(),
            "Applied compression: -20dB threshold, 3:1 ratio, 20ms attack, 250ms release"
        );
    }

    #[test]
    fn test_parameters_object() {
        let effect = Effect::Eq(EqParams::new(3.0, 0.0, -2.0));
        assert_eq!(
            effect.parameters(),
            json!({"low": 3.0, "mid": 0.0, "high": -2.0})
        );
    }

    #[test]
    fn test_process_separation_returns_stems() {
        let buffer = AudioBuffer::mono(vec![0.1; 4096], 16000).unwrap();
        match EffectKind::SourceSeparation
            .default_effect()
            .process(&buffer)
            .unwrap()
        {
            EffectOutput::Stems(stems) => assert_eq!(stems.len(), 2),
            EffectOutput::Audio(_) => panic!("expected stems"),
        }
    }
}
