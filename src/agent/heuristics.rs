//! Rule-based instruction mapping
//!
//! Used when no language model answers. Keyword rules turn the instruction
//! into effects, then analysis-driven corrections cover what the audio
//! itself asks for (too quiet, noisy, clipping). Without an analysis the
//! heuristic path yields an empty chain.

use tracing::debug;

use super::intent::{Intent, ParamType};
use crate::analysis::{AnalysisConfig, AnalysisResult};
use crate::dsp::{
    CompressionParams, DelayParams, DistortionMode, DistortionParams, Effect, EffectKind,
    EffectsChain, EqParams, FilterParams, GainParams, GateParams, HarmonizationParams,
    LimiterParams, NoiseReductionParams, NormalizeParams, PitchShiftParams, ReverbParams,
    SeparationParams, StemLayout, StereoWidthParams, TimeStretchParams, VocalEnhancementParams,
};

/// RMS level the quiet-audio correction aims for
pub const TARGET_RMS_DB: f32 = -20.0;

/// Largest boost the quiet-audio correction applies
pub const MAX_CORRECTION_GAIN_DB: f32 = 24.0;

const BOOST_WORDS: &[&str] = &["more", "boost", "increase", "add", "louder", "up"];
const CUT_WORDS: &[&str] = &["less", "cut", "reduce", "remove", "lower", "down", "tame"];

/// Effects the rules produced plus notes on anything they dropped
#[derive(Debug, Clone, Default)]
pub struct HeuristicOutcome {
    pub chain: EffectsChain,
    pub diagnostics: Vec<String>,
}

/// Keyword and analysis rules
#[derive(Debug, Clone, Default)]
pub struct HeuristicMapper {
    config: AnalysisConfig,
}

impl HeuristicMapper {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Map an instruction to a chain
    pub fn build(&self, instruction: &str, analysis: Option<&AnalysisResult>) -> HeuristicOutcome {
        let Some(analysis) = analysis else {
            return HeuristicOutcome {
                chain: EffectsChain::empty(),
                diagnostics: vec!["no analysis available; heuristic chain is empty".to_string()],
            };
        };

        let intent = Intent::analyze(instruction);
        let mut diagnostics = Vec::new();
        let mut effects = keyword_effects(&intent, &mut diagnostics);
        self.apply_corrections(analysis, &mut effects);

        // Terminal effect goes last, the rest keep rule order
        effects.sort_by_key(|e| e.kind().is_terminal());

        let mut valid = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect.validate_for_rate(analysis.sample_rate) {
                Ok(()) => valid.push(effect),
                Err(e) => diagnostics.push(format!("dropped heuristic {}: {}", effect.kind(), e)),
            }
        }

        let chain = match EffectsChain::new(valid) {
            Ok(chain) => chain,
            Err(e) => {
                diagnostics.push(format!("heuristic chain rejected: {}", e));
                EffectsChain::empty()
            }
        };
        debug!(effects = ?chain.kinds(), "heuristic chain built");

        HeuristicOutcome { chain, diagnostics }
    }

    /// Corrections the analysis calls for, skipped when the chain already
    /// addresses them
    fn apply_corrections(&self, analysis: &AnalysisResult, effects: &mut Vec<Effect>) {
        if analysis.noise_floor > self.config.noise_floor_threshold
            && !contains_kind(effects, EffectKind::NoiseReduction)
        {
            effects.insert(
                0,
                Effect::NoiseReduction(NoiseReductionParams {
                    strength: 0.4,
                    sensitivity: 0.5,
                }),
            );
        }

        let raises_level = effects.iter().any(|e| match e {
            Effect::Gain(p) => p.gain_db > 0.0,
            Effect::Limiter(p) => p.gain_db > 0.0,
            Effect::Normalize(_) => true,
            _ => false,
        });
        if analysis.rms_level < self.config.quiet_rms_threshold
            && analysis.rms_level > 0.0
            && !raises_level
        {
            let boost = (TARGET_RMS_DB - analysis.rms_db()).min(MAX_CORRECTION_GAIN_DB);
            if boost > 0.0 {
                effects.push(Effect::Gain(GainParams::new(boost)));
            }
        }

        if analysis.is_clipping && !contains_kind(effects, EffectKind::Limiter) {
            effects.push(Effect::Limiter(LimiterParams {
                gain_db: -3.0,
                threshold_db: -0.3,
                release_ms: 50.0,
            }));
        }
    }
}

fn contains_kind(effects: &[Effect], kind: EffectKind) -> bool {
    effects.iter().any(|e| e.kind() == kind)
}

/// Effects named or implied by the instruction, in processing order
fn keyword_effects(intent: &Intent, diagnostics: &mut Vec<String>) -> Vec<Effect> {
    let mut effects = Vec::new();

    if intent.has_word(&["noise", "noisy", "hiss", "hum", "background", "denoise"])
        || intent.has_stem(&["clean"])
    {
        let strength = if intent.has_word(&["strong", "heavy", "heavily"]) {
            0.8
        } else if intent.has_word(&["light", "gentle", "gently"]) {
            0.3
        } else {
            0.5
        };
        effects.push(Effect::NoiseReduction(NoiseReductionParams {
            strength,
            sensitivity: 0.5,
        }));
    }

    if intent.has_word(&["gate"]) {
        effects.push(Effect::Gate(GateParams::default()));
    }

    if let Some(filter) = filter_rule(intent) {
        effects.push(filter);
    }

    match eq_rule(intent) {
        Some(Ok(eq)) => effects.push(eq),
        Some(Err(note)) => diagnostics.push(note),
        None => {}
    }

    if intent.has_stem(&["compress", "dynamic"]) || intent.has_word(&["punchy", "punch", "tight"]) {
        effects.push(compression_rule(intent));
    }

    if intent.has_stem(&["distort", "saturat", "overdrive", "analog", "fuzz", "crunch"]) {
        effects.push(distortion_rule(intent));
    }

    match pitch_rule(intent) {
        Some(Ok(pitch)) => effects.push(pitch),
        Some(Err(note)) => diagnostics.push(note),
        None => {}
    }

    if let Some(stretch) = stretch_rule(intent) {
        effects.push(stretch);
    }

    if let Some(stereo) = stereo_rule(intent) {
        effects.push(stereo);
    }

    let vocal = intent.has_stem(&["vocal", "voice", "singer"]);
    if vocal && intent.has_stem(&["enhanc", "clear", "clarity", "crisp", "improve"]) {
        effects.push(Effect::VocalEnhancement(VocalEnhancementParams::default()));
    }
    if intent.has_stem(&["harmon"]) {
        effects.push(Effect::Harmonization(HarmonizationParams::default()));
    }

    if intent.has_stem(&["delay", "echo", "repeat"]) {
        effects.push(delay_rule(intent));
    }

    if intent.has_stem(&["reverb", "spacious", "ambien", "cathedral"])
        || intent.has_word(&["space", "room", "hall"])
    {
        effects.push(reverb_rule(intent));
    }

    if intent.has_stem(&["normali"]) {
        effects.push(Effect::Normalize(NormalizeParams::default()));
    }

    if let Some(level) = level_rule(intent) {
        effects.push(level);
    }

    if intent.has_stem(&["maximi", "limit"]) {
        effects.push(Effect::Limiter(LimiterParams {
            gain_db: 6.0 * intent.scale(),
            threshold_db: -0.3,
            release_ms: 50.0,
        }));
    }

    if intent.has_stem(&["separat", "stem", "isolat", "karaoke", "acapella"]) {
        let stems = if intent.has_word(&["4", "four", "drums", "4stems"]) {
            StemLayout::FourStems
        } else {
            StemLayout::TwoStems
        };
        effects.push(Effect::SourceSeparation(SeparationParams { stems }));
    }

    effects
}

fn filter_rule(intent: &Intent) -> Option<Effect> {
    let freq = intent.param(ParamType::Frequency);
    let params = if intent.has_word(&["lowpass"]) || intent.has_phrase(&["low pass", "low-pass"]) {
        FilterParams::lowpass(freq.unwrap_or(1000.0))
    } else if intent.has_word(&["highpass"]) || intent.has_phrase(&["high pass", "high-pass"]) {
        FilterParams::highpass(freq.unwrap_or(1000.0))
    } else if intent.has_stem(&["telephone", "phone"]) {
        FilterParams::bandpass(800.0, 3000.0)
    } else if intent.has_word(&["radio"]) {
        FilterParams::bandpass(500.0, 5000.0)
    } else if intent.has_word(&["bandpass", "filter"]) {
        FilterParams::bandpass(500.0, 3000.0)
    } else {
        return None;
    };
    Some(Effect::Filter(params))
}

/// Tone presets as (low, mid, high) dB
const EQ_PRESETS: &[(&str, [f32; 3])] = &[
    ("warm", [3.0, 0.0, -2.0]),
    ("bright", [-2.0, 0.0, 4.0]),
    ("telephone", [-15.0, 5.0, -15.0]),
    ("radio", [-10.0, 2.0, -8.0]),
    ("scoop", [2.0, -4.0, 2.0]),
    ("presence", [-1.0, 1.0, 2.0]),
];

fn eq_rule(intent: &Intent) -> Option<Result<Effect, String>> {
    let triggered = intent.has_word(&[
        "eq", "equalizer", "equalize", "equalization", "bass", "treble", "mid", "mids", "tone",
        "frequency", "high", "highs", "low", "lows",
    ]) || intent.has_stem(&["warm", "bright", "scoop", "presence", "muddy", "boomy", "harsh"]);
    if !triggered {
        return None;
    }

    let [mut low, mut mid, mut high] = EQ_PRESETS
        .iter()
        .find(|(name, _)| intent.has_stem(&[*name]))
        .map(|(_, bands)| *bands)
        .unwrap_or([0.0; 3]);

    let explicit = intent.param(ParamType::Gain);
    let direction = if intent.has_word(CUT_WORDS) {
        -1.0
    } else if intent.has_word(BOOST_WORDS) {
        1.0
    } else {
        0.0
    };
    let scale = intent.scale();
    let band_amount = |boost: f32, default: f32| -> f32 {
        match (explicit, direction) {
            (Some(db), d) if d < 0.0 => -db.abs(),
            (Some(db), _) => db,
            (None, d) if d != 0.0 => d * boost * scale,
            (None, _) => default * scale,
        }
    };

    if intent.has_word(&["bass", "low", "lows"]) {
        low = band_amount(4.0, 2.0);
    }
    if intent.has_word(&["mid", "mids", "midrange"]) {
        mid = band_amount(3.0, 2.0);
    }
    if intent.has_word(&["treble", "high", "highs"]) {
        high = band_amount(3.0, 2.0);
    }
    // Corrective words
    if intent.has_stem(&["muddy"]) {
        low = low.min(-3.0 * scale);
    }
    if intent.has_stem(&["boomy"]) {
        low = low.min(-4.0 * scale);
    }
    if intent.has_stem(&["harsh"]) {
        high = high.min(-3.0 * scale);
    }

    if low == 0.0 && mid == 0.0 && high == 0.0 {
        return Some(Err(
            "eq requested without a band or direction; skipped".to_string()
        ));
    }
    Some(Ok(Effect::Eq(EqParams { low, mid, high })))
}

fn compression_rule(intent: &Intent) -> Effect {
    let mut params = CompressionParams::default();
    if intent.has_word(&["heavy", "strong", "heavily", "squash"]) {
        params.ratio = 6.0;
        params.threshold_db = -24.0;
    } else if intent.has_word(&["light", "gentle", "subtle", "gently"]) {
        params.ratio = 2.0;
        params.threshold_db = -18.0;
    }
    if intent.has_word(&["fast"]) {
        params.attack_ms = 5.0;
        params.release_ms = 100.0;
    } else if intent.has_word(&["slow"]) {
        params.attack_ms = 50.0;
        params.release_ms = 500.0;
    }
    if let Some(ratio) = intent.param(ParamType::Ratio) {
        params.ratio = ratio;
    }
    Effect::Compression(params)
}

fn distortion_rule(intent: &Intent) -> Effect {
    let mut params = DistortionParams::default();
    if intent.has_word(&["heavy", "heavily", "lots", "extreme"]) {
        params.drive = 5.0;
        params.mix = 0.7;
    } else if intent.has_word(&["subtle", "light", "slight", "slightly", "gentle"]) {
        params.drive = 1.5;
        params.mix = 0.3;
    }
    params.mode = if intent.has_stem(&["fuzz"]) {
        DistortionMode::Fuzz
    } else if intent.has_stem(&["tube", "valve"]) {
        DistortionMode::Tube
    } else if intent.has_word(&["hard", "harsh", "digital"]) {
        DistortionMode::HardClip
    } else {
        DistortionMode::SoftClip
    };
    Effect::Distortion(params)
}

fn pitch_rule(intent: &Intent) -> Option<Result<Effect, String>> {
    let semitones = intent.param(ParamType::Semitones);
    let triggered = semitones.is_some()
        || intent.has_stem(&["pitch"])
        || intent.has_word(&["higher", "deeper", "chipmunk"]);
    if !triggered {
        return None;
    }
    let semitones = match semitones {
        Some(st) => st,
        None if intent.has_word(&["chipmunk"]) => 6.0,
        None if intent.has_word(&["higher", "up", "raise"]) => 2.0,
        None if intent.has_word(&["lower", "down", "deeper"]) => -2.0,
        None => return Some(Err("pitch requested without a direction; skipped".to_string())),
    };
    Some(Ok(Effect::PitchShift(PitchShiftParams { semitones })))
}

fn stretch_rule(intent: &Intent) -> Option<Effect> {
    let faster = intent.has_word(&["faster", "quicker"]) || intent.has_phrase(&["speed up"]);
    let slower = intent.has_word(&["slower"]) || intent.has_phrase(&["slow down"]);
    let percent = intent.param(ParamType::Percent).map(|p| p / 100.0);
    let rate = match (faster, slower, percent) {
        (true, false, Some(p)) => 1.0 + p,
        (true, false, None) => 1.2,
        (false, true, Some(p)) => 1.0 - p,
        (false, true, None) => 0.8,
        _ => return None,
    };
    Some(Effect::TimeStretch(TimeStretchParams { rate }))
}

fn stereo_rule(intent: &Intent) -> Option<Effect> {
    let factor = if intent.has_word(&["mono"]) {
        0.0
    } else if intent.has_word(&["narrow", "narrower"]) {
        0.7
    } else if intent.has_word(&["wide", "wider", "widen"])
        || (intent.has_word(&["stereo", "width"]) && intent.has_word(BOOST_WORDS))
    {
        1.0 + 0.5 * intent.scale()
    } else {
        return None;
    };
    Some(Effect::StereoWidth(StereoWidthParams { factor }))
}

fn delay_rule(intent: &Intent) -> Effect {
    let mut params = DelayParams::default();
    if intent.has_word(&["long", "longer"]) {
        params.time_s = 0.5;
        params.feedback = 0.4;
    } else if intent.has_word(&["short", "shorter", "slapback"]) {
        params.time_s = 0.125;
        params.feedback = 0.2;
    }
    if intent.has_word(&["more"]) {
        params.mix = 0.5;
    } else if intent.has_word(&["subtle", "less", "light"]) {
        params.mix = 0.2;
    }
    Effect::Delay(params)
}

fn reverb_rule(intent: &Intent) -> Effect {
    let mut params = ReverbParams::default();
    if intent.has_word(&["hall", "large", "big", "cathedral", "huge"]) {
        params.room_size = 0.85;
        params.wet_level = 0.4;
    } else if intent.has_word(&["small", "room", "booth", "tight"]) {
        params.room_size = 0.3;
        params.wet_level = 0.25;
    }
    if intent.has_word(&["subtle", "less", "light", "touch"]) {
        params.wet_level *= 0.5;
    } else if intent.has_word(&["wet", "drenched", "lots"]) {
        params.wet_level = (params.wet_level * 1.5).min(1.0);
    }
    Effect::Reverb(params)
}

fn level_rule(intent: &Intent) -> Option<Effect> {
    let louder = (intent.has_word(&["louder", "boost"])
        && !intent.has_word(&["bass", "treble", "mid", "mids"]))
        || intent.has_phrase(&["volume up", "turn it up", "turn up"]);
    let quieter = intent.has_word(&["quieter", "softer"])
        || intent.has_phrase(&["volume down", "turn it down", "turn down"]);
    let explicit = intent.param(ParamType::Gain);
    let gain_db = match (louder, quieter) {
        (true, false) => explicit.map(f32::abs).unwrap_or(6.0 * intent.scale()),
        (false, true) => -explicit.map(f32::abs).unwrap_or(6.0 * intent.scale()),
        _ => return None,
    };
    Some(Effect::Gain(GainParams::new(gain_db)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            duration_secs: 5.0,
            sample_rate: 44100,
            channels: 2,
            peak_level: 0.7,
            rms_level: 0.2,
            crest_factor: 3.5,
            spectral_centroid_hz: 1500.0,
            spectral_rolloff_hz: 6000.0,
            noise_floor: 0.001,
            estimated_key: "C major".to_string(),
            estimated_tempo_bpm: 120.0,
            clip_ratio: 0.0,
            is_clipping: false,
            is_too_quiet: false,
        }
    }

    fn kinds(instruction: &str, analysis: &AnalysisResult) -> Vec<EffectKind> {
        HeuristicMapper::default()
            .build(instruction, Some(analysis))
            .chain
            .kinds()
    }

    #[test]
    fn test_no_analysis_gives_empty_chain() {
        let outcome = HeuristicMapper::default().build("add reverb", None);
        assert!(outcome.chain.is_empty());
        assert!(!outcome.diagnostics.is_empty());
    }

    #[test_case("add some reverb", EffectKind::Reverb)]
    #[test_case("boost the bass", EffectKind::Eq)]
    #[test_case("make it punchy", EffectKind::Compression)]
    #[test_case("remove the background hiss", EffectKind::NoiseReduction)]
    #[test_case("add a long echo", EffectKind::Delay)]
    #[test_case("pitch it up 3 semitones", EffectKind::PitchShift)]
    #[test_case("make it 10% faster", EffectKind::TimeStretch)]
    #[test_case("make the mix wider", EffectKind::StereoWidth)]
    #[test_case("make it louder", EffectKind::Gain)]
    #[test_case("add analog saturation", EffectKind::Distortion)]
    #[test_case("make it sound like a telephone", EffectKind::Filter)]
    #[test_case("enhance the vocals", EffectKind::VocalEnhancement)]
    #[test_case("harmonize the voice", EffectKind::Harmonization)]
    #[test_case("maximize loudness", EffectKind::Limiter)]
    #[test_case("separate into stems", EffectKind::SourceSeparation)]
    fn test_keyword_rules(instruction: &str, expected: EffectKind) {
        assert!(kinds(instruction, &analysis()).contains(&expected), "{}", instruction);
    }

    #[test]
    fn test_bass_boost_amount() {
        let chain = HeuristicMapper::default()
            .build("boost the bass", Some(&analysis()))
            .chain;
        match &chain.effects()[0] {
            Effect::Eq(p) => {
                assert_eq!(p.low, 4.0);
                assert_eq!(p.high, 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_explicit_db_honoured() {
        let chain = HeuristicMapper::default()
            .build("cut the treble by 5 dB", Some(&analysis()))
            .chain;
        match &chain.effects()[0] {
            Effect::Eq(p) => assert_eq!(p.high, -5.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_intensity_scales_gain() {
        let chain = HeuristicMapper::default()
            .build("make it slightly louder", Some(&analysis()))
            .chain;
        match &chain.effects()[0] {
            Effect::Gain(p) => assert!((p.gain_db - 3.6).abs() < 1e-4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compression_ratio_honoured() {
        let chain = HeuristicMapper::default()
            .build("compress it 8:1 with a fast attack", Some(&analysis()))
            .chain;
        match &chain.effects()[0] {
            Effect::Compression(p) => {
                assert_eq!(p.ratio, 8.0);
                assert_eq!(p.attack_ms, 5.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_quiet_audio_gets_gain() {
        let mut quiet = analysis();
        quiet.rms_level = 0.01;
        quiet.is_too_quiet = true;
        let chain = HeuristicMapper::default().build("", Some(&quiet)).chain;
        match chain.effects() {
            [Effect::Gain(p)] => {
                // -40 dBFS up to -20 dBFS
                assert!((p.gain_db - 20.0).abs() < 0.01);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_quiet_correction_capped() {
        let mut quiet = analysis();
        quiet.rms_level = 1e-5;
        let chain = HeuristicMapper::default().build("", Some(&quiet)).chain;
        match chain.effects() {
            [Effect::Gain(p)] => assert_eq!(p.gain_db, MAX_CORRECTION_GAIN_DB),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_silence_gets_no_gain() {
        let mut silent = analysis();
        silent.rms_level = 0.0;
        silent.noise_floor = 0.0;
        assert!(kinds("", &silent).is_empty());
    }

    #[test]
    fn test_louder_on_quiet_audio_not_doubled() {
        let mut quiet = analysis();
        quiet.rms_level = 0.01;
        assert_eq!(kinds("make it louder", &quiet), vec![EffectKind::Gain]);
    }

    #[test]
    fn test_noise_floor_correction_first() {
        let mut noisy = analysis();
        noisy.noise_floor = 0.05;
        assert_eq!(
            kinds("add reverb", &noisy),
            vec![EffectKind::NoiseReduction, EffectKind::Reverb]
        );
    }

    #[test]
    fn test_clipping_gets_limiter() {
        let mut hot = analysis();
        hot.is_clipping = true;
        let chain = HeuristicMapper::default().build("", Some(&hot)).chain;
        match chain.effects() {
            [Effect::Limiter(p)] => assert!(p.gain_db < 0.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_separation_always_last() {
        let kinds = kinds("separate the drums into 4 stems and add reverb", &analysis());
        assert_eq!(kinds.last(), Some(&EffectKind::SourceSeparation));
        assert!(kinds.contains(&EffectKind::Reverb));
    }

    #[test]
    fn test_invalid_heuristic_effect_dropped() {
        // 30 kHz is above Nyquist at 44.1 kHz
        let outcome = HeuristicMapper::default().build("lowpass at 30khz", Some(&analysis()));
        assert!(outcome.chain.is_empty());
        assert!(outcome.diagnostics.iter().any(|d| d.contains("filter")));
    }
}
