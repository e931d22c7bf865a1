//! Agent Tests
//!
//! Instruction parsing, keyword mapping and language-model fallback
//! through the public API.

use std::sync::Arc;
use std::time::Duration;

use test_case::test_case;

use audiochat::agent::{
    parse_response, ChainBuilder, ChainSource, HeuristicMapper, InstructionProcessor, Intent,
    LanguageModelProvider, MockProvider, MockReply, ParamType, ProviderConfig,
};
use audiochat::analysis::{AnalysisConfig, AnalysisResult, Analyzer};
use audiochat::dsp::{Effect, EffectKind};
use audiochat::engine::AudioBuffer;

fn analysis_of(amplitude: f32) -> AnalysisResult {
    let samples = (0..44100)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
        .collect();
    let buffer = AudioBuffer::mono(samples, 44100).unwrap();
    Analyzer::new(AnalysisConfig::default()).analyze(&buffer).unwrap()
}

fn processor_with(provider: Arc<MockProvider>) -> InstructionProcessor {
    InstructionProcessor::new(
        Some(provider as Arc<dyn LanguageModelProvider>),
        &ProviderConfig::default(),
        AnalysisConfig::default(),
    )
}

// === Intent Parsing Tests ===

#[test]
fn test_intent_analyze() {
    let intent = Intent::analyze("Make it LOUDER");
    assert_eq!(intent.original, "Make it LOUDER");
    assert_eq!(intent.prompt_lower, "make it louder");
    assert!(intent.has_word(&["louder"]));
}

#[test]
fn test_intent_extracts_values() {
    let intent = Intent::analyze("cut 3 dB around 200 Hz");
    assert_eq!(intent.param(ParamType::Gain), Some(3.0));
    assert_eq!(intent.param(ParamType::Frequency), Some(200.0));
}

#[test]
fn test_intent_intensity_scales() {
    let slight = Intent::analyze("slightly brighter");
    let heavy = Intent::analyze("a lot brighter");
    assert!(slight.scale() < heavy.scale());
}

// === Keyword Mapping Tests ===

#[test_case("add some reverb", EffectKind::Reverb ; "reverb")]
#[test_case("compress the vocals heavily", EffectKind::Compression ; "compression")]
#[test_case("make it sound like a telephone", EffectKind::Filter ; "telephone")]
#[test_case("shift it up 2 semitones", EffectKind::PitchShift ; "pitch")]
#[test_case("make the stereo wider", EffectKind::StereoWidth ; "stereo")]
#[test_case("split into stems", EffectKind::SourceSeparation ; "separation")]
fn test_keyword_maps_to_effect(instruction: &str, expected: EffectKind) {
    let outcome = HeuristicMapper::new(AnalysisConfig::default())
        .build(instruction, Some(&analysis_of(0.3)));
    assert!(
        outcome.chain.kinds().contains(&expected),
        "{:?} not in {:?}",
        expected,
        outcome.chain.kinds()
    );
}

#[test]
fn test_separation_stays_last() {
    let outcome = HeuristicMapper::new(AnalysisConfig::default())
        .build("separate the stems and add reverb", Some(&analysis_of(0.3)));
    assert_eq!(outcome.chain.kinds().last(), Some(&EffectKind::SourceSeparation));
}

#[test]
fn test_quiet_audio_gets_level_correction() {
    let analysis = analysis_of(0.01);
    assert!(analysis.is_too_quiet);
    let outcome = HeuristicMapper::new(AnalysisConfig::default()).build("add reverb", Some(&analysis));
    let gain = outcome.chain.iter().find_map(|e| match e {
        Effect::Gain(p) => Some(p.gain_db),
        _ => None,
    });
    assert!(matches!(gain, Some(db) if db > 0.0 && db <= 24.0));
}

#[test]
fn test_no_analysis_no_chain() {
    let outcome = HeuristicMapper::new(AnalysisConfig::default()).build("add reverb", None);
    assert!(outcome.chain.is_empty());
    assert!(!outcome.diagnostics.is_empty());
}

// === Response Parsing Tests ===

#[test]
fn test_response_drops_invalid_elements() {
    let text = r#"Sure! [{"type": "gain", "gain_db": 3},
        {"type": "wobble"},
        {"type": "compression", "parameters": {"ratio": 0}},
        {"type": "reverb", "parameters": {"room_size": 0.4}}]"#;
    let parsed = parse_response(text, Some(44100)).unwrap();
    assert_eq!(parsed.chain.kinds(), vec![EffectKind::Gain, EffectKind::Reverb]);
    assert_eq!(parsed.dropped(), 2);
    assert_eq!(parsed.diagnostics.len(), 2);
}

#[test]
fn test_response_without_array_is_error() {
    assert!(parse_response("I cannot help with that.", None).is_err());
}

// === Provider Fallback Tests ===

#[test]
fn test_language_model_chain_used() {
    let provider = Arc::new(MockProvider::text(r#"{"effects": [{"type": "delay", "time_s": 0.25}]}"#));
    let built = processor_with(provider.clone()).build_chain("add an echo", Some(&analysis_of(0.3)));
    assert_eq!(built.chain.kinds(), vec![EffectKind::Delay]);
    assert!(matches!(built.source, ChainSource::LanguageModel { .. }));
    assert_eq!(provider.calls(), 1);
    assert!(provider.last_request().unwrap().prompt.contains("add an echo"));
}

#[test]
fn test_failing_provider_falls_back_to_keywords() {
    let provider = Arc::new(MockProvider::failing("503 from upstream"));
    let built = processor_with(provider).build_chain("add some reverb", Some(&analysis_of(0.3)));
    assert_eq!(built.source, ChainSource::Heuristic);
    assert!(built.provider_error.unwrap().contains("503"));
    assert!(built.chain.kinds().contains(&EffectKind::Reverb));
}

#[test]
fn test_slow_provider_times_out() {
    let provider = Arc::new(MockProvider::new(vec![MockReply::Delayed(
        Duration::from_millis(500),
        r#"[{"type": "gain", "gain_db": 1}]"#.to_string(),
    )]));
    let built = processor_with(provider)
        .with_timeout(Duration::from_millis(50))
        .build_chain("add some reverb", Some(&analysis_of(0.3)));
    assert_eq!(built.source, ChainSource::Heuristic);
    assert!(built.provider_error.is_some());
}
