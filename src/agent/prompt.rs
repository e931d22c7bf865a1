//! Prompt construction and response parsing for language-model providers
//!
//! Responses are untrusted: each element is parsed and validated on its
//! own, and anything invalid is dropped with a diagnostic rather than
//! clamped into range.

use serde_json::{json, Value};
use tracing::warn;

use crate::analysis::AnalysisResult;
use crate::dsp::{EffectKind, EffectsChain, RawEffect};
use crate::error::{AudioChatError, Result};

/// System prompt listing every registered effect and its domains
pub fn system_prompt() -> String {
    let mut prompt = String::from(
        "You are an audio engineer. Translate the user's editing request into an ordered \
         chain of audio effects.\n\nAvailable effects (type: parameters):\n",
    );
    for kind in EffectKind::ALL {
        prompt.push_str(&format!("- {}: {}\n", kind.as_str(), kind.parameter_domains()));
    }
    prompt.push_str(
        "\nRules:\n\
         - Respond with a JSON array only, no prose and no code fences.\n\
         - Each element is {\"type\": \"<effect>\", \"parameters\": {...}}.\n\
         - Effects run in array order.\n\
         - Keep every parameter inside its range; out-of-range effects are discarded.\n\
         - source_separation may only appear as the last element.\n\
         - Respond with [] if the request needs no processing.\n",
    );
    prompt
}

/// User prompt with the instruction and, when present, the analysis
pub fn user_prompt(instruction: &str, analysis: Option<&AnalysisResult>) -> String {
    let mut prompt = format!("Request: {}\n", instruction.trim());
    if let Some(a) = analysis {
        prompt.push_str(&format!(
            "\nAudio analysis:\n\
             - duration: {:.2} s, sample rate: {} Hz, channels: {}\n\
             - peak: {:.1} dBFS, RMS: {:.1} dBFS, crest factor: {:.2}\n\
             - spectral centroid: {:.0} Hz, rolloff: {:.0} Hz\n\
             - noise floor: {:.4}, clipping: {}, too quiet: {}\n\
             - estimated key: {}, estimated tempo: {:.1} BPM\n",
            a.duration_secs,
            a.sample_rate,
            a.channels,
            a.peak_db(),
            a.rms_db(),
            a.crest_factor,
            a.spectral_centroid_hz,
            a.spectral_rolloff_hz,
            a.noise_floor,
            a.is_clipping,
            a.is_too_quiet,
            a.estimated_key,
            a.estimated_tempo_bpm,
        ));
    }
    prompt.push_str("\nRespond with the JSON array of effects.");
    prompt
}

/// JSON schema for the expected response
pub fn response_schema() -> Value {
    let kinds: Vec<&str> = EffectKind::ALL.iter().map(|k| k.as_str()).collect();
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "type": { "type": "string", "enum": kinds },
                "parameters": { "type": "object" }
            },
            "required": ["type", "parameters"]
        }
    })
}

/// Validated chain from a provider answer
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub chain: EffectsChain,
    /// Elements the response contained, valid or not
    pub total: usize,
    pub diagnostics: Vec<String>,
}

impl ParsedResponse {
    pub fn dropped(&self) -> usize {
        self.total - self.chain.len()
    }
}

/// Parse a provider answer into a chain
///
/// # Errors
/// `InvalidChain` when no JSON array can be recovered from the text.
pub fn parse_response(text: &str, sample_rate: Option<u32>) -> Result<ParsedResponse> {
    let items = extract_items(text)?;
    let total = items.len();
    let mut diagnostics = Vec::new();
    let mut effects = Vec::with_capacity(total);

    for (i, item) in items.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawEffect>(item)
            .map_err(AudioChatError::from)
            .and_then(RawEffect::into_effect)
            .and_then(|effect| {
                match sample_rate {
                    Some(sr) => effect.validate_for_rate(sr),
                    None => effect.validate(),
                }
                .map(|_| effect)
            });
        match parsed {
            Ok(effect) => effects.push((i, effect)),
            Err(e) => {
                warn!(index = i, error = %e, "dropping invalid effect from provider response");
                diagnostics.push(format!("dropped effect {}: {}", i, e));
            }
        }
    }

    // A terminal effect anywhere but last cannot run
    let last = effects.len().saturating_sub(1);
    let mut kept = Vec::with_capacity(effects.len());
    for (pos, (i, effect)) in effects.into_iter().enumerate() {
        if effect.kind().is_terminal() && pos != last {
            warn!(index = i, effect_type = %effect.kind(), "dropping non-terminal placement");
            diagnostics.push(format!(
                "dropped effect {}: {} must be the last effect",
                i,
                effect.kind()
            ));
            continue;
        }
        kept.push(effect);
    }

    let chain = EffectsChain::new(kept)?;
    Ok(ParsedResponse {
        chain,
        total,
        diagnostics,
    })
}

fn extract_items(text: &str) -> Result<Vec<Value>> {
    let value = match serde_json::from_str::<Value>(text.trim()) {
        Ok(value) => value,
        Err(_) => {
            let embedded = text
                .find('[')
                .zip(text.rfind(']'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &text[start..=end])
                .ok_or_else(|| AudioChatError::InvalidChain {
                    reason: "provider response contains no JSON array".to_string(),
                })?;
            serde_json::from_str::<Value>(embedded).map_err(|e| AudioChatError::InvalidChain {
                reason: format!("provider response is not valid JSON: {}", e),
            })?
        }
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("effects") {
            Some(Value::Array(items)) => Ok(items),
            _ if map.contains_key("type") => Ok(vec![Value::Object(map)]),
            _ => Err(AudioChatError::InvalidChain {
                reason: "provider response object has no effects array".to_string(),
            }),
        },
        _ => Err(AudioChatError::InvalidChain {
            reason: "provider response is not an array of effects".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::Effect;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_system_prompt_lists_every_kind() {
        let prompt = system_prompt();
        for kind in EffectKind::ALL {
            assert!(prompt.contains(kind.as_str()), "missing {}", kind);
        }
    }

    #[test]
    fn test_user_prompt_includes_instruction() {
        let prompt = user_prompt("  add reverb ", None);
        assert!(prompt.contains("Request: add reverb\n"));
        assert!(!prompt.contains("analysis"));
    }

    #[test]
    fn test_schema_is_array() {
        assert_eq!(response_schema()["type"], "array");
    }

    #[test]
    fn test_parse_bare_array() {
        let parsed = parse_response(
            r#"[{"type": "gain", "parameters": {"gain_db": 3}}, {"type": "reverb", "parameters": {}}]"#,
            Some(44100),
        )
        .unwrap();
        assert_eq!(parsed.chain.kinds(), vec![EffectKind::Gain, EffectKind::Reverb]);
        assert_eq!(parsed.dropped(), 0);
    }

    #[test]
    fn test_parse_embedded_array() {
        let text = "Sure! Here is the chain:\n```json\n[{\"type\": \"compressor\", \"parameters\": {\"ratio\": 4}}]\n```";
        let parsed = parse_response(text, None).unwrap();
        match &parsed.chain.effects()[0] {
            Effect::Compression(p) => assert_eq!(p.ratio, 4.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_effects_object() {
        let parsed = parse_response(r#"{"effects": [{"type": "eq", "parameters": {"low": 3}}]}"#, None)
            .unwrap();
        assert_eq!(parsed.chain.kinds(), vec![EffectKind::Eq]);
    }

    #[test]
    fn test_invalid_elements_dropped() {
        let text = r#"[
            {"type": "compression", "parameters": {"ratio": 0}},
            {"type": "flanger", "parameters": {}},
            {"type": "eq", "parameters": {"low": 40}},
            {"type": "gain", "parameters": {"gain_db": -2}}
        ]"#;
        let parsed = parse_response(text, Some(48000)).unwrap();
        assert_eq!(parsed.chain.kinds(), vec![EffectKind::Gain]);
        assert_eq!(parsed.dropped(), 3);
        assert_eq!(parsed.diagnostics.len(), 3);
    }

    #[test]
    fn test_nyquist_checked_with_rate() {
        let text = r#"[{"type": "filter", "parameters": {"filter_type": "lowpass", "cutoff_high": 30000}}]"#;
        assert_eq!(parse_response(text, None).unwrap().chain.len(), 1);
        assert!(parse_response(text, Some(44100)).unwrap().chain.is_empty());
    }

    #[test]
    fn test_misplaced_separation_dropped() {
        let text = r#"[{"type": "source_separation", "parameters": {}}, {"type": "gain", "parameters": {"gain_db": 1}}]"#;
        let parsed = parse_response(text, None).unwrap();
        assert_eq!(parsed.chain.kinds(), vec![EffectKind::Gain]);
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_unparseable_text_is_error() {
        assert!(parse_response("I cannot help with that.", None).is_err());
        assert!(parse_response("[not json]", None).is_err());
    }

    #[test]
    fn test_empty_array_is_empty_chain() {
        let parsed = parse_response("[]", None).unwrap();
        assert!(parsed.chain.is_empty());
        assert_eq!(parsed.dropped(), 0);
    }
}
