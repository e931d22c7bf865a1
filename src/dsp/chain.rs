//! Effects chains
//!
//! An ordered list of effects, applied index 0 first. The only structural
//! rule is that a terminal effect (source separation) must come last.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::effect::{Effect, EffectKind};
use crate::error::{AudioChatError, Result};

/// Loosely typed chain element as written by people and language models
///
/// Accepts `{"type": "gain", "parameters": {...}}` as well as the flat
/// form `{"type": "gain", "gain_db": 6}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEffect {
    #[serde(rename = "type", alias = "effect", alias = "effect_type", alias = "name")]
    pub effect_type: String,
    #[serde(default, alias = "params")]
    pub parameters: Value,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl RawEffect {
    pub fn into_effect(self) -> Result<Effect> {
        let parameters = match self.parameters {
            Value::Null if !self.rest.is_empty() => Value::Object(self.rest),
            other => other,
        };
        Effect::from_parts(&self.effect_type, parameters)
    }
}

/// Ordered effects chain
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<RawEffect>", into = "Vec<Effect>")]
pub struct EffectsChain {
    effects: Vec<Effect>,
}

impl EffectsChain {
    /// Build a chain, checking terminal placement
    pub fn new(effects: Vec<Effect>) -> Result<Self> {
        let last = effects.len().saturating_sub(1);
        if let Some((i, effect)) = effects
            .iter()
            .enumerate()
            .find(|(i, e)| e.kind().is_terminal() && *i != last)
        {
            return Err(AudioChatError::InvalidChain {
                reason: format!(
                    "{} at index {} must be the last effect (chain has {})",
                    effect.kind(),
                    i,
                    effects.len()
                ),
            });
        }
        Ok(Self { effects })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a JSON chain: a bare array or `{"effects": [...]}`
    ///
    /// Every element must parse; errors carry the element index.
    pub fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("effects") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(AudioChatError::InvalidChain {
                        reason: "expected an array of effects".to_string(),
                    })
                }
            },
            _ => {
                return Err(AudioChatError::InvalidChain {
                    reason: "expected an array of effects".to_string(),
                })
            }
        };
        let effects = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let raw: RawEffect = serde_json::from_value(item).map_err(|e| {
                    AudioChatError::InvalidChain {
                        reason: format!("element {}: {}", i, e),
                    }
                })?;
                raw.into_effect().map_err(|e| e.with_effect_index(i))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(effects)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Rebuild the chain that produced a step log
    pub fn from_steps(steps: &[ProcessingStep]) -> Result<Self> {
        Self::new(steps.iter().map(|s| s.effect.clone()).collect())
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn kinds(&self) -> Vec<EffectKind> {
        self.effects.iter().map(Effect::kind).collect()
    }

    /// True when every effect may run on independent chunks
    pub fn is_chunkable(&self) -> bool {
        self.effects.iter().all(|e| e.kind().is_chunkable())
    }

    /// Validate every effect for the given sample rate
    pub fn validate_for_rate(&self, sample_rate: u32) -> Result<()> {
        for (i, effect) in self.effects.iter().enumerate() {
            effect
                .validate_for_rate(sample_rate)
                .map_err(|e| e.with_effect_index(i))?;
        }
        Ok(())
    }

    /// Serialize chain to JSON
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.effects).unwrap_or(Value::Array(Vec::new()))
    }
}

impl TryFrom<Vec<RawEffect>> for EffectsChain {
    type Error = AudioChatError;

    fn try_from(raw: Vec<RawEffect>) -> Result<Self> {
        let effects = raw
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.into_effect().map_err(|e| e.with_effect_index(i)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(effects)
    }
}

impl From<EffectsChain> for Vec<Effect> {
    fn from(chain: EffectsChain) -> Self {
        chain.effects
    }
}

/// One applied effect in the step log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub index: usize,
    pub effect_type: EffectKind,
    pub description: String,
    pub effect: Effect,
}

impl ProcessingStep {
    pub fn new(index: usize, effect: &Effect) -> Self {
        Self {
            index,
            effect_type: effect.kind(),
            description: effect.describe(),
            effect: effect.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{GainParams, SeparationParams};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_deserialize_array() {
        let chain: EffectsChain = serde_json::from_value(json!([
            {"type": "gain", "parameters": {"gain_db": 3.0}},
            {"type": "echo", "parameters": {"time": 0.5}},
            {"type": "reverb"}
        ]))
        .unwrap();
        assert_eq!(
            chain.kinds(),
            vec![EffectKind::Gain, EffectKind::Delay, EffectKind::Reverb]
        );
    }

    #[test]
    fn test_flat_element() {
        let chain = EffectsChain::from_value(json!({"effects": [{"type": "gain", "gain_db": -4.0}]}))
            .unwrap();
        assert_eq!(chain.effects()[0], Effect::Gain(GainParams::new(-4.0)));
    }

    #[test]
    fn test_separation_must_be_last() {
        let err = EffectsChain::new(vec![
            Effect::SourceSeparation(SeparationParams::default()),
            Effect::Gain(GainParams::new(1.0)),
        ])
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CHAIN");

        assert!(EffectsChain::new(vec![
            Effect::Gain(GainParams::new(1.0)),
            Effect::SourceSeparation(SeparationParams::default()),
        ])
        .is_ok());
    }

    #[test]
    fn test_unknown_effect_carries_index() {
        let err = EffectsChain::from_value(json!([
            {"type": "gain"},
            {"type": "flanger"}
        ]))
        .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_EFFECT");
        assert_eq!(err.effect_index(), Some(1));
    }

    #[test]
    fn test_validate_for_rate_reports_index() {
        let chain = EffectsChain::from_value(json!([
            {"type": "gain", "parameters": {"gain_db": 2.0}},
            {"type": "filter", "parameters": {"filter_type": "lowpass", "cutoff_high": 30000.0}}
        ]))
        .unwrap();
        let err = chain.validate_for_rate(44100).unwrap_err();
        assert_eq!(err.effect_index(), Some(1));
        assert!(chain.validate_for_rate(96000).is_ok());
    }

    #[test]
    fn test_steps_round_trip() {
        let chain = EffectsChain::from_value(json!([
            {"type": "compression"},
            {"type": "limiter"}
        ]))
        .unwrap();
        let steps: Vec<ProcessingStep> = chain
            .iter()
            .enumerate()
            .map(|(i, e)| ProcessingStep::new(i, e))
            .collect();
        assert_eq!(EffectsChain::from_steps(&steps).unwrap(), chain);

        let text = serde_json::to_string(&chain).unwrap();
        assert_eq!(serde_json::from_str::<EffectsChain>(&text).unwrap(), chain);
    }

    #[test]
    fn test_chunkable() {
        let chain = EffectsChain::from_value(json!([{"type": "gain"}, {"type": "eq"}])).unwrap();
        assert!(chain.is_chunkable());
        let chain = EffectsChain::from_value(json!([{"type": "normalize"}])).unwrap();
        assert!(!chain.is_chunkable());
    }
}
