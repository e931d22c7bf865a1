//! Instruction processor
//!
//! Turns an instruction (plus optional analysis) into an effects chain.
//! The language model is tried first under a hard timeout; any failure,
//! timeout or unparseable answer falls back to the heuristic mapper.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::heuristics::HeuristicMapper;
use super::prompt::{parse_response, response_schema, system_prompt, user_prompt};
use super::provider::{HttpProvider, LanguageModelProvider, ProviderConfig, ProviderRequest};
use crate::analysis::{AnalysisConfig, AnalysisResult};
use crate::dsp::EffectsChain;
use crate::error::{AudioChatError, Result};

/// Where a chain came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainSource {
    LanguageModel { provider: String },
    Heuristic,
    Explicit,
}

/// A chain plus how it was built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltChain {
    pub chain: EffectsChain,
    pub source: ChainSource,
    /// Dropped effects and other non-fatal notes
    pub diagnostics: Vec<String>,
    /// Set when the provider failed and the heuristic path ran
    pub provider_error: Option<String>,
}

impl BuiltChain {
    /// Wrap a caller-supplied chain
    pub fn explicit(chain: EffectsChain) -> Self {
        Self {
            chain,
            source: ChainSource::Explicit,
            diagnostics: Vec::new(),
            provider_error: None,
        }
    }
}

/// Anything that can map instructions to chains
pub trait ChainBuilder: Send + Sync {
    fn build_chain(&self, instruction: &str, analysis: Option<&AnalysisResult>) -> BuiltChain;
}

/// Language model first, heuristic rules as fallback
pub struct InstructionProcessor {
    provider: Option<Arc<dyn LanguageModelProvider>>,
    timeout: Duration,
    temperature: f32,
    heuristics: HeuristicMapper,
}

impl std::fmt::Debug for InstructionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionProcessor")
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl InstructionProcessor {
    pub fn new(
        provider: Option<Arc<dyn LanguageModelProvider>>,
        config: &ProviderConfig,
        analysis: AnalysisConfig,
    ) -> Self {
        Self {
            provider,
            timeout: Duration::from_millis(config.timeout_ms),
            temperature: config.temperature,
            heuristics: HeuristicMapper::new(analysis),
        }
    }

    /// Processor with the HTTP provider the configuration names, if its
    /// API key is available
    pub fn from_config(config: &ProviderConfig, analysis: AnalysisConfig) -> Self {
        let provider = HttpProvider::from_config(config)
            .map(|p| Arc::new(p) as Arc<dyn LanguageModelProvider>);
        if provider.is_none() {
            debug!(kind = config.kind.as_str(), "no language-model provider; heuristic mapping only");
        }
        Self::new(provider, config, analysis)
    }

    /// Processor without a provider
    pub fn heuristic_only(analysis: AnalysisConfig) -> Self {
        Self::new(None, &ProviderConfig::disabled(), analysis)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Call the provider on a helper thread and wait at most `timeout`
    ///
    /// A late answer is discarded when the thread finally sends it.
    fn ask_provider(
        &self,
        provider: &Arc<dyn LanguageModelProvider>,
        request: ProviderRequest,
    ) -> Result<String> {
        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(provider);
        thread::Builder::new()
            .name("audiochat-llm".to_string())
            .spawn(move || {
                let _ = tx.send(worker.complete(&request));
            })
            .map_err(|e| AudioChatError::Provider {
                provider: provider.name().to_string(),
                reason: format!("cannot start provider thread: {}", e),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(AudioChatError::ProviderTimeout {
                provider: provider.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(AudioChatError::Provider {
                provider: provider.name().to_string(),
                reason: "provider thread exited without answering".to_string(),
            }),
        }
    }

    fn from_language_model(
        &self,
        provider: &Arc<dyn LanguageModelProvider>,
        instruction: &str,
        analysis: Option<&AnalysisResult>,
    ) -> Result<BuiltChain> {
        let request = ProviderRequest {
            system: system_prompt(),
            prompt: user_prompt(instruction, analysis),
            schema: response_schema(),
            temperature: self.temperature,
        };
        let text = self.ask_provider(provider, request)?;
        let parsed = parse_response(&text, analysis.map(|a| a.sample_rate))?;

        if parsed.chain.is_empty() && parsed.dropped() > 0 {
            return Err(AudioChatError::Provider {
                provider: provider.name().to_string(),
                reason: format!("all {} proposed effects were invalid", parsed.total),
            });
        }

        Ok(BuiltChain {
            chain: parsed.chain,
            source: ChainSource::LanguageModel {
                provider: provider.name().to_string(),
            },
            diagnostics: parsed.diagnostics,
            provider_error: None,
        })
    }
}

impl ChainBuilder for InstructionProcessor {
    fn build_chain(&self, instruction: &str, analysis: Option<&AnalysisResult>) -> BuiltChain {
        if instruction.trim().is_empty() {
            return BuiltChain {
                chain: EffectsChain::empty(),
                source: ChainSource::Heuristic,
                diagnostics: vec!["empty instruction".to_string()],
                provider_error: None,
            };
        }

        let provider_error = match &self.provider {
            Some(provider) => match self.from_language_model(provider, instruction, analysis) {
                Ok(built) => {
                    debug!(
                        provider = provider.name(),
                        effects = built.chain.len(),
                        dropped = built.diagnostics.len(),
                        "chain built by language model"
                    );
                    return built;
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        code = e.error_code(),
                        "language model failed, using heuristic mapping"
                    );
                    Some(e.to_string())
                }
            },
            None => None,
        };

        let outcome = self.heuristics.build(instruction, analysis);
        BuiltChain {
            chain: outcome.chain,
            source: ChainSource::Heuristic,
            diagnostics: outcome.diagnostics,
            provider_error,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::{MockProvider, MockReply};
    use crate::dsp::EffectKind;
    use pretty_assertions::assert_eq;

    fn quiet_analysis() -> AnalysisResult {
        AnalysisResult {
            duration_secs: 2.0,
            sample_rate: 44100,
            channels: 1,
            peak_level: 0.02,
            rms_level: 0.01,
            crest_factor: 2.0,
            spectral_centroid_hz: 800.0,
            spectral_rolloff_hz: 2000.0,
            noise_floor: 0.0005,
            estimated_key: "A minor".to_string(),
            estimated_tempo_bpm: 100.0,
            clip_ratio: 0.0,
            is_clipping: false,
            is_too_quiet: true,
        }
    }

    fn processor(mock: Arc<MockProvider>) -> InstructionProcessor {
        InstructionProcessor::new(
            Some(mock as Arc<dyn LanguageModelProvider>),
            &ProviderConfig::default(),
            AnalysisConfig::default(),
        )
    }

    #[test]
    fn test_language_model_path() {
        let mock = Arc::new(MockProvider::text(
            r#"[{"type": "reverb", "parameters": {"room_size": 0.8}}]"#,
        ));
        let built = processor(mock.clone()).build_chain("add a big reverb", None);
        assert_eq!(built.chain.kinds(), vec![EffectKind::Reverb]);
        assert_eq!(
            built.source,
            ChainSource::LanguageModel {
                provider: "mock".to_string()
            }
        );
        assert_eq!(mock.calls(), 1);
        assert!(mock.last_request().unwrap().prompt.contains("add a big reverb"));
    }

    #[test]
    fn test_provider_failure_falls_back() {
        let mock = Arc::new(MockProvider::failing("503"));
        let built = processor(mock).build_chain("make it louder", Some(&quiet_analysis()));
        assert_eq!(built.source, ChainSource::Heuristic);
        assert!(built.provider_error.unwrap().contains("503"));
        assert!(built.chain.kinds().contains(&EffectKind::Gain));
    }

    #[test]
    fn test_unparseable_answer_falls_back() {
        let mock = Arc::new(MockProvider::text("Sorry, I can't do that."));
        let built = processor(mock).build_chain("make it louder", Some(&quiet_analysis()));
        assert_eq!(built.source, ChainSource::Heuristic);
        assert!(built.provider_error.is_some());
    }

    #[test]
    fn test_all_invalid_answer_falls_back() {
        let mock = Arc::new(MockProvider::text(
            r#"[{"type": "compression", "parameters": {"ratio": 0}}]"#,
        ));
        let built = processor(mock).build_chain("make it louder", Some(&quiet_analysis()));
        assert_eq!(built.source, ChainSource::Heuristic);
        assert_eq!(built.chain.kinds(), vec![EffectKind::Gain]);
    }

    #[test]
    fn test_timeout_falls_back() {
        let mock = Arc::new(MockProvider::new(vec![MockReply::Delayed(
            Duration::from_millis(500),
            "[]".to_string(),
        )]));
        let built = processor(mock)
            .with_timeout(Duration::from_millis(20))
            .build_chain("make it louder", Some(&quiet_analysis()));
        assert_eq!(built.source, ChainSource::Heuristic);
        assert!(built.provider_error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_no_provider_uses_heuristics() {
        let processor = InstructionProcessor::heuristic_only(AnalysisConfig::default());
        assert!(!processor.has_provider());
        let built = processor.build_chain("make it louder", Some(&quiet_analysis()));
        assert_eq!(built.source, ChainSource::Heuristic);
        assert_eq!(built.provider_error, None);
        assert!(!built.chain.is_empty());
    }

    #[test]
    fn test_no_provider_no_analysis_is_empty() {
        let processor = InstructionProcessor::heuristic_only(AnalysisConfig::default());
        assert!(processor.build_chain("make it louder", None).chain.is_empty());
    }

    #[test]
    fn test_empty_instruction_skips_provider() {
        let mock = Arc::new(MockProvider::text("[]"));
        let built = processor(mock.clone()).build_chain("  ", Some(&quiet_analysis()));
        assert!(built.chain.is_empty());
        assert_eq!(mock.calls(), 0);
    }
}
