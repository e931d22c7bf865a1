//! Chain Executor
//!
//! Applies an effects chain to a buffer in order and records a step log.
//! The whole chain is validated before the first effect runs, so a bad
//! parameter never leaves a half-processed result behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::AudioBuffer;
use crate::dsp::{EffectKind, EffectOutput, EffectsChain, ProcessingStep};
use crate::error::{AudioChatError, Result};

/// Instrumentation hook called after each effect
pub trait EffectObserver: Send + Sync {
    fn on_effect_applied(&self, index: usize, kind: EffectKind);
}

/// Output of a chain run
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    /// Final audio. For a separation chain this is the pre-separation mix.
    pub buffer: AudioBuffer,
    pub steps: Vec<ProcessingStep>,
    pub stems: Option<BTreeMap<String, AudioBuffer>>,
}

/// Runs effects chains
#[derive(Clone, Default)]
pub struct Executor {
    observer: Option<Arc<dyn EffectObserver>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn EffectObserver>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    /// Apply `chain` to `input`
    ///
    /// # Errors
    /// Parameter errors carry the index of the offending effect. An effect
    /// producing NaN/Inf aborts the chain with `NonFiniteOutput`.
    pub fn apply(&self, input: &AudioBuffer, chain: &EffectsChain) -> Result<ChainOutput> {
        chain.validate_for_rate(input.sample_rate())?;

        let mut current = input.clone();
        let mut steps = Vec::with_capacity(chain.len());
        let mut stems = None;

        for (index, effect) in chain.iter().enumerate() {
            let kind = effect.kind();
            let output = effect
                .process(&current)
                .map_err(|e| e.with_effect_index(index))?;

            match output {
                EffectOutput::Audio(buffer) => {
                    if !buffer.is_finite() {
                        return Err(AudioChatError::NonFiniteOutput {
                            index,
                            effect: kind.to_string(),
                        });
                    }
                    current = buffer;
                }
                EffectOutput::Stems(map) => {
                    if map.values().any(|b| !b.is_finite()) {
                        return Err(AudioChatError::NonFiniteOutput {
                            index,
                            effect: kind.to_string(),
                        });
                    }
                    stems = Some(map);
                }
            }

            debug!(index, effect = %kind, "effect applied");
            if let Some(observer) = &self.observer {
                observer.on_effect_applied(index, kind);
            }
            steps.push(ProcessingStep::new(index, effect));
        }

        Ok(ChainOutput {
            buffer: current,
            steps,
            stems,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{CompressionParams, DistortionParams, Effect, GainParams};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Probe {
        seen: Mutex<Vec<(usize, EffectKind)>>,
    }

    impl EffectObserver for Probe {
        fn on_effect_applied(&self, index: usize, kind: EffectKind) {
            self.seen.lock().unwrap().push((index, kind));
        }
    }

    fn tone() -> AudioBuffer {
        let samples = (0..4410)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        AudioBuffer::mono(samples, 44100).unwrap()
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let input = tone();
        let out = Executor::new().apply(&input, &EffectsChain::empty()).unwrap();
        assert_eq!(out.buffer, input);
        assert!(out.steps.is_empty());
        assert!(out.stems.is_none());
    }

    #[test]
    fn test_steps_and_observer() {
        let probe = Arc::new(Probe::default());
        let executor = Executor::with_observer(probe.clone());
        let chain = EffectsChain::new(vec![
            Effect::Gain(GainParams::new(3.0)),
            Effect::Compression(CompressionParams::default()),
        ])
        .unwrap();
        let out = executor.apply(&tone(), &chain).unwrap();
        assert_eq!(out.steps.len(), 2);
        assert_eq!(out.steps[0].description, "Increased volume by 3.0dB");
        assert_eq!(
            *probe.seen.lock().unwrap(),
            vec![(0, EffectKind::Gain), (1, EffectKind::Compression)]
        );
    }

    #[test]
    fn test_invalid_parameter_rejected_before_processing() {
        let probe = Arc::new(Probe::default());
        let executor = Executor::with_observer(probe.clone());
        let chain = EffectsChain::new(vec![
            Effect::Gain(GainParams::new(3.0)),
            Effect::Compression(CompressionParams {
                ratio: 0.0,
                ..Default::default()
            }),
        ])
        .unwrap();
        let err = executor.apply(&tone(), &chain).unwrap_err();
        assert_eq!(err.error_code(), "PARAMETER_ERROR");
        assert_eq!(err.effect_index(), Some(1));
        assert!(probe.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_overflowing_gain_is_non_finite() {
        let chain = EffectsChain::new(vec![Effect::Gain(GainParams::new(1000.0))]).unwrap();
        let err = Executor::new().apply(&tone(), &chain).unwrap_err();
        assert_eq!(err.error_code(), "NON_FINITE_OUTPUT");
        assert_eq!(err.effect_index(), Some(0));
    }

    #[test]
    fn test_order_matters() {
        let input = tone();
        let gain = Effect::Gain(GainParams::new(12.0));
        let drive = Effect::Distortion(DistortionParams {
            drive: 4.0,
            mix: 1.0,
            ..Default::default()
        });
        let executor = Executor::new();
        let a = executor
            .apply(&input, &EffectsChain::new(vec![gain.clone(), drive.clone()]).unwrap())
            .unwrap();
        let b = executor
            .apply(&input, &EffectsChain::new(vec![drive, gain]).unwrap())
            .unwrap();
        assert!((a.buffer.peak() - b.buffer.peak()).abs() > 0.1);
    }

    #[test]
    fn test_input_untouched() {
        let input = tone();
        let copy = input.clone();
        let chain = EffectsChain::new(vec![Effect::Gain(GainParams::new(-6.0))]).unwrap();
        Executor::new().apply(&input, &chain).unwrap();
        assert_eq!(input, copy);
    }
}
