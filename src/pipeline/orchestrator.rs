//! Pipeline Orchestrator
//!
//! Runs a request end to end: fingerprint, cache lookup, chain building,
//! single pass or chunked execution, encoding, analysis and cache writes.
//! Concurrent identical requests share one computation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::{BuiltChain, ChainBuilder, ChainSource, InstructionProcessor};
use crate::analysis::{AnalysisResult, Analyzer, WaveformPreview};
use crate::cache::{CacheKey, CacheManager, CacheNamespace, Resolution};
use crate::dsp::{EffectsChain, ProcessingStep};
use crate::config::PipelineConfig;
use crate::engine::{
    AudioBuffer, AudioCodec, ChunkProcessor, DecodedAudio, DefaultCodec, Executor, OutputFormat,
};
use crate::error::{AudioChatError, Result};

/// Warning attached when an instruction produced no effects
pub const UNMAPPED_INSTRUCTION_WARNING: &str =
    "instruction could not be mapped to effects; audio returned unmodified";

// ============================================================================
// Requests and Responses
// ============================================================================

/// Time range of the input to process, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_s: f64,
    pub end_s: f64,
}

impl Segment {
    pub fn new(start_s: f64, end_s: f64) -> Self {
        Self { start_s, end_s }
    }

    /// Frame range inside a buffer; the end is clamped to the buffer length
    pub fn frame_range(&self, buffer: &AudioBuffer) -> Result<(usize, usize)> {
        if !self.start_s.is_finite() || !self.end_s.is_finite() || self.start_s < 0.0 {
            return Err(AudioChatError::InvalidRequest {
                reason: format!("segment {}..{} is not a valid time range", self.start_s, self.end_s),
            });
        }
        if self.end_s <= self.start_s {
            return Err(AudioChatError::InvalidRequest {
                reason: format!("segment end {} must be after start {}", self.end_s, self.start_s),
            });
        }
        let sr = f64::from(buffer.sample_rate());
        let frames = buffer.num_frames();
        let start = (self.start_s * sr).round() as usize;
        let end = ((self.end_s * sr).round() as usize).min(frames);
        if start >= end {
            return Err(AudioChatError::InvalidRequest {
                reason: format!(
                    "segment starts at {:.3}s but the audio lasts {:.3}s",
                    self.start_s,
                    buffer.duration_secs()
                ),
            });
        }
        Ok((start, end))
    }
}

/// One processing request
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub file_bytes: Vec<u8>,
    pub instruction: String,
    /// Bypasses the instruction processor when set
    pub explicit_effects: Option<EffectsChain>,
    pub segment: Option<Segment>,
    pub output: OutputFormat,
}

impl ProcessRequest {
    pub fn new(file_bytes: Vec<u8>, instruction: impl Into<String>) -> Self {
        Self {
            file_bytes,
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_effects(mut self, chain: EffectsChain) -> Self {
        self.explicit_effects = Some(chain);
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segment = Some(segment);
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Cache fingerprint of this request
    pub fn fingerprint(&self) -> CacheKey {
        let output = serde_json::to_string(&self.output).unwrap_or_default();
        CacheKey::for_request(
            &self.file_bytes,
            &self.instruction,
            self.explicit_effects.as_ref(),
            self.segment.map(|s| (s.start_s, s.end_s)),
            &output,
        )
    }
}

/// Result of a processing request
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResponse {
    pub audio_bytes: Vec<u8>,
    /// Human readable step descriptions
    pub steps: Vec<String>,
    pub step_log: Vec<ProcessingStep>,
    /// Analysis of the output audio
    pub analysis: Option<AnalysisResult>,
    /// Analysis of the input audio
    pub original_analysis: Option<AnalysisResult>,
    /// Encoded stems of a separation chain
    pub stems: BTreeMap<String, Vec<u8>>,
    pub warnings: Vec<String>,
    pub cache_hit: bool,
    pub fingerprint: CacheKey,
    /// `None` for responses served from cache entries written before
    /// provenance was recorded
    pub source: Option<ChainSource>,
    pub diagnostics: Vec<String>,
}

// ============================================================================
// Cache Entries
// ============================================================================

/// Header stored in front of the encoded audio in the audio namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AudioEntryHeader {
    step_log: Vec<ProcessingStep>,
    stems: Vec<String>,
    warnings: Vec<String>,
    source: Option<ChainSource>,
    diagnostics: Vec<String>,
}

/// Analysis namespace entry for a processed request
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessedAnalysis {
    analysis: Option<AnalysisResult>,
    original_analysis: Option<AnalysisResult>,
}

/// `[u32 LE header length][header JSON][audio bytes]`
fn frame_entry(header: &AudioEntryHeader, audio: &[u8]) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(header)?;
    let mut out = Vec::with_capacity(4 + header.len() + audio.len());
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(audio);
    Ok(out)
}

fn unframe_entry(bytes: &[u8]) -> Option<(AudioEntryHeader, &[u8])> {
    let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let header = bytes.get(4..4 + len)?;
    let header = serde_json::from_slice(header).ok()?;
    Some((header, &bytes[4 + len..]))
}

fn stem_key(key: &CacheKey, name: &str) -> CacheKey {
    key.derive(&format!("stem/{}", name))
}

fn waveform_key(bytes: &[u8], points: usize) -> CacheKey {
    CacheKey::builder("waveform")
        .field("audio", &crate::cache::content_hash(bytes))
        .field("points", &points.to_string())
        .finish()
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Collaborators of the orchestrator
///
/// The executor used for every chain run lives inside `chunker`, which
/// falls back to a single pass when chunking does not apply.
pub struct PipelineDeps {
    pub chain_builder: Arc<dyn ChainBuilder>,
    pub codec: Arc<dyn AudioCodec>,
    pub cache: Arc<CacheManager>,
    pub chunker: Arc<ChunkProcessor>,
    pub analyzer: Analyzer,
}

/// End-to-end request runner
pub struct Orchestrator {
    deps: PipelineDeps,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cache", &self.deps.cache)
            .field("chunker", &self.deps.chunker)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Default collaborators wired from configuration: HTTP provider when
    /// a key is available, filesystem cache, default codec
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let chunker = ChunkProcessor::new(config.chunking.clone(), Executor::new())?;
        Ok(Self::new(PipelineDeps {
            chain_builder: Arc::new(InstructionProcessor::from_config(
                &config.provider,
                config.analysis.clone(),
            )),
            codec: Arc::new(DefaultCodec),
            cache: Arc::new(CacheManager::open(config.cache.clone())?),
            chunker: Arc::new(chunker),
            analyzer: Analyzer::new(config.analysis.clone()),
        }))
    }

    pub fn cache(&self) -> &CacheManager {
        &self.deps.cache
    }

    /// Process a request, serving it from cache when possible
    ///
    /// # Errors
    /// Decode, parameter and encode failures are returned. Analysis
    /// failures and cache write failures only produce warnings.
    pub fn process(&self, request: &ProcessRequest) -> Result<ProcessResponse> {
        let key = request.fingerprint();
        info!(
            fingerprint = %key,
            instruction = %request.instruction,
            explicit = request.explicit_effects.is_some(),
            "processing request"
        );

        let (mut response, resolution) = self.deps.cache.get_or_compute(
            CacheNamespace::Audio,
            &key,
            |cache| self.lookup(cache, request, &key),
            |cache| self.compute(cache, request, &key),
        )?;
        response.cache_hit = resolution != Resolution::Computed;
        debug!(fingerprint = %key, ?resolution, "request resolved");
        Ok(response)
    }

    /// Analysis of the input audio
    pub fn analyze(&self, file_bytes: &[u8]) -> Result<AnalysisResult> {
        let key = CacheKey::for_content("analysis", file_bytes);
        let (result, _) = self.deps.cache.get_or_compute(
            CacheNamespace::Analysis,
            &key,
            |cache| cache.get_json(CacheNamespace::Analysis, &key),
            |cache| {
                let decoded = self.deps.codec.decode(file_bytes)?;
                let result = self.deps.analyzer.analyze(&decoded.buffer)?;
                if let Err(e) = cache.put_json(CacheNamespace::Analysis, &key, &result) {
                    warn!(error = %e, "cannot cache analysis");
                }
                Ok(result)
            },
        )?;
        Ok(result)
    }

    /// Peak envelope of the input audio
    pub fn waveform(&self, file_bytes: &[u8], points: usize) -> Result<WaveformPreview> {
        let key = waveform_key(file_bytes, points);
        let (preview, _) = self.deps.cache.get_or_compute(
            CacheNamespace::Waveform,
            &key,
            |cache| cache.get_json(CacheNamespace::Waveform, &key),
            |cache| {
                let decoded = self.deps.codec.decode(file_bytes)?;
                let preview = WaveformPreview::generate(&decoded.buffer, points)?;
                if let Err(e) = cache.put_json(CacheNamespace::Waveform, &key, &preview) {
                    warn!(error = %e, "cannot cache waveform");
                }
                Ok(preview)
            },
        )?;
        Ok(preview)
    }

    // ------------------------------------------------------------------------
    // Cache path
    // ------------------------------------------------------------------------

    fn lookup(
        &self,
        cache: &CacheManager,
        request: &ProcessRequest,
        key: &CacheKey,
    ) -> Option<ProcessResponse> {
        let entry = cache.get(CacheNamespace::Audio, key)?;
        let Some((header, audio)) = unframe_entry(&entry) else {
            warn!(fingerprint = %key, "unreadable audio entry header, recomputing");
            return None;
        };

        let mut stems = BTreeMap::new();
        for name in &header.stems {
            // A missing stem invalidates the whole entry
            stems.insert(name.clone(), cache.get(CacheNamespace::Audio, &stem_key(key, name))?);
        }

        let processed = match cache.get_json::<ProcessedAnalysis>(CacheNamespace::Analysis, key) {
            Some(processed) => processed,
            None => {
                debug!(fingerprint = %key, "analysis missing for cached audio, recomputing it");
                let processed = ProcessedAnalysis {
                    analysis: self.analyze_encoded(audio),
                    original_analysis: self.analyze(&request.file_bytes).ok(),
                };
                if let Err(e) = cache.put_json(CacheNamespace::Analysis, key, &processed) {
                    warn!(error = %e, "cannot cache analysis");
                }
                processed
            }
        };

        Some(ProcessResponse {
            audio_bytes: audio.to_vec(),
            steps: header.step_log.iter().map(|s| s.description.clone()).collect(),
            step_log: header.step_log,
            analysis: processed.analysis,
            original_analysis: processed.original_analysis,
            stems,
            warnings: header.warnings,
            cache_hit: true,
            fingerprint: key.clone(),
            source: header.source,
            diagnostics: header.diagnostics,
        })
    }

    fn analyze_encoded(&self, audio: &[u8]) -> Option<AnalysisResult> {
        let decoded = self.deps.codec.decode(audio).ok()?;
        self.deps.analyzer.analyze(&decoded.buffer).ok()
    }

    // ------------------------------------------------------------------------
    // Compute path
    // ------------------------------------------------------------------------

    fn compute(
        &self,
        cache: &CacheManager,
        request: &ProcessRequest,
        key: &CacheKey,
    ) -> Result<ProcessResponse> {
        let decoded = self.deps.codec.decode(&request.file_bytes)?;
        let range = request
            .segment
            .map(|s| s.frame_range(&decoded.buffer))
            .transpose()?;

        let mut warnings = Vec::new();
        let original_analysis = self.input_analysis(cache, request, &decoded, &mut warnings);

        let built = match &request.explicit_effects {
            Some(chain) => BuiltChain::explicit(chain.clone()),
            None => self
                .deps
                .chain_builder
                .build_chain(&request.instruction, original_analysis.as_ref()),
        };
        if let Some(reason) = &built.provider_error {
            warnings.push(format!("language model unavailable, used keyword rules: {}", reason));
        }
        if built.chain.is_empty()
            && !request.instruction.trim().is_empty()
            && built.source == ChainSource::Heuristic
        {
            warnings.push(UNMAPPED_INSTRUCTION_WARNING.to_string());
        }

        let target = match range {
            Some((start, end)) => decoded.buffer.slice(start, end),
            None => decoded.buffer.clone(),
        };
        let output = self.deps.chunker.process(&target, &built.chain)?;
        let processed = match range {
            Some((start, _)) => decoded.buffer.splice(start, &output.buffer)?,
            None => output.buffer,
        };

        let spec = request.output.resolve(&decoded);
        let audio_bytes = self.deps.codec.encode(&processed, &spec)?;
        let mut stems = BTreeMap::new();
        for (name, stem) in output.stems.unwrap_or_default() {
            stems.insert(name, self.deps.codec.encode(&stem, &spec)?);
        }

        let analysis = match self.deps.analyzer.analyze(&processed) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "output analysis failed");
                warnings.push(format!("output analysis unavailable: {}", e));
                None
            }
        };

        info!(
            fingerprint = %key,
            effects = built.chain.len(),
            stems = stems.len(),
            bytes = audio_bytes.len(),
            "request processed"
        );

        let response = ProcessResponse {
            audio_bytes,
            steps: output.steps.iter().map(|s| s.description.clone()).collect(),
            step_log: output.steps,
            analysis,
            original_analysis,
            stems,
            warnings,
            cache_hit: false,
            fingerprint: key.clone(),
            source: Some(built.source),
            diagnostics: built.diagnostics,
        };
        self.store(cache, key, &response);
        Ok(response)
    }

    /// Input analysis through the content-keyed cache; failures become warnings
    fn input_analysis(
        &self,
        cache: &CacheManager,
        request: &ProcessRequest,
        decoded: &DecodedAudio,
        warnings: &mut Vec<String>,
    ) -> Option<AnalysisResult> {
        let key = CacheKey::for_content("analysis", &request.file_bytes);
        if let Some(result) = cache.get_json(CacheNamespace::Analysis, &key) {
            return Some(result);
        }
        match self.deps.analyzer.analyze(&decoded.buffer) {
            Ok(result) => {
                if let Err(e) = cache.put_json(CacheNamespace::Analysis, &key, &result) {
                    warn!(error = %e, "cannot cache input analysis");
                }
                Some(result)
            }
            Err(e) => {
                warn!(error = %e, "input analysis failed");
                warnings.push(format!("input analysis unavailable: {}", e));
                None
            }
        }
    }

    /// Write stems first and the main entry last, so a visible main entry
    /// always has its stems
    fn store(&self, cache: &CacheManager, key: &CacheKey, response: &ProcessResponse) {
        let result = (|| -> Result<()> {
            for (name, bytes) in &response.stems {
                cache.put(CacheNamespace::Audio, &stem_key(key, name), bytes)?;
            }
            cache.put_json(
                CacheNamespace::Analysis,
                key,
                &ProcessedAnalysis {
                    analysis: response.analysis.clone(),
                    original_analysis: response.original_analysis.clone(),
                },
            )?;
            let header = AudioEntryHeader {
                step_log: response.step_log.clone(),
                stems: response.stems.keys().cloned().collect(),
                warnings: response.warnings.clone(),
                source: response.source.clone(),
                diagnostics: response.diagnostics.clone(),
            };
            cache.put(
                CacheNamespace::Audio,
                key,
                &frame_entry(&header, &response.audio_bytes)?,
            )
        })();
        if let Err(e) = result {
            warn!(fingerprint = %key, error = %e, "cannot cache processed audio");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
