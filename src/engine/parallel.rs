//! Parallel Chunk Processor
//!
//! Long buffers are cut into overlapping chunks, each chunk runs through
//! the same chain on a bounded rayon pool, and the results are stitched
//! back in chunk order with a crossfade over each overlap. Chains with a
//! non-chunkable effect always run in a single pass.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::executor::{ChainOutput, Executor};
use super::AudioBuffer;
use crate::dsp::EffectsChain;
use crate::error::{AudioChatError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Blend shape across chunk overlaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeCurve {
    /// Weights sum to one: identity chains reassemble exactly
    #[default]
    Linear,
    /// Constant power for uncorrelated material
    EqualPower,
}

impl CrossfadeCurve {
    /// Weight of the incoming chunk at position `t` in 0..1
    fn fade_in(&self, t: f32) -> f32 {
        match self {
            CrossfadeCurve::Linear => t,
            CrossfadeCurve::EqualPower => (t * std::f32::consts::FRAC_PI_2).sin(),
        }
    }

    fn fade_out(&self, t: f32) -> f32 {
        self.fade_in(1.0 - t)
    }
}

/// Chunking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Buffers longer than this are chunked
    pub threshold_secs: f64,
    pub chunk_secs: f64,
    pub overlap_secs: f64,
    /// Worker count, `None` for one per core
    pub max_workers: Option<usize>,
    pub crossfade: CrossfadeCurve,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 30.0,
            chunk_secs: 10.0,
            overlap_secs: 0.5,
            max_workers: None,
            crossfade: CrossfadeCurve::Linear,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(AudioChatError::Config { reason });
        if !(self.threshold_secs.is_finite() && self.threshold_secs > 0.0) {
            return invalid(format!("threshold_secs must be > 0, got {}", self.threshold_secs));
        }
        if !(self.overlap_secs.is_finite() && self.overlap_secs > 0.0) {
            return invalid(format!("overlap_secs must be > 0, got {}", self.overlap_secs));
        }
        // Each frame may belong to at most two chunks
        if !(self.chunk_secs.is_finite() && self.chunk_secs > 2.0 * self.overlap_secs) {
            return invalid(format!(
                "chunk_secs ({}) must exceed twice overlap_secs ({})",
                self.chunk_secs, self.overlap_secs
            ));
        }
        if self.max_workers == Some(0) {
            return invalid("max_workers must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

// ============================================================================
// Chunk Planning
// ============================================================================

/// Frame range of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl ChunkSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

// ============================================================================
// Processor
// ============================================================================

/// Chunked, parallel chain execution
pub struct ChunkProcessor {
    config: ChunkConfig,
    executor: Executor,
    pool: rayon::ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for ChunkProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkProcessor")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .finish()
    }
}

impl ChunkProcessor {
    pub fn new(config: ChunkConfig, executor: Executor) -> Result<Self> {
        config.validate()?;
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("audiochat-chunk-{}", i))
            .build()
            .map_err(|e| AudioChatError::Config {
                reason: format!("cannot build worker pool: {}", e),
            })?;
        Ok(Self {
            config,
            executor,
            pool,
            workers,
        })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Chunk only long buffers whose chain is fully chunkable
    pub fn should_chunk(&self, buffer: &AudioBuffer, chain: &EffectsChain) -> bool {
        !chain.is_empty()
            && buffer.duration_secs() > self.config.threshold_secs
            && chain.is_chunkable()
    }

    /// Split `frames` into chunks of `chunk_secs` stepping by
    /// `chunk_secs - overlap_secs`. The last chunk may be short.
    pub fn plan_chunks(&self, frames: usize, sample_rate: u32) -> Vec<ChunkSpan> {
        let chunk = ((self.config.chunk_secs * sample_rate as f64).round() as usize).max(1);
        let overlap = ((self.config.overlap_secs * sample_rate as f64).round() as usize)
            .min(chunk.saturating_sub(1) / 2);
        let step = chunk - overlap;

        let mut spans = Vec::new();
        let mut start = 0;
        while start < frames {
            let end = (start + chunk).min(frames);
            spans.push(ChunkSpan {
                index: spans.len(),
                start,
                end,
            });
            if end == frames {
                break;
            }
            start += step;
        }
        spans
    }

    /// Apply `chain`, chunked when `should_chunk` allows it
    pub fn process(&self, buffer: &AudioBuffer, chain: &EffectsChain) -> Result<ChainOutput> {
        if !self.should_chunk(buffer, chain) {
            return self.executor.apply(buffer, chain);
        }
        // Fail fast before fanning out
        chain.validate_for_rate(buffer.sample_rate())?;

        let spans = self.plan_chunks(buffer.num_frames(), buffer.sample_rate());
        debug!(
            chunks = spans.len(),
            workers = self.workers,
            duration_secs = buffer.duration_secs(),
            "processing in chunks"
        );

        let (tx, rx) = mpsc::channel();
        let executor = &self.executor;
        self.pool.scope(|scope| {
            for span in &spans {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let chunk = buffer.slice(span.start, span.end);
                    let _ = tx.send((span.index, executor.apply(&chunk, chain)));
                });
            }
        });
        drop(tx);

        // Workers finish in any order; the arena restores chunk order
        let mut arena: Vec<Option<Result<ChainOutput>>> = spans.iter().map(|_| None).collect();
        for (index, result) in rx {
            arena[index] = Some(result);
        }

        let mut outputs = Vec::with_capacity(spans.len());
        for (index, slot) in arena.into_iter().enumerate() {
            match slot {
                Some(Ok(output)) => outputs.push(output),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(AudioChatError::InvalidChain {
                        reason: format!("chunk {} produced no result", index),
                    })
                }
            }
        }

        let steps = outputs
            .first()
            .map(|o| o.steps.clone())
            .unwrap_or_default();
        let buffer = self.stitch(buffer, &spans, &outputs)?;
        Ok(ChainOutput {
            buffer,
            steps,
            stems: None,
        })
    }

    fn stitch(
        &self,
        original: &AudioBuffer,
        spans: &[ChunkSpan],
        outputs: &[ChainOutput],
    ) -> Result<AudioBuffer> {
        let curve = self.config.crossfade;
        let frames = original.num_frames();
        let mut channels = vec![vec![0.0_f32; frames]; original.num_channels()];

        for (i, (span, output)) in spans.iter().zip(outputs).enumerate() {
            let len = span.len();
            let head = if i > 0 {
                spans[i - 1].end.saturating_sub(span.start)
            } else {
                0
            };
            let tail = spans
                .get(i + 1)
                .map_or(0, |next| span.end.saturating_sub(next.start));

            for (out, chunk) in channels.iter_mut().zip(output.buffer.channels()) {
                for (j, &sample) in chunk.iter().enumerate().take(len) {
                    let mut w = 1.0;
                    if j < head {
                        w *= curve.fade_in((j as f32 + 0.5) / head as f32);
                    }
                    if tail > 0 && j >= len - tail {
                        let k = j - (len - tail);
                        w *= curve.fade_out((k as f32 + 0.5) / tail as f32);
                    }
                    out[span.start + j] += sample * w;
                }
            }
        }

        original.with_channels(channels)
    }
}

// ============================================================================
// Tests
// ============================================================================
