//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::info;

use crate::analysis::AnalysisResult;
use crate::cache::CacheManager;
use crate::config::PipelineConfig;
use crate::dsp::{EffectKind, EffectsChain};
use crate::engine::OutputFormat;
use crate::error::{AudioChatError, Result};
use crate::pipeline::{Orchestrator, ProcessRequest, Segment};

/// Options of the `process` command
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub input: PathBuf,
    pub instruction: String,
    pub effects: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub segment: Option<Segment>,
    pub bit_depth: Option<u16>,
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| AudioChatError::Io(std::io::Error::new(
        e.kind(),
        format!("cannot read {}: {}", path.display(), e),
    )))
}

/// `<input stem>_processed.wav` next to the input
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{}_processed.wav", stem))
}

fn print_analysis(label: &str, analysis: &AnalysisResult) {
    println!("{}:", label);
    println!(
        "  Duration: {:.2}s, {} Hz, {} channel(s)",
        analysis.duration_secs, analysis.sample_rate, analysis.channels
    );
    println!(
        "  Peak: {:.1} dBFS, RMS: {:.1} dBFS, crest factor {:.2}",
        analysis.peak_db(),
        analysis.rms_db(),
        analysis.crest_factor
    );
    println!(
        "  Spectral centroid: {:.0} Hz, rolloff: {:.0} Hz",
        analysis.spectral_centroid_hz, analysis.spectral_rolloff_hz
    );
    println!("  Key: {}", analysis.estimated_key);
    if analysis.estimated_tempo_bpm > 0.0 {
        println!("  Tempo: {:.1} BPM", analysis.estimated_tempo_bpm);
    }
    println!("  {}", analysis.summary());
}

/// Process a file and write the result (and any stems) next to it
pub fn process(config: &PipelineConfig, options: &ProcessOptions) -> Result<()> {
    info!(input = %options.input.display(), "processing file");

    let file_bytes = read_input(&options.input)?;
    let mut request = ProcessRequest::new(file_bytes, options.instruction.clone()).with_output(
        OutputFormat {
            container: None,
            bit_depth: options.bit_depth,
        },
    );
    if let Some(path) = &options.effects {
        let text = std::fs::read_to_string(path)?;
        request = request.with_effects(EffectsChain::from_json_str(&text)?);
    }
    if let Some(segment) = options.segment {
        request = request.with_segment(segment);
    }

    let orchestrator = Orchestrator::from_config(config)?;
    let response = orchestrator.process(&request)?;

    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&options.input));
    std::fs::write(&output_path, &response.audio_bytes)?;

    println!("=== Audiochat ===");
    println!("Input: {}", options.input.display());
    println!("Output: {}", output_path.display());
    if response.cache_hit {
        println!("(served from cache)");
    }
    println!();

    if response.step_log.is_empty() {
        println!("No effects applied.");
    } else {
        println!("Applied effects:");
        for step in &response.step_log {
            println!("  {}. [{}] {}", step.index + 1, step.effect_type.as_str(), step.description);
        }
    }

    for (name, bytes) in &response.stems {
        let stem_path = output_path.with_file_name(format!(
            "{}_{}.wav",
            output_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output"),
            name
        ));
        std::fs::write(&stem_path, bytes)?;
        println!("Stem '{}' saved to: {}", name, stem_path.display());
    }

    if !response.diagnostics.is_empty() {
        println!();
        println!("Notes:");
        for note in &response.diagnostics {
            println!("  - {}", note);
        }
    }
    if !response.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &response.warnings {
            println!("  - {}", warning);
        }
    }

    if let Some(analysis) = &response.original_analysis {
        println!();
        print_analysis("Input analysis", analysis);
    }
    if let Some(analysis) = &response.analysis {
        println!();
        print_analysis("Output analysis", analysis);
    }

    Ok(())
}

/// Print the analysis of a file
pub fn analyze(config: &PipelineConfig, input: &Path) -> Result<()> {
    let file_bytes = read_input(input)?;
    let analysis = Orchestrator::from_config(config)?.analyze(&file_bytes)?;
    print_analysis(&input.display().to_string(), &analysis);
    Ok(())
}

/// Print the waveform preview of a file as JSON
pub fn waveform(config: &PipelineConfig, input: &Path, points: usize) -> Result<()> {
    let file_bytes = read_input(input)?;
    let preview = Orchestrator::from_config(config)?.waveform(&file_bytes, points)?;
    println!("{}", serde_json::to_string(&preview)?);
    Ok(())
}

/// Registered effect kinds with defaults and parameter domains
pub fn effects_catalog() -> serde_json::Value {
    let kinds: Vec<_> = EffectKind::ALL
        .iter()
        .map(|kind| {
            json!({
                "type": kind.as_str(),
                "defaults": kind.default_effect().parameters(),
                "domains": kind.parameter_domains(),
                "chunkable": kind.is_chunkable(),
                "terminal": kind.is_terminal(),
            })
        })
        .collect();
    serde_json::Value::Array(kinds)
}

pub fn list_effects() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&effects_catalog())?);
    Ok(())
}

pub fn cache_stats(config: &PipelineConfig) -> Result<()> {
    let stats = CacheManager::open(config.cache.clone())?.stats()?;
    println!("Cache: {}", config.cache.dir.display());
    for (namespace, count) in &stats.entries {
        println!("  {}: {} entries", namespace, count);
    }
    Ok(())
}

pub fn cache_sweep(config: &PipelineConfig, max_age_days: Option<u32>) -> Result<()> {
    let manager = CacheManager::open(config.cache.clone())?;
    let max_age = match max_age_days {
        Some(days) => chrono::Duration::days(i64::from(days)),
        None => config.cache.max_age(),
    };
    let report = manager.sweep(max_age)?;
    println!(
        "Removed {} entries ({} bytes), kept {}",
        report.removed, report.bytes_freed, report.kept
    );
    Ok(())
}

pub fn cache_clear(config: &PipelineConfig) -> Result<()> {
    let removed = CacheManager::open(config.cache.clone())?.clear()?;
    println!("Removed {} entries from {}", removed, config.cache.dir.display());
    Ok(())
}
