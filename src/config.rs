//! Pipeline configuration
//!
//! Loaded from an optional JSON file, then overridden by `AUDIOCHAT_*`
//! environment variables. Every section falls back to its defaults when
//! absent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{ProviderConfig, ProviderKind};
use crate::analysis::AnalysisConfig;
use crate::cache::CacheConfig;
use crate::engine::ChunkConfig;
use crate::error::{AudioChatError, Result};

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub chunking: ChunkConfig,
    pub provider: ProviderConfig,
    pub analysis: AnalysisConfig,
}

impl PipelineConfig {
    /// Read a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AudioChatError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| AudioChatError::Config {
            reason: format!("invalid config {}: {}", path.display(), e),
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// File (when given) plus environment overrides, validated
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AUDIOCHAT_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("AUDIOCHAT_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(days) = parse_var(&var, "AUDIOCHAT_CACHE_MAX_AGE_DAYS")? {
            self.cache.max_age_days = days;
        }
        if let Some(workers) = parse_var(&var, "AUDIOCHAT_MAX_WORKERS")? {
            self.chunking.max_workers = Some(workers);
        }
        if let Some(secs) = parse_var(&var, "AUDIOCHAT_CHUNK_THRESHOLD_SECS")? {
            self.chunking.threshold_secs = secs;
        }
        if let Some(name) = var("AUDIOCHAT_LLM_PROVIDER") {
            self.provider.kind = ProviderKind::parse(&name).ok_or_else(|| AudioChatError::Config {
                reason: format!(
                    "AUDIOCHAT_LLM_PROVIDER must be openai, anthropic, google or none, got '{}'",
                    name
                ),
            })?;
        }
        if let Some(model) = var("AUDIOCHAT_LLM_MODEL") {
            self.provider.model = Some(model);
        }
        if let Some(url) = var("AUDIOCHAT_LLM_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(ms) = parse_var(&var, "AUDIOCHAT_LLM_TIMEOUT_MS")? {
            self.provider.timeout_ms = ms;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.provider.validate()?;
        if self.cache.max_age_days == 0 {
            return Err(AudioChatError::Config {
                reason: "cache max_age_days must be at least 1".to_string(),
            });
        }
        let thresholds = [
            ("quiet_rms_threshold", self.analysis.quiet_rms_threshold),
            ("noise_floor_threshold", self.analysis.noise_floor_threshold),
            ("clip_ratio_threshold", self.analysis.clip_ratio_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(AudioChatError::Config {
                    reason: format!("analysis {} must be within 0..=1, got {}", name, value),
                });
            }
        }
        Ok(())
    }
}

fn parse_var<F, T>(var: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| AudioChatError::Config {
            reason: format!("{} has an invalid value '{}'", name, raw),
        }),
    }
}
