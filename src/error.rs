//! Error handling for AudioChat
//!
//! Every failure the pipeline can surface, with a stable error code and
//! recovery suggestions for the calling layer.

use thiserror::Error;

/// Result type alias for AudioChat operations
pub type Result<T> = std::result::Result<T, AudioChatError>;

/// Main error type for AudioChat operations
#[derive(Error, Debug)]
pub enum AudioChatError {
    // Input Errors
    #[error("Cannot decode input audio: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cannot encode output audio: {reason}")]
    Encode { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    // Chain Errors
    #[error("Invalid parameter '{param}' for {effect}: {value} (expected {expected}){}", index_suffix(.index))]
    Parameter {
        index: Option<usize>,
        effect: String,
        param: String,
        value: String,
        expected: String,
    },

    #[error("Unknown effect type '{effect_type}'{}", index_suffix(.index))]
    UnknownEffect {
        index: Option<usize>,
        effect_type: String,
    },

    #[error("Invalid effects chain: {reason}")]
    InvalidChain { reason: String },

    #[error("Effect {effect} at index {index} produced invalid audio (NaN/Inf)")]
    NonFiniteOutput { index: usize, effect: String },

    // Language-Model Errors
    #[error("Provider '{provider}' failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("No language-model provider available: {reason}")]
    ProviderUnavailable { reason: String },

    // Analysis Errors
    #[error("Analysis failed: {reason}")]
    Analysis { reason: String },

    // Cache Errors
    #[error("Cache error: {reason}")]
    Cache { reason: String },

    #[error("In-flight computation for {key} failed: {reason}")]
    InFlightFailed { key: String, reason: String },

    // Configuration Errors
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn index_suffix(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" at chain index {}", i),
        None => String::new(),
    }
}

impl AudioChatError {
    /// Shorthand for a parameter error not yet tied to a chain position
    pub fn parameter(
        effect: &str,
        param: &str,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        AudioChatError::Parameter {
            index: None,
            effect: effect.to_string(),
            param: param.to_string(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    /// Attach the chain index of the failing effect
    pub fn with_effect_index(self, i: usize) -> Self {
        match self {
            AudioChatError::Parameter {
                effect,
                param,
                value,
                expected,
                ..
            } => AudioChatError::Parameter {
                index: Some(i),
                effect,
                param,
                value,
                expected,
            },
            AudioChatError::UnknownEffect { effect_type, .. } => AudioChatError::UnknownEffect {
                index: Some(i),
                effect_type,
            },
            other => other,
        }
    }

    /// Index of the failing effect, when the error came from a chain
    pub fn effect_index(&self) -> Option<usize> {
        match self {
            AudioChatError::Parameter { index, .. } => *index,
            AudioChatError::UnknownEffect { index, .. } => *index,
            AudioChatError::NonFiniteOutput { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            AudioChatError::Decode { .. } => "DECODE_ERROR",
            AudioChatError::Encode { .. } => "ENCODE_ERROR",
            AudioChatError::InvalidRequest { .. } => "INVALID_REQUEST",
            AudioChatError::Parameter { .. } => "PARAMETER_ERROR",
            AudioChatError::UnknownEffect { .. } => "UNKNOWN_EFFECT",
            AudioChatError::InvalidChain { .. } => "INVALID_CHAIN",
            AudioChatError::NonFiniteOutput { .. } => "NON_FINITE_OUTPUT",
            AudioChatError::Provider { .. } => "PROVIDER_ERROR",
            AudioChatError::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            AudioChatError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            AudioChatError::Analysis { .. } => "ANALYSIS_ERROR",
            AudioChatError::Cache { .. } => "CACHE_ERROR",
            AudioChatError::InFlightFailed { .. } => "IN_FLIGHT_FAILED",
            AudioChatError::Config { .. } => "CONFIG_ERROR",
            AudioChatError::Io(_) => "IO_ERROR",
            AudioChatError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the pipeline recovers from this error on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AudioChatError::Provider { .. }
                | AudioChatError::ProviderTimeout { .. }
                | AudioChatError::ProviderUnavailable { .. }
                | AudioChatError::Analysis { .. }
                | AudioChatError::Cache { .. }
        )
    }

    /// Is this a provider-side failure (handled by the heuristic fallback)
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            AudioChatError::Provider { .. }
                | AudioChatError::ProviderTimeout { .. }
                | AudioChatError::ProviderUnavailable { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            AudioChatError::Decode { .. } => vec![
                "Check that the file is a valid WAV, MP3, FLAC, OGG or AAC file",
                "Re-export the audio from your editor",
            ],
            AudioChatError::Encode { .. } => vec!["Request WAV output"],
            AudioChatError::InvalidRequest { .. } => vec![
                "Keep the segment inside the file's duration",
                "Supply an instruction or explicit effects",
            ],
            AudioChatError::Parameter { .. } => vec![
                "Adjust the parameter into its documented range",
                "Run 'audiochat-cli effects' to list parameter defaults",
            ],
            AudioChatError::UnknownEffect { .. } => {
                vec!["Run 'audiochat-cli effects' to list supported effect types"]
            }
            AudioChatError::InvalidChain { .. } => {
                vec!["Place source_separation last in the chain"]
            }
            AudioChatError::NonFiniteOutput { .. } => vec![
                "Reduce extreme gain or drive settings",
                "Remove the failing effect and retry",
            ],
            AudioChatError::ProviderTimeout { .. } => vec![
                "Increase AUDIOCHAT_LLM_TIMEOUT_MS",
                "Retry later; the heuristic path was used instead",
            ],
            AudioChatError::Provider { .. } | AudioChatError::ProviderUnavailable { .. } => vec![
                "Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GOOGLE_API_KEY",
                "Use explicit effects instead of an instruction",
            ],
            AudioChatError::Cache { .. } => vec!["Run 'audiochat-cli cache clear'"],
            AudioChatError::Config { .. } => vec!["Check the configuration file and environment"],
            _ => vec![],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
