//! Instruction Processor
//!
//! Maps natural-language editing requests to effects chains, through a
//! language-model provider when one is configured and keyword/analysis
//! heuristics otherwise.

mod heuristics;
mod intent;
mod processor;
mod prompt;
mod provider;

pub use heuristics::{HeuristicMapper, HeuristicOutcome, MAX_CORRECTION_GAIN_DB, TARGET_RMS_DB};
pub use intent::{ExtractedParam, Intent, ParamType};
pub use processor::{BuiltChain, ChainBuilder, ChainSource, InstructionProcessor};
pub use prompt::{parse_response, response_schema, system_prompt, user_prompt, ParsedResponse};
pub use provider::{
    HttpProvider, LanguageModelProvider, MockProvider, MockReply, ProviderConfig, ProviderKind,
    ProviderRequest, DEFAULT_PROVIDER_TIMEOUT_MS,
};
