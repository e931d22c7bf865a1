//! Audiochat - natural-language audio processing
//!
//! Turns an instruction such as "warmer, with a bit of room" into a
//! validated effects chain and runs it over decoded audio.
//!
//! # Architecture
//!
//! - `agent`: instruction to chain, via a language model with keyword rules as fallback
//! - `dsp`: the effect library and chain model
//! - `engine`: buffers, codec, chain execution (single pass or chunked in parallel)
//! - `analysis`: feature extraction and waveform previews
//! - `cache`: content-addressed results with single-flight computation
//! - `pipeline`: the request orchestrator tying everything together

pub mod agent;
pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod pipeline;

pub use error::{AudioChatError, Result};
