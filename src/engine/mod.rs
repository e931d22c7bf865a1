//! Audio Engine Module
//!
//! Core processing engine including:
//! - Audio buffer management
//! - Decoding and encoding
//! - Chain execution, single pass or chunked in parallel

pub mod buffer;
pub mod codec;
pub mod executor;
pub mod parallel;

pub use buffer::AudioBuffer;
pub use codec::{AudioCodec, ContainerFormat, DecodedAudio, DefaultCodec, EncodeSpec, OutputFormat};
pub use executor::{ChainOutput, EffectObserver, Executor};
pub use parallel::{ChunkConfig, ChunkProcessor, ChunkSpan, CrossfadeCurve};
