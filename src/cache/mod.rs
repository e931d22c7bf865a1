//! Cache Manager
//!
//! Content-addressed storage for processed audio, analyses and waveform
//! previews, with single-flight computation and age-based eviction.

mod key;
mod manager;
mod single_flight;
mod store;

pub use key::{content_hash, normalize_instruction, CacheKey, KeyBuilder};
pub use manager::{CacheConfig, CacheManager, CacheStats, Resolution, SweepPolicy, SweepReport};
pub use single_flight::{FlightRole, SingleFlight};
pub use store::{CacheNamespace, CacheStore, EntryMeta, FsCacheStore, MemoryCacheStore};
