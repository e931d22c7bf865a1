//! Cache keys
//!
//! A key is the SHA-256 of length-prefixed fields, so reordering or
//! concatenating field values can never collide.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dsp::EffectsChain;

/// Hex SHA-256 fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start a key from named fields
    pub fn builder(purpose: &str) -> KeyBuilder {
        KeyBuilder::new(purpose)
    }

    /// Key of a processing request
    ///
    /// Identical audio with the same normalized instruction, explicit chain,
    /// segment and output format always yields the same key.
    pub fn for_request(
        audio: &[u8],
        instruction: &str,
        explicit: Option<&EffectsChain>,
        segment: Option<(f64, f64)>,
        output: &str,
    ) -> Self {
        let chain = explicit
            .map(|c| c.to_json().to_string())
            .unwrap_or_default();
        let segment = segment
            .map(|(s, e)| format!("{:.6}-{:.6}", s, e))
            .unwrap_or_default();
        Self::builder("process")
            .field("audio", &content_hash(audio))
            .field("instruction", &normalize_instruction(instruction))
            .field("chain", &chain)
            .field("segment", &segment)
            .field("output", output)
            .finish()
    }

    /// Key of data derived from the input audio alone
    pub fn for_content(purpose: &str, audio: &[u8]) -> Self {
        Self::builder(purpose)
            .field("audio", &content_hash(audio))
            .finish()
    }

    /// Key of a secondary entry hanging off this one (e.g. a stem)
    pub fn derive(&self, part: &str) -> Self {
        Self::builder("derived")
            .field("parent", &self.0)
            .field("part", part)
            .finish()
    }

    /// Accept only well-formed fingerprints (64 lowercase hex digits)
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental key construction
pub struct KeyBuilder {
    hasher: Sha256,
}

impl KeyBuilder {
    fn new(purpose: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.push(purpose.as_bytes());
        builder
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.push(name.as_bytes());
        self.push(value.as_bytes());
        self
    }

    pub fn finish(self) -> CacheKey {
        CacheKey(format!("{:x}", self.hasher.finalize()))
    }

    fn push(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }
}

/// Hex SHA-256 of raw bytes
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Case and whitespace insensitive form of an instruction
pub fn normalize_instruction(instruction: &str) -> String {
    instruction
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{Effect, GainParams};

    #[test]
    fn test_same_request_same_key() {
        let a = CacheKey::for_request(b"audio", "Boost  bass", None, None, "wav16");
        let b = CacheKey::for_request(b"audio", "boost bass ", None, None, "wav16");
        assert_eq!(a, b);
        assert!(CacheKey::parse(a.as_str()).is_some());
    }

    #[test]
    fn test_every_field_changes_key() {
        let base = CacheKey::for_request(b"audio", "boost bass", None, None, "wav16");
        let chain = EffectsChain::new(vec![Effect::Gain(GainParams::new(3.0))]).unwrap();
        let variants = [
            CacheKey::for_request(b"audio2", "boost bass", None, None, "wav16"),
            CacheKey::for_request(b"audio", "cut bass", None, None, "wav16"),
            CacheKey::for_request(b"audio", "boost bass", Some(&chain), None, "wav16"),
            CacheKey::for_request(b"audio", "boost bass", None, Some((0.0, 1.0)), "wav16"),
            CacheKey::for_request(b"audio", "boost bass", None, None, "wav24"),
        ];
        for v in &variants {
            assert_ne!(&base, v);
        }
    }

    #[test]
    fn test_fields_do_not_run_together() {
        let a = CacheKey::builder("t").field("a", "bc").field("d", "").finish();
        let b = CacheKey::builder("t").field("a", "b").field("cd", "").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_and_content_keys_distinct() {
        let key = CacheKey::for_content("analysis", b"audio");
        assert_ne!(key, CacheKey::for_content("waveform", b"audio"));
        assert_ne!(key.derive("stem/vocals"), key.derive("stem/drums"));
    }

    #[test]
    fn test_parse_rejects_paths() {
        assert!(CacheKey::parse("../../etc/passwd").is_none());
        assert!(CacheKey::parse(&"A".repeat(64)).is_none());
    }
}
