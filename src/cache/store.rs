//! Cache blob storage
//!
//! `CacheStore` is the persistent blob collaborator. On disk an entry is a
//! single file holding its metadata header followed by the payload. It is
//! written to a temporary file and renamed into place, so a reader sees
//! either the previous entry or the new one, never a mix of both.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use super::key::{content_hash, CacheKey};
use crate::error::{AudioChatError, Result};

const ENTRY_EXTENSION: &str = ".bin";
const TEMP_PREFIX: &str = ".tmp-";
/// Header length prefix in front of the metadata JSON
const HEADER_LEN_BYTES: usize = 4;

/// Independent key spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Processed audio and stems
    Audio,
    /// Processing reports and input analyses
    Analysis,
    /// Waveform previews
    Waveform,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 3] = [
        CacheNamespace::Audio,
        CacheNamespace::Analysis,
        CacheNamespace::Waveform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Audio => "audio",
            CacheNamespace::Analysis => "analysis",
            CacheNamespace::Waveform => "waveform",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata header stored in front of each payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: CacheKey,
    pub namespace: CacheNamespace,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub sha256: String,
}

impl EntryMeta {
    pub fn new(namespace: CacheNamespace, key: &CacheKey, payload: &[u8]) -> Self {
        Self {
            key: key.clone(),
            namespace,
            created_at: Utc::now(),
            size: payload.len() as u64,
            sha256: content_hash(payload),
        }
    }

    /// Check a payload against the recorded size and digest
    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 != self.size {
            return Err(AudioChatError::Cache {
                reason: format!(
                    "{}/{}: size {} does not match recorded {}",
                    self.namespace,
                    self.key,
                    payload.len(),
                    self.size
                ),
            });
        }
        if content_hash(payload) != self.sha256 {
            return Err(AudioChatError::Cache {
                reason: format!("{}/{}: checksum mismatch", self.namespace, self.key),
            });
        }
        Ok(())
    }
}

/// Blob storage for cache entries
///
/// `read` returns `Ok(None)` for absent entries and `Err(Cache)` for
/// entries that exist but are corrupt.
pub trait CacheStore: Send + Sync {
    fn read(&self, ns: CacheNamespace, key: &CacheKey) -> Result<Option<(EntryMeta, Vec<u8>)>>;

    /// Publish an entry, replacing any previous one
    fn write(&self, ns: CacheNamespace, key: &CacheKey, payload: &[u8]) -> Result<EntryMeta>;

    /// Returns whether anything was removed
    fn remove(&self, ns: CacheNamespace, key: &CacheKey) -> Result<bool>;

    fn list(&self, ns: CacheNamespace) -> Result<Vec<EntryMeta>>;
}

// ============================================================================
// Filesystem Store
// ============================================================================

/// `<root>/<namespace>/<key>.bin`: `[u32 LE header length][EntryMeta JSON][payload]`
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, ns: CacheNamespace) -> PathBuf {
        self.root.join(ns.as_str())
    }

    /// Path of the file holding an entry
    pub fn entry_path(&self, ns: CacheNamespace, key: &CacheKey) -> PathBuf {
        self.namespace_dir(ns)
            .join(format!("{}{}", key, ENTRY_EXTENSION))
    }

    fn encode_entry(meta: &EntryMeta, payload: &[u8]) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(meta)?;
        let header_len = u32::try_from(header.len()).map_err(|_| AudioChatError::Cache {
            reason: format!("{}/{}: metadata header too large", meta.namespace, meta.key),
        })?;
        let mut bytes = Vec::with_capacity(HEADER_LEN_BYTES + header.len() + payload.len());
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(payload);
        Ok(bytes)
    }

    /// Split a stored file into its metadata and payload
    fn decode_entry(path: &Path, mut bytes: Vec<u8>) -> Result<(EntryMeta, Vec<u8>)> {
        let unreadable = |detail: String| AudioChatError::Cache {
            reason: format!("unreadable entry {}: {}", path.display(), detail),
        };
        let prefix: [u8; HEADER_LEN_BYTES] = bytes
            .get(..HEADER_LEN_BYTES)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| unreadable("truncated header".to_string()))?;
        let header_end = HEADER_LEN_BYTES + u32::from_le_bytes(prefix) as usize;
        if header_end > bytes.len() {
            return Err(unreadable("header runs past end of file".to_string()));
        }
        let meta: EntryMeta = serde_json::from_slice(&bytes[HEADER_LEN_BYTES..header_end])
            .map_err(|e| unreadable(e.to_string()))?;
        let payload = bytes.split_off(header_end);
        Ok((meta, payload))
    }

    fn read_header(path: &Path) -> Result<EntryMeta> {
        let mut file = fs::File::open(path)?;
        let mut prefix = [0u8; HEADER_LEN_BYTES];
        file.read_exact(&mut prefix)?;
        let header_len = u64::from(u32::from_le_bytes(prefix));
        if header_len + HEADER_LEN_BYTES as u64 > file.metadata()?.len() {
            return Err(AudioChatError::Cache {
                reason: format!("unreadable entry header {}: truncated", path.display()),
            });
        }
        let mut header = vec![0u8; header_len as usize];
        file.read_exact(&mut header)?;
        serde_json::from_slice(&header).map_err(|e| AudioChatError::Cache {
            reason: format!("unreadable entry header {}: {}", path.display(), e),
        })
    }

    /// Metadata for an entry whose header cannot be read
    fn unreadable_meta(ns: CacheNamespace, key: CacheKey, path: &Path) -> Option<EntryMeta> {
        let metadata = fs::metadata(path).ok()?;
        let modified: DateTime<Utc> = metadata.modified().ok()?.into();
        Some(EntryMeta {
            key,
            namespace: ns,
            created_at: modified,
            size: metadata.len(),
            sha256: String::new(),
        })
    }
}

impl CacheStore for FsCacheStore {
    fn read(&self, ns: CacheNamespace, key: &CacheKey) -> Result<Option<(EntryMeta, Vec<u8>)>> {
        let path = self.entry_path(ns, key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (meta, payload) = Self::decode_entry(&path, bytes)?;
        if meta.key != *key || meta.namespace != ns {
            return Err(AudioChatError::Cache {
                reason: format!("{}/{}: header names another entry", ns, key),
            });
        }
        meta.verify(&payload)?;
        Ok(Some((meta, payload)))
    }

    fn write(&self, ns: CacheNamespace, key: &CacheKey, payload: &[u8]) -> Result<EntryMeta> {
        let dir = self.namespace_dir(ns);
        fs::create_dir_all(&dir)?;

        let meta = EntryMeta::new(ns, key, payload);
        let bytes = Self::encode_entry(&meta, payload)?;
        let target = self.entry_path(ns, key);
        let temp = dir.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        if let Err(e) = fs::write(&temp, &bytes).and_then(|_| fs::rename(&temp, &target)) {
            let _ = fs::remove_file(&temp);
            return Err(AudioChatError::Cache {
                reason: format!("cannot publish {}: {}", target.display(), e),
            });
        }
        Ok(meta)
    }

    fn remove(&self, ns: CacheNamespace, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.entry_path(ns, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, ns: CacheNamespace) -> Result<Vec<EntryMeta>> {
        let dir = self.namespace_dir(ns);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<EntryMeta> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let key = CacheKey::parse(name.strip_suffix(ENTRY_EXTENSION)?)?;
                match Self::read_header(entry.path()) {
                    Ok(meta) => Some(meta),
                    // Removed between the directory walk and the header read
                    Err(AudioChatError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        warn!(namespace = %ns, error = %e, "cache entry has unreadable header");
                        Self::unreadable_meta(ns, key, entry.path())
                    }
                }
            })
            .collect();

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-process store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<(CacheNamespace, CacheKey), (EntryMeta, Vec<u8>)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(CacheNamespace, CacheKey), (EntryMeta, Vec<u8>)>>>
    {
        self.entries.lock().map_err(|_| AudioChatError::Cache {
            reason: "memory store lock poisoned".to_string(),
        })
    }

    /// Rewrite an entry's creation time
    pub fn set_created_at(&self, ns: CacheNamespace, key: &CacheKey, at: DateTime<Utc>) -> bool {
        match self.lock() {
            Ok(mut entries) => match entries.get_mut(&(ns, key.clone())) {
                Some((meta, _)) => {
                    meta.created_at = at;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Replace an entry's payload without updating its metadata
    pub fn corrupt(&self, ns: CacheNamespace, key: &CacheKey, payload: Vec<u8>) -> bool {
        match self.lock() {
            Ok(mut entries) => match entries.get_mut(&(ns, key.clone())) {
                Some((_, stored)) => {
                    *stored = payload;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self, ns: CacheNamespace, key: &CacheKey) -> Result<Option<(EntryMeta, Vec<u8>)>> {
        let entry = self.lock()?.get(&(ns, key.clone())).cloned();
        match entry {
            Some((meta, payload)) => {
                meta.verify(&payload)?;
                Ok(Some((meta, payload)))
            }
            None => Ok(None),
        }
    }

    fn write(&self, ns: CacheNamespace, key: &CacheKey, payload: &[u8]) -> Result<EntryMeta> {
        let meta = EntryMeta::new(ns, key, payload);
        self.lock()?
            .insert((ns, key.clone()), (meta.clone(), payload.to_vec()));
        Ok(meta)
    }

    fn remove(&self, ns: CacheNamespace, key: &CacheKey) -> Result<bool> {
        Ok(self.lock()?.remove(&(ns, key.clone())).is_some())
    }

    fn list(&self, ns: CacheNamespace) -> Result<Vec<EntryMeta>> {
        let mut entries: Vec<EntryMeta> = self
            .lock()?
            .iter()
            .filter(|((n, _), _)| *n == ns)
            .map(|(_, (meta, _))| meta.clone())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}

// ============================================================================
// Tests
// ============================================================================
