//! Cache manager
//!
//! Ties a `CacheStore` to the guarantees the pipeline relies on:
//! - storage failures and corrupt entries degrade to misses
//! - one computation per key via single-flight
//! - age-based sweeps that never remove an entry being read

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::key::CacheKey;
use super::single_flight::{FlightRole, SingleFlight};
use super::store::{CacheNamespace, CacheStore, FsCacheStore, MemoryCacheStore};
use crate::error::{AudioChatError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// When sweeps run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SweepPolicy {
    /// After a write, at most once per interval
    OnWrite { min_interval_secs: u64 },
    /// Only when `sweep` is called
    Manual,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        SweepPolicy::OnWrite {
            min_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_age_days: u32,
    pub sweep: SweepPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./audiochat_cache"),
            max_age_days: 7,
            sweep: SweepPolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.max_age_days))
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
    /// Expired but being read
    pub skipped_pinned: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: BTreeMap<CacheNamespace, usize>,
    pub hit_ratio: f64,
}

/// Where `get_or_compute` found its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Cached,
    Computed,
    /// Received from a concurrent identical computation
    Joined,
}

// ============================================================================
// Manager
// ============================================================================

type PinMap = HashMap<(CacheNamespace, CacheKey), usize>;
type Shared = Arc<dyn Any + Send + Sync>;

/// Holds a key pinned against sweeps while it is read
struct ReadPin<'a> {
    pins: &'a Mutex<PinMap>,
    id: (CacheNamespace, CacheKey),
}

impl<'a> ReadPin<'a> {
    fn new(pins: &'a Mutex<PinMap>, ns: CacheNamespace, key: &CacheKey) -> Self {
        let id = (ns, key.clone());
        if let Ok(mut pins) = pins.lock() {
            *pins.entry(id.clone()).or_insert(0) += 1;
        }
        Self { pins, id }
    }
}

impl Drop for ReadPin<'_> {
    fn drop(&mut self) {
        if let Ok(mut pins) = self.pins.lock() {
            if let Some(count) = pins.get_mut(&self.id) {
                *count -= 1;
                if *count == 0 {
                    pins.remove(&self.id);
                }
            }
        }
    }
}

/// Namespaced, single-flight cache over a blob store
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    flights: SingleFlight<Shared>,
    pins: Mutex<PinMap>,
    last_sweep: Mutex<Option<Instant>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            flights: SingleFlight::new(),
            pins: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Filesystem-backed manager rooted at `config.dir`
    pub fn open(config: CacheConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir).map_err(|e| AudioChatError::Cache {
            reason: format!("cannot create cache dir {}: {}", config.dir.display(), e),
        })?;
        let store = Arc::new(FsCacheStore::new(config.dir.clone()));
        Ok(Self::new(store, config))
    }

    /// Memory-backed manager with manual sweeps
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCacheStore::new()),
            CacheConfig {
                sweep: SweepPolicy::Manual,
                ..Default::default()
            },
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read an entry; corruption and storage errors count as misses
    pub fn get(&self, ns: CacheNamespace, key: &CacheKey) -> Option<Vec<u8>> {
        let _pin = ReadPin::new(&self.pins, ns, key);
        match self.store.read(ns, key) {
            Ok(Some((_, payload))) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %ns, key = %key, "cache hit");
                Some(payload)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %ns, key = %key, "cache miss");
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(namespace = %ns, key = %key, error = %e, "corrupt cache entry, treating as miss");
                if let Err(e) = self.store.remove(ns, key) {
                    warn!(namespace = %ns, key = %key, error = %e, "cannot remove corrupt entry");
                }
                None
            }
        }
    }

    /// Publish an entry, then sweep if the policy says so
    pub fn put(&self, ns: CacheNamespace, key: &CacheKey, payload: &[u8]) -> Result<()> {
        self.store.write(ns, key, payload)?;
        debug!(namespace = %ns, key = %key, size = payload.len(), "cache write");
        self.maybe_sweep();
        Ok(())
    }

    /// `get` decoded as JSON; undecodable entries are removed and missed
    pub fn get_json<T: DeserializeOwned>(&self, ns: CacheNamespace, key: &CacheKey) -> Option<T> {
        let payload = self.get(ns, key)?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(namespace = %ns, key = %key, error = %e, "undecodable cache entry, treating as miss");
                let _ = self.store.remove(ns, key);
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, ns: CacheNamespace, key: &CacheKey, value: &T) -> Result<()> {
        self.put(ns, key, &serde_json::to_vec(value)?)
    }

    /// Return the value `lookup` finds, or run `compute` at most once
    /// across concurrent callers for the same key
    ///
    /// `lookup` is retried inside the flight so a caller arriving just
    /// after a leader finished still takes the cached value. `compute`
    /// is responsible for writing whatever entries it produces.
    pub fn get_or_compute<T, L, F>(
        &self,
        ns: CacheNamespace,
        key: &CacheKey,
        lookup: L,
        compute: F,
    ) -> Result<(T, Resolution)>
    where
        T: Clone + Send + Sync + 'static,
        L: Fn(&Self) -> Option<T>,
        F: FnOnce(&Self) -> Result<T>,
    {
        if let Some(value) = lookup(self) {
            return Ok((value, Resolution::Cached));
        }

        let flight_key = format!("{}/{}", ns, key);
        let mut cached = false;
        let (shared, role) = self.flights.run(&flight_key, || {
            if let Some(value) = lookup(self) {
                cached = true;
                return Ok(Arc::new(value) as Shared);
            }
            compute(self).map(|value| Arc::new(value) as Shared)
        })?;

        let value = shared
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| AudioChatError::Cache {
                reason: format!("in-flight value for {} has another type", flight_key),
            })?;
        let resolution = match role {
            FlightRole::Joined => Resolution::Joined,
            FlightRole::Leader if cached => Resolution::Cached,
            FlightRole::Leader => Resolution::Computed,
        };
        Ok((value, resolution))
    }

    /// Remove entries older than `max_age`, except pinned ones
    pub fn sweep(&self, max_age: ChronoDuration) -> Result<SweepReport> {
        let cutoff = Utc::now() - max_age;
        let mut report = SweepReport::default();

        for ns in CacheNamespace::ALL {
            for meta in self.store.list(ns)? {
                if meta.created_at >= cutoff {
                    report.kept += 1;
                    continue;
                }
                // Held across the check and the removal so no reader can
                // pin the key in between
                let pins = self.pins.lock().map_err(|_| AudioChatError::Cache {
                    reason: "pin registry lock poisoned".to_string(),
                })?;
                if pins.contains_key(&(ns, meta.key.clone())) {
                    report.skipped_pinned += 1;
                    continue;
                }
                let removed = self.store.remove(ns, &meta.key)?;
                drop(pins);
                if removed {
                    report.removed += 1;
                    report.bytes_freed += meta.size;
                }
            }
        }

        if let Ok(mut last) = self.last_sweep.lock() {
            *last = Some(Instant::now());
        }
        info!(
            removed = report.removed,
            kept = report.kept,
            skipped_pinned = report.skipped_pinned,
            bytes_freed = report.bytes_freed,
            "cache sweep complete"
        );
        Ok(report)
    }

    /// Remove every entry, pinned ones included
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for ns in CacheNamespace::ALL {
            for meta in self.store.list(ns)? {
                if self.store.remove(ns, &meta.key)? {
                    removed += 1;
                }
            }
        }
        info!(removed, "cache cleared");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let mut entries = BTreeMap::new();
        for ns in CacheNamespace::ALL {
            entries.insert(ns, self.store.list(ns)?.len());
        }
        let lookups = hits + misses;
        Ok(CacheStats {
            hits,
            misses,
            entries,
            hit_ratio: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        })
    }

    fn maybe_sweep(&self) {
        let SweepPolicy::OnWrite { min_interval_secs } = self.config.sweep else {
            return;
        };
        let due = match self.last_sweep.lock() {
            Ok(last) => last.map_or(true, |t| t.elapsed().as_secs() >= min_interval_secs),
            Err(_) => false,
        };
        if due {
            if let Err(e) = self.sweep(self.config.max_age()) {
                warn!(error = %e, "cache sweep failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::cache::store::EntryMeta;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn key(n: u32) -> CacheKey {
        CacheKey::builder("test").field("n", &n.to_string()).finish()
    }

    fn memory_manager() -> (Arc<MemoryCacheStore>, CacheManager) {
        let store = Arc::new(MemoryCacheStore::new());
        let manager = CacheManager::new(
            store.clone(),
            CacheConfig {
                sweep: SweepPolicy::Manual,
                ..Default::default()
            },
        );
        (store, manager)
    }

    #[test]
    fn test_get_put_and_stats() {
        let (_, manager) = memory_manager();
        assert!(manager.get(CacheNamespace::Audio, &key(1)).is_none());
        manager.put(CacheNamespace::Audio, &key(1), b"abc").unwrap();
        assert_eq!(manager.get(CacheNamespace::Audio, &key(1)).unwrap(), b"abc");

        let stats = manager.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries[&CacheNamespace::Audio], 1);
        assert_eq!(stats.entries[&CacheNamespace::Waveform], 0);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[test]
    fn test_namespaces_independent() {
        let (_, manager) = memory_manager();
        manager.put(CacheNamespace::Audio, &key(1), b"abc").unwrap();
        assert!(manager.get(CacheNamespace::Analysis, &key(1)).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_miss_and_removed() {
        let (store, manager) = memory_manager();
        manager.put(CacheNamespace::Audio, &key(1), b"abc").unwrap();
        store.corrupt(CacheNamespace::Audio, &key(1), b"xyz".to_vec());
        assert!(manager.get(CacheNamespace::Audio, &key(1)).is_none());
        assert!(store.list(CacheNamespace::Audio).unwrap().is_empty());
    }

    #[test]
    fn test_json_helpers() {
        let (_, manager) = memory_manager();
        manager
            .put_json(CacheNamespace::Analysis, &key(1), &vec![1.5f32, 2.5])
            .unwrap();
        let value: Vec<f32> = manager.get_json(CacheNamespace::Analysis, &key(1)).unwrap();
        assert_eq!(value, vec![1.5, 2.5]);
        assert!(manager
            .get_json::<String>(CacheNamespace::Analysis, &key(1))
            .is_none());
    }

    #[test]
    fn test_sweep_removes_old_entries_only() {
        let (store, manager) = memory_manager();
        manager.put(CacheNamespace::Audio, &key(1), b"old").unwrap();
        manager.put(CacheNamespace::Waveform, &key(2), b"new").unwrap();
        store.set_created_at(CacheNamespace::Audio, &key(1), Utc::now() - ChronoDuration::days(8));

        let report = manager.sweep(ChronoDuration::days(7)).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.kept, 1);
        assert_eq!(report.bytes_freed, 3);
        assert!(manager.get(CacheNamespace::Waveform, &key(2)).is_some());
    }

    #[test]
    fn test_sweep_skips_pinned_entries() {
        let (store, manager) = memory_manager();
        manager.put(CacheNamespace::Audio, &key(1), b"old").unwrap();
        store.set_created_at(CacheNamespace::Audio, &key(1), Utc::now() - ChronoDuration::days(30));

        let report = {
            let _pin = ReadPin::new(&manager.pins, CacheNamespace::Audio, &key(1));
            manager.sweep(ChronoDuration::days(7)).unwrap()
        };
        assert_eq!(report.skipped_pinned, 1);
        assert_eq!(report.removed, 0);

        let report = manager.sweep(ChronoDuration::days(7)).unwrap();
        assert_eq!(report.removed, 1);
    }

    /// Starts a reader on the key being removed, then removes it after a pause
    struct ReaderDuringRemove {
        inner: MemoryCacheStore,
        manager: Mutex<Option<Arc<CacheManager>>>,
        reader: Mutex<Option<thread::JoinHandle<Option<Vec<u8>>>>>,
        read_finished_before_remove: AtomicBool,
    }

    impl CacheStore for ReaderDuringRemove {
        fn read(
            &self,
            ns: CacheNamespace,
            key: &CacheKey,
        ) -> Result<Option<(EntryMeta, Vec<u8>)>> {
            self.inner.read(ns, key)
        }

        fn write(&self, ns: CacheNamespace, key: &CacheKey, payload: &[u8]) -> Result<EntryMeta> {
            self.inner.write(ns, key, payload)
        }

        fn remove(&self, ns: CacheNamespace, key: &CacheKey) -> Result<bool> {
            if let Some(manager) = self.manager.lock().unwrap().take() {
                let reader_key = key.clone();
                let finished = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&finished);
                let handle = thread::spawn(move || {
                    let value = manager.get(ns, &reader_key);
                    flag.store(true, Ordering::SeqCst);
                    value
                });
                thread::sleep(std::time::Duration::from_millis(100));
                self.read_finished_before_remove
                    .store(finished.load(Ordering::SeqCst), Ordering::SeqCst);
                *self.reader.lock().unwrap() = Some(handle);
            }
            self.inner.remove(ns, key)
        }

        fn list(&self, ns: CacheNamespace) -> Result<Vec<EntryMeta>> {
            self.inner.list(ns)
        }
    }

    #[test]
    fn test_sweep_blocks_new_readers_until_removed() {
        let store = Arc::new(ReaderDuringRemove {
            inner: MemoryCacheStore::new(),
            manager: Mutex::new(None),
            reader: Mutex::new(None),
            read_finished_before_remove: AtomicBool::new(false),
        });
        let manager = Arc::new(CacheManager::new(
            store.clone(),
            CacheConfig {
                sweep: SweepPolicy::Manual,
                ..Default::default()
            },
        ));
        manager.put(CacheNamespace::Audio, &key(1), b"old").unwrap();
        store
            .inner
            .set_created_at(CacheNamespace::Audio, &key(1), Utc::now() - ChronoDuration::days(30));
        *store.manager.lock().unwrap() = Some(Arc::clone(&manager));

        let report = manager.sweep(ChronoDuration::days(7)).unwrap();
        assert_eq!(report.removed, 1);

        // The reader could not pin the key mid-removal, so it waited and missed
        assert!(!store.read_finished_before_remove.load(Ordering::SeqCst));
        let reader = store.reader.lock().unwrap().take().unwrap();
        assert!(reader.join().unwrap().is_none());
    }

    #[test]
    fn test_sweep_on_write_throttled() {
        let store = Arc::new(MemoryCacheStore::new());
        let manager = CacheManager::new(store.clone(), CacheConfig::default());
        manager.put(CacheNamespace::Audio, &key(1), b"a").unwrap();
        store.set_created_at(CacheNamespace::Audio, &key(1), Utc::now() - ChronoDuration::days(30));

        // The first write already swept; the next one is inside the interval
        manager.put(CacheNamespace::Audio, &key(2), b"b").unwrap();
        assert_eq!(store.list(CacheNamespace::Audio).unwrap().len(), 2);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let manager = CacheManager::open(CacheConfig {
            dir: temp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        manager.put(CacheNamespace::Audio, &key(1), b"a").unwrap();
        manager.put(CacheNamespace::Analysis, &key(1), b"b").unwrap();
        assert_eq!(manager.clear().unwrap(), 2);
        assert!(manager.get(CacheNamespace::Audio, &key(1)).is_none());
    }

    #[test]
    fn test_get_or_compute_once_across_threads() {
        let (_, manager) = memory_manager();
        let manager = Arc::new(manager);
        let computations = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let computations = Arc::clone(&computations);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    manager
                        .get_or_compute(
                            CacheNamespace::Audio,
                            &key(9),
                            |m| m.get(CacheNamespace::Audio, &key(9)),
                            |m| {
                                computations.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(std::time::Duration::from_millis(100));
                                let value = b"result".to_vec();
                                m.put(CacheNamespace::Audio, &key(9), &value)?;
                                Ok(value)
                            },
                        )
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|(v, _)| v == b"result"));

        let (_, resolution) = manager
            .get_or_compute(
                CacheNamespace::Audio,
                &key(9),
                |m| m.get(CacheNamespace::Audio, &key(9)),
                |_| Ok(Vec::new()),
            )
            .unwrap();
        assert_eq!(resolution, Resolution::Cached);
    }
}
