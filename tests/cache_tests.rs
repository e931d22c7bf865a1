//! Cache Tests
//!
//! Filesystem cache behaviour through the public API: persistence across
//! managers, on-disk corruption, concurrent overwrites and sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Duration as ChronoDuration;
use tempfile::TempDir;

use audiochat::cache::{
    CacheConfig, CacheKey, CacheManager, CacheNamespace, CacheStore, FsCacheStore,
    MemoryCacheStore, SweepPolicy,
};

fn fs_config(temp: &TempDir) -> CacheConfig {
    CacheConfig {
        dir: temp.path().to_path_buf(),
        sweep: SweepPolicy::Manual,
        ..Default::default()
    }
}

fn key(name: &str) -> CacheKey {
    CacheKey::for_request(name.as_bytes(), "warmer", None, None, "wav")
}

#[test]
fn test_entries_survive_a_new_manager() {
    let temp = TempDir::new().unwrap();
    CacheManager::open(fs_config(&temp))
        .unwrap()
        .put(CacheNamespace::Audio, &key("a"), b"payload")
        .unwrap();

    let reopened = CacheManager::open(fs_config(&temp)).unwrap();
    assert_eq!(
        reopened.get(CacheNamespace::Audio, &key("a")).as_deref(),
        Some(&b"payload"[..])
    );
}

#[test]
fn test_on_disk_corruption_is_a_miss() {
    let temp = TempDir::new().unwrap();
    let manager = CacheManager::open(fs_config(&temp)).unwrap();
    manager.put(CacheNamespace::Audio, &key("a"), b"payload").unwrap();

    let entry = FsCacheStore::new(temp.path()).entry_path(CacheNamespace::Audio, &key("a"));
    let mut bytes = std::fs::read(&entry).unwrap();
    let last = bytes.len() - 1;
    bytes[last] = b'P';
    std::fs::write(&entry, &bytes).unwrap();

    assert!(manager.get(CacheNamespace::Audio, &key("a")).is_none());
    // The corrupt entry was removed, not left for the next reader
    assert!(!entry.exists());
    assert_eq!(manager.stats().unwrap().entries[&CacheNamespace::Audio], 0);
}

#[test]
fn test_truncated_entry_is_a_miss() {
    let temp = TempDir::new().unwrap();
    let manager = CacheManager::open(fs_config(&temp)).unwrap();
    manager.put(CacheNamespace::Waveform, &key("a"), b"[1,2]").unwrap();

    let entry = FsCacheStore::new(temp.path()).entry_path(CacheNamespace::Waveform, &key("a"));
    let bytes = std::fs::read(&entry).unwrap();
    std::fs::write(&entry, &bytes[..bytes.len() / 2]).unwrap();
    assert!(manager.get(CacheNamespace::Waveform, &key("a")).is_none());
}

#[test]
fn test_overwrites_never_lose_a_present_entry() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(CacheManager::open(fs_config(&temp)).unwrap());
    manager.put(CacheNamespace::Analysis, &key("shared"), b"analysis").unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let manager = Arc::clone(&manager);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut toggle = false;
            while !stop.load(Ordering::SeqCst) {
                let payload: &[u8] = if toggle { b"analysis" } else { b"analysis2" };
                manager.put(CacheNamespace::Analysis, &key("shared"), payload).unwrap();
                toggle = !toggle;
            }
        })
    };

    let mut misses = 0;
    for _ in 0..5000 {
        if manager.get(CacheNamespace::Analysis, &key("shared")).is_none() {
            misses += 1;
        }
    }
    stop.store(true, Ordering::SeqCst);
    writer.join().unwrap();

    assert_eq!(misses, 0);
    assert!(manager.get(CacheNamespace::Analysis, &key("shared")).is_some());
}

#[test]
fn test_sweep_with_zero_age_removes_everything() {
    let temp = TempDir::new().unwrap();
    let manager = CacheManager::open(fs_config(&temp)).unwrap();
    for name in ["a", "b", "c"] {
        manager.put(CacheNamespace::Analysis, &key(name), b"{}").unwrap();
    }

    let report = manager.sweep(ChronoDuration::zero()).unwrap();
    assert_eq!(report.removed, 3);
    assert_eq!(report.bytes_freed, 6);
    assert!(FsCacheStore::new(temp.path())
        .list(CacheNamespace::Analysis)
        .unwrap()
        .is_empty());
}

#[test]
fn test_memory_store_sweep_keeps_fresh_entries() {
    let store = Arc::new(MemoryCacheStore::new());
    let manager = CacheManager::new(
        store.clone(),
        CacheConfig {
            sweep: SweepPolicy::Manual,
            ..Default::default()
        },
    );
    manager.put(CacheNamespace::Audio, &key("old"), b"1").unwrap();
    manager.put(CacheNamespace::Audio, &key("new"), b"2").unwrap();
    store.set_created_at(
        CacheNamespace::Audio,
        &key("old"),
        chrono::Utc::now() - ChronoDuration::days(10),
    );

    let report = manager.sweep(manager.config().max_age()).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.kept, 1);
    assert!(manager.get(CacheNamespace::Audio, &key("new")).is_some());
    assert!(manager.get(CacheNamespace::Audio, &key("old")).is_none());
}

#[test]
fn test_keys_are_path_safe() {
    let k = key("anything");
    assert_eq!(k.as_str().len(), 64);
    assert_eq!(CacheKey::parse(k.as_str()), Some(k));
}
