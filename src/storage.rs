//! Local, TTL-bounded key/value engine (C4).
//!
//! Consumed only through `put(key, value, ttl)` / `get(key)`. Persisted
//! to `./data/<data_file>`; eviction is lazy, applied on read.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ChordError;

pub const DATA_DIR: &str = "./data";

#[derive(Clone, Serialize, Deserialize)]
struct Entry {
    value: Vec<u8>,
    expire_at_ms: i64,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    entries: HashMap<String, Entry>,
}

/// A TTL-bounded key/value store with its own internal locking; readers
/// and writers are safe to call concurrently.
pub struct LocalStore {
    path: PathBuf,
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
}

impl LocalStore {
    /// Opens (creating if necessary) the store backed by
    /// `./data/<data_file>`, loading any snapshot already on disk.
    pub fn open(data_file: &str) -> Result<Self, ChordError> {
        if !Path::new(DATA_DIR).exists() {
            fs::create_dir_all(DATA_DIR)?;
        }
        let path = Path::new(DATA_DIR).join(data_file);
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|e| ChordError::Configured(format!("corrupt data file: {}", e)))?;
            snapshot
                .entries
                .into_iter()
                .map(|(k, v)| (key_from_wire(&k), v))
                .collect()
        } else {
            HashMap::new()
        };
        Ok(LocalStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// `Put(key, value, ttl)`. A non-positive `ttl` is a no-op.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expire_at_ms = now_ms() + ttl.as_millis() as i64;
        self.entries.lock().unwrap().insert(key, Entry { value, expire_at_ms });
        self.persist();
    }

    /// `Put` with an absolute expiry, used by the replication chain where
    /// every replica must agree on the same wall-clock deadline so they
    /// all time out together.
    pub fn put_absolute(&self, key: Vec<u8>, value: Vec<u8>, expire_at_ms: i64) {
        if expire_at_ms <= now_ms() {
            return;
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key, Entry { value, expire_at_ms });
        self.persist();
    }

    /// `Get(key) -> (value, present)`.
    pub fn get(&self, key: &[u8]) -> (Vec<u8>, bool) {
        let mut guard = self.entries.lock().unwrap();
        match guard.get(key) {
            Some(entry) if entry.expire_at_ms > now_ms() => (entry.value.clone(), true),
            Some(_) => {
                guard.remove(key);
                (Vec::new(), false)
            }
            None => (Vec::new(), false),
        }
    }

    fn persist(&self) {
        let snapshot = {
            let guard = self.entries.lock().unwrap();
            Snapshot {
                entries: guard
                    .iter()
                    .map(|(k, v)| (key_to_wire(k), v.clone()))
                    .collect(),
            }
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!("storage.persist error: {}", e);
                }
            }
            Err(e) => warn!("storage.persist serialize error: {}", e),
        }
    }
}

fn now_ms() -> i64 {
    crate::time::now_ms()
}

fn key_to_wire(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

fn key_from_wire(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn temp_store(name: &str) -> LocalStore {
        LocalStore::open(name).unwrap()
    }

    #[test]
    fn put_then_get_before_ttl_elapses() {
        let store = temp_store("test_put_get.json");
        store.put(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(10));
        let (value, present) = store.get(b"k");
        assert!(present);
        assert_eq!(value, b"v");
        let _ = fs::remove_file(Path::new(DATA_DIR).join("test_put_get.json"));
    }

    #[test]
    fn zero_ttl_put_is_a_no_op() {
        let store = temp_store("test_zero_ttl.json");
        store.put(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(0));
        let (_, present) = store.get(b"k");
        assert!(!present);
        let _ = fs::remove_file(Path::new(DATA_DIR).join("test_zero_ttl.json"));
    }

    #[test]
    fn already_expired_absolute_put_is_a_no_op() {
        let store = temp_store("test_absolute_expired.json");
        store.put_absolute(b"k".to_vec(), b"v".to_vec(), now_ms() - 1);
        let (_, present) = store.get(b"k");
        assert!(!present);
        let _ = fs::remove_file(Path::new(DATA_DIR).join("test_absolute_expired.json"));
    }

    #[test]
    fn expired_entry_is_evicted_lazily_on_get() {
        let store = temp_store("test_lazy_evict.json");
        store.put(b"k".to_vec(), b"v".to_vec(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        let (_, present) = store.get(b"k");
        assert!(!present);
        assert!(store.entries.lock().unwrap().get(b"k".as_slice()).is_none());
        let _ = fs::remove_file(Path::new(DATA_DIR).join("test_lazy_evict.json"));
    }
}
