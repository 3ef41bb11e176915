use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::obfuscate;

/// Slot key the serialized usage database lives under.
pub const SLOT_KEY: &str = "message_rate_limits";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("usage database serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage backend poisoned")]
    Poisoned,
}

/// Minimal injectable key-value storage — the slot the limiter persists into.
///
/// Implementations are best-effort durable string storage; the limiter never
/// requires transactional semantics from them. Two processes writing the same
/// slot race read-modify-write, which the limiter accepts (see
/// [`MessageLimiter`](crate::limiter::MessageLimiter)).
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One file per key under a data directory.
///
/// Writes go through a `.part` temp file and an atomic rename so a crashed
/// write never leaves a half-written slot behind.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let dest = self.path_for(key);
        let tmp = dest.with_extension("part");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = self.map.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.map.lock().map_err(|_| StoreError::Poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.map.lock().map_err(|_| StoreError::Poisoned)?;
        map.remove(key);
        Ok(())
    }
}

// ── Usage database ────────────────────────────────────────────────────────────

/// Per-fingerprint usage state for one calendar day.
///
/// `ips`, `locations` and `security_token` are audit metadata written by the
/// optional enrichment pass; they never influence an admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub count: u32,
    /// Calendar day (`YYYY-MM-DD`, local time) the counter was last zeroed.
    pub last_reset: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ips: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub locations: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_token: Option<String>,
}

impl UsageRecord {
    /// Fresh record for `day` with nothing sent yet.
    pub fn new_for_day(day: &str) -> Self {
        Self {
            count: 0,
            last_reset: day.to_string(),
            ips: BTreeSet::new(),
            locations: BTreeSet::new(),
            security_token: None,
        }
    }
}

/// Fingerprint → usage record, serialized as a single JSON object.
pub type UsageDb = BTreeMap<String, UsageRecord>;

/// The usage database bound to one storage slot, obfuscated at rest.
pub struct UsageStore<S: KvStore> {
    kv: S,
}

impl<S: KvStore> UsageStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Read and decode the slot. Infallible: an absent slot, an undecodable
    /// blob or unparseable JSON all degrade to an empty database — which
    /// resets every quota, the accepted recovery for corrupt local state.
    pub fn load(&self) -> UsageDb {
        let raw = match self.kv.get(SLOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return UsageDb::new(),
            Err(e) => {
                tracing::warn!(error = %e, "usage slot unreadable — starting empty");
                return UsageDb::new();
            }
        };

        let decoded = obfuscate::decode(&raw);
        match serde_json::from_str(&decoded) {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(error = %e, "usage slot corrupt — resetting to empty");
                UsageDb::new()
            }
        }
    }

    /// Serialize, obfuscate and write the database back to the slot.
    pub fn save(&self, db: &UsageDb) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(db)?;
        self.kv.set(SLOT_KEY, &obfuscate::encode(&serialized))
    }

    /// Drop the slot entirely.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.kv.remove(SLOT_KEY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u32, day: &str) -> UsageRecord {
        UsageRecord {
            count,
            ..UsageRecord::new_for_day(day)
        }
    }

    #[test]
    fn empty_slot_loads_empty_db() {
        let store = UsageStore::new(MemoryStore::new());
        assert!(store.load().is_empty());
    }

    #[test]
    fn save_load_round_trip() {
        let store = UsageStore::new(MemoryStore::new());
        let mut db = UsageDb::new();
        db.insert("fp-a".to_string(), record(2, "2026-08-07"));
        db.insert("fp-b".to_string(), record(0, "2026-08-01"));

        store.save(&db).unwrap();
        assert_eq!(store.load(), db);
    }

    #[test]
    fn audit_fields_survive_round_trip() {
        let store = UsageStore::new(MemoryStore::new());
        let mut rec = record(1, "2026-08-07");
        rec.ips.insert("203.0.113.9".to_string());
        rec.locations.insert("Berlin, DE".to_string());
        rec.security_token = Some("token".to_string());

        let mut db = UsageDb::new();
        db.insert("fp".to_string(), rec.clone());
        store.save(&db).unwrap();

        assert_eq!(store.load().get("fp"), Some(&rec));
    }

    #[test]
    fn corrupt_slot_loads_empty_db() {
        let kv = MemoryStore::new();
        kv.set(SLOT_KEY, "definitely not an obfuscated blob").unwrap();
        let store = UsageStore::new(kv);
        assert!(store.load().is_empty());
    }

    #[test]
    fn slot_content_is_obfuscated_at_rest() {
        let kv = MemoryStore::new();
        let store = UsageStore::new(kv);
        let mut db = UsageDb::new();
        db.insert("fp".to_string(), record(3, "2026-08-07"));
        store.save(&db).unwrap();

        let raw = store.kv.get(SLOT_KEY).unwrap().unwrap();
        assert!(!raw.contains("lastReset"));
        assert!(!raw.contains("fp"));
    }

    #[test]
    fn wire_names_are_camel_case_and_sparse() {
        let json = serde_json::to_string(&record(1, "2026-08-07")).unwrap();
        assert!(json.contains("\"lastReset\""));
        assert!(!json.contains("ips"));
        assert!(!json.contains("securityToken"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "postern-store-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let kv = FileStore::open(&dir).unwrap();

        assert_eq!(kv.get(SLOT_KEY).unwrap(), None);
        kv.set(SLOT_KEY, "first").unwrap();
        kv.set(SLOT_KEY, "second").unwrap();
        assert_eq!(kv.get(SLOT_KEY).unwrap().as_deref(), Some("second"));

        kv.remove(SLOT_KEY).unwrap();
        assert_eq!(kv.get(SLOT_KEY).unwrap(), None);
        // Removing an absent key is not an error
        kv.remove(SLOT_KEY).unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clear_drops_the_slot() {
        let store = UsageStore::new(MemoryStore::new());
        let mut db = UsageDb::new();
        db.insert("fp".to_string(), record(1, "2026-08-07"));
        store.save(&db).unwrap();

        store.clear().unwrap();
        assert!(store.load().is_empty());
    }
}
