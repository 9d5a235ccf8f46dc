//! Durable key/value store for device credentials
//!
//! One record per device identity. The file backend stores the whole record
//! as `{"_": {...}}`; a missing or unreadable file is an empty cache. Writes
//! are load-modify-store of the full record.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Cache key holding the device key the cached tokens belong to
pub const DEVICE_KEY: &str = "key";
/// Cache key holding the pending request token
pub const REQUEST_TOKEN_KEY: &str = "requesttoken";
/// Cache key holding the issued access token
pub const ACCESS_TOKEN_KEY: &str = "accesstoken";

/// Cache write errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode cache record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key/value contract consumed by the token state machine
pub trait CredentialCache: Send {
    /// Read one logical key; absence of the backing store is not an error
    fn get(&self, key: &str) -> Option<Value>;

    /// Overwrite one logical key
    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError>;

    /// Clear one logical key, or the whole record when `key` is `None`
    fn clear(&mut self, key: Option<&str>) -> Result<(), CacheError>;
}

/// JSON file backend, one file per device key
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default file name for a device key inside `dir`
    pub fn for_device(dir: &Path, device_key: &str) -> Self {
        Self::new(dir.join(format!("microgear-{device_key}.cache")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Option<Map<String, Value>> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(mut wrapper)) => match wrapper.remove("_") {
                Some(Value::Object(record)) => Some(record),
                _ => None,
            },
            Ok(_) => None,
            Err(e) => {
                debug!("Ignoring unreadable cache {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn store(&self, record: Option<Map<String, Value>>) -> Result<(), CacheError> {
        let payload = record.map(Value::Object).unwrap_or(Value::Null);
        let mut wrapper = Map::new();
        wrapper.insert("_".to_string(), payload);
        let encoded = serde_json::to_string(&Value::Object(wrapper))?;
        std::fs::write(&self.path, encoded).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl CredentialCache for FileCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.load()?
            .get(key)
            .filter(|value| !value.is_null())
            .cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError> {
        let mut record = self.load().unwrap_or_default();
        record.insert(key.to_string(), value);
        self.store(Some(record))
    }

    fn clear(&mut self, key: Option<&str>) -> Result<(), CacheError> {
        let Some(mut record) = self.load() else {
            return Ok(());
        };
        match key {
            Some(key) => {
                record.insert(key.to_string(), Value::Null);
                self.store(Some(record))
            }
            None => self.store(None),
        }
    }
}

/// In-process backend, used by tests and ephemeral devices
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Value::is_null)
    }
}

impl CredentialCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .get(key)
            .filter(|value| !value.is_null())
            .cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&mut self, key: Option<&str>) -> Result<(), CacheError> {
        match key {
            Some(key) => {
                self.entries.remove(key);
            }
            None => self.entries.clear(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_cache() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::for_device(dir.path(), "nokey");

        assert_eq!(cache.get(DEVICE_KEY), None);
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_file_cache_round_trips_through_wrapper() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileCache::for_device(dir.path(), "k1");

        cache.set(DEVICE_KEY, json!("k1")).unwrap();
        cache
            .set(REQUEST_TOKEN_KEY, json!({"token": "rt", "secret": "rs", "verifier": "v"}))
            .unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["_"]["key"], json!("k1"));
        assert_eq!(raw["_"]["requesttoken"]["token"], json!("rt"));

        let reopened = FileCache::new(cache.path());
        assert_eq!(reopened.get(DEVICE_KEY), Some(json!("k1")));
    }

    #[test]
    fn test_clear_single_key_keeps_others() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileCache::for_device(dir.path(), "k2");
        cache.set(DEVICE_KEY, json!("k2")).unwrap();
        cache.set(ACCESS_TOKEN_KEY, json!({"token": "at"})).unwrap();

        cache.clear(Some(ACCESS_TOKEN_KEY)).unwrap();

        assert_eq!(cache.get(ACCESS_TOKEN_KEY), None);
        assert_eq!(cache.get(DEVICE_KEY), Some(json!("k2")));
    }

    #[test]
    fn test_clear_all_writes_null_record() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileCache::for_device(dir.path(), "k3");
        cache.set(DEVICE_KEY, json!("k3")).unwrap();

        cache.clear(None).unwrap();

        let raw = std::fs::read_to_string(cache.path()).unwrap();
        assert_eq!(raw, r#"{"_":null}"#);
        assert_eq!(cache.get(DEVICE_KEY), None);

        // A null record is still an empty cache for later writes
        cache.set(DEVICE_KEY, json!("k3")).unwrap();
        assert_eq!(cache.get(DEVICE_KEY), Some(json!("k3")));
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.cache");
        std::fs::write(&path, "{not json").unwrap();
        let mut cache = FileCache::new(&path);

        assert_eq!(cache.get(DEVICE_KEY), None);
        cache.set(DEVICE_KEY, json!("fresh")).unwrap();
        assert_eq!(cache.get(DEVICE_KEY), Some(json!("fresh")));
    }

    #[test]
    fn test_clear_on_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileCache::for_device(dir.path(), "ghost");

        cache.clear(None).unwrap();
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let mut cache = FileCache::new("/nonexistent-dir-for-microgear/x.cache");
        let result = cache.set(DEVICE_KEY, json!("k"));
        assert!(matches!(result, Err(CacheError::Write { .. })));
    }

    #[test]
    fn test_memory_cache_contract() {
        let mut cache = MemoryCache::new();
        assert!(cache.is_empty());

        cache.set(DEVICE_KEY, json!("k")).unwrap();
        cache.set(ACCESS_TOKEN_KEY, json!({"token": "t"})).unwrap();
        assert_eq!(cache.get(DEVICE_KEY), Some(json!("k")));

        cache.clear(Some(ACCESS_TOKEN_KEY)).unwrap();
        assert_eq!(cache.get(ACCESS_TOKEN_KEY), None);

        cache.clear(None).unwrap();
        assert!(cache.is_empty());
    }
}
