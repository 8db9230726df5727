use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Minimal persistence seam for scored signals and run summaries.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: Value) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Value>>;
    /// Every entry, ordered by key.
    fn snapshot(&self) -> Result<BTreeMap<String, Value>>;
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("store lock poisoned")
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().map_err(poisoned)?.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.entries.read().map_err(poisoned)?.clone())
    }
}

/// One JSON object on disk. Every `put` rewrites the file through a
/// sibling temp file and a rename, so readers never see a torn write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open `path`, loading existing entries. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                let object: Map<String, Value> = serde_json::from_str(&text)
                    .with_context(|| format!("{} is not a JSON object", path.display()))?;
                object.into_iter().collect()
            }
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), entries = entries.len(), "store opened");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let text = serde_json::to_string_pretty(entries).context("Failed to serialize store")?;
        fs::write(&tmp, text).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), entries = entries.len(), "store flushed");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.entries.read().map_err(poisoned)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemoryStore::new();
        store.put("a", json!(1)).unwrap();
        store.put("a", json!(2)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(2)));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("signals.json");

        let store = FileStore::open(&path).unwrap();
        store.put("RELIANCE@10:00", json!({"action": "BUY"})).unwrap();
        store.put("SBIN@10:05", json!({"action": "SELL"})).unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        let snapshot = reopened.snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(reopened.get("SBIN@10:05").unwrap(), Some(json!({"action": "SELL"})));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_non_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(FileStore::open(&path).is_err());
    }
}
