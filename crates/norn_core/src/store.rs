use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

// ============================================================================
// KvStore trait
// ============================================================================

/// Namespaced key-value persistence over JSON values. Everything the agent
/// remembers across restarts goes through this seam; the typed facades in
/// the model modules sit on top of it.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, namespace: &str, key: &str) -> Result<()>;
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Typed read on top of a raw store.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KvStore,
    namespace: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(namespace, key).await? {
        Some(value) => {
            let typed = serde_json::from_value(value)
                .with_context(|| format!("Corrupt record at {namespace}/{key}"))?;
            Ok(Some(typed))
        }
        None => Ok(None),
    }
}

/// Typed write on top of a raw store.
pub async fn save<T: Serialize>(
    store: &dyn KvStore,
    namespace: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_value(value)
        .with_context(|| format!("Failed to serialize record for {namespace}/{key}"))?;
    store.put(namespace, key, json).await
}

// ============================================================================
// In-memory backing
// ============================================================================

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let mut data = self.data.write().await;
        if let Some(ns) = data.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// JSON file backing
// ============================================================================

/// One JSON file per namespace under a root directory. Writes go through a
/// temp file + rename so a crash mid-write never leaves a torn file.
pub struct JsonFileStore {
    root: PathBuf,
    // Serializes writers per process; the rename keeps other processes safe.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{namespace}.json"))
    }

    async fn read_namespace(&self, namespace: &str) -> Result<HashMap<String, Value>> {
        let path = self.namespace_path(namespace);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Corrupt store file: {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_namespace(&self, namespace: &str, data: &HashMap<String, Value>) -> Result<()> {
        let path = self.namespace_path(namespace);
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create store dir {}", self.root.display()))?;
        let json = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let data = self.read_namespace(namespace).await?;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read_namespace(namespace).await?;
        data.insert(key.to_string(), value);
        self.write_namespace(namespace, &data).await
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read_namespace(namespace).await?;
        if data.remove(key).is_some() {
            self.write_namespace(namespace, &data).await?;
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let data = self.read_namespace(namespace).await?;
        Ok(data.keys().cloned().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store
            .put("profiles", "u1", json!({"name": "Astrid"}))
            .await
            .unwrap();
        let got = store.get("profiles", "u1").await.unwrap().unwrap();
        assert_eq!(got["name"], "Astrid");
        assert!(store.get("profiles", "u2").await.unwrap().is_none());
        assert!(store.get("states", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_remove_and_keys() {
        let store = MemoryStore::new();
        store.put("ns", "a", json!(1)).await.unwrap();
        store.put("ns", "b", json!(2)).await.unwrap();
        let mut keys = store.keys("ns").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        store.remove("ns", "a").await.unwrap();
        assert!(store.get("ns", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store
            .put("adventures", "adv_1", json!({"status": "active"}))
            .await
            .unwrap();
        let got = store.get("adventures", "adv_1").await.unwrap().unwrap();
        assert_eq!(got["status"], "active");

        // A fresh handle over the same directory sees the same data.
        let reopened = JsonFileStore::new(dir.path());
        let got = reopened.get("adventures", "adv_1").await.unwrap().unwrap();
        assert_eq!(got["status"], "active");
    }

    #[tokio::test]
    async fn test_file_store_missing_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("nothing", "x").await.unwrap().is_none());
        assert!(store.keys("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_typed_load_save() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Rec {
            n: u32,
        }
        let store = MemoryStore::new();
        save(&store, "ns", "k", &Rec { n: 7 }).await.unwrap();
        let got: Option<Rec> = load(&store, "ns", "k").await.unwrap();
        assert_eq!(got, Some(Rec { n: 7 }));
    }
}
