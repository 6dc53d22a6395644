// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File-backed registries (§9 "File-backed registries"): write-through with
//! atomic rename on mutation, loads happen once at start, concurrent
//! mutations serialized per-file. Grounded in the teacher's
//! `InMemorySmcpSessionRepository` (`Arc<RwLock<HashMap<..>>>`) pattern, with
//! a persistence layer added underneath since the teacher's version was
//! purely in-memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

/// A `HashMap<K, V>` kept in memory and mirrored to a single JSON file.
/// Every mutation re-serializes the whole map and atomically renames a temp
/// file over the target, so a reader never observes a half-written file.
pub struct FileBackedStore<K, V> {
    path: PathBuf,
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> FileBackedStore<K, V>
where
    K: std::hash::Hash + Eq + Clone + Serialize + DeserializeOwned + ToString,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Load from `path` if it exists, else start empty. The file is created
    /// on first mutation, not on construction.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let inner = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            inner: RwLock::new(inner),
        })
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<V> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn insert(&self, key: K, value: V) -> anyhow::Result<()> {
        {
            let mut guard = self.inner.write().await;
            guard.insert(key, value);
            self.flush_locked(&guard)?;
        }
        Ok(())
    }

    pub async fn remove(&self, key: &K) -> anyhow::Result<Option<V>> {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(key);
        self.flush_locked(&guard)?;
        Ok(removed)
    }

    /// Read-modify-write under a single lock acquisition, to avoid a
    /// check-then-act race between callers. Does not create an entry: `f`
    /// receives `None` if `key` is absent and the map is left unchanged.
    pub async fn mutate<R>(&self, key: &K, f: impl FnOnce(Option<&mut V>) -> R) -> anyhow::Result<R> {
        let mut guard = self.inner.write().await;
        let entry = guard.get_mut(key);
        let result = f(entry);
        self.flush_locked(&guard)?;
        Ok(result)
    }

    /// Read-modify-write that creates `V::default()` first when `key` is
    /// absent, for per-key documents that are always meaningful even empty
    /// (e.g. one memory document per agent).
    pub async fn mutate_or_default<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> anyhow::Result<R>
    where
        V: Default,
    {
        let mut guard = self.inner.write().await;
        let entry = guard.entry(key.clone()).or_default();
        let result = f(entry);
        self.flush_locked(&guard)?;
        Ok(result)
    }

    fn flush_locked(&self, map: &HashMap<K, V>) -> anyhow::Result<()> {
        write_json_atomic(&self.path, map)
    }
}

/// Serialize `value` and atomically replace `path` with it: write to a sibling
/// temp file, `fsync`, then `rename` — a reader of `path` never sees a partial
/// write (§9 design note).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        use std::io::Write;
        file.flush()?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store: FileBackedStore<Uuid, String> = FileBackedStore::load(&path).unwrap();
        let id = Uuid::new_v4();
        store.insert(id, "hello".to_string()).await.unwrap();

        let reloaded: FileBackedStore<Uuid, String> = FileBackedStore::load(&path).unwrap();
        assert_eq!(reloaded.get(&id).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store: FileBackedStore<Uuid, String> = FileBackedStore::load(&path).unwrap();
        let id = Uuid::new_v4();
        store.insert(id, "hello".to_string()).await.unwrap();
        store.remove(&id).await.unwrap();

        let reloaded: FileBackedStore<Uuid, String> = FileBackedStore::load(&path).unwrap();
        assert!(reloaded.get(&id).await.is_none());
    }
}
