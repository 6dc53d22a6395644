// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-agent key-value memory with TTL (§3 MemoryEntry, §2 item 11 in the
//! endpoint table under `/agents/{id}/memory`). One document per agent,
//! expired entries pruned on read, never surfaced.
//!
//! Grounded in `FileBackedStore`, keyed by `agent_id` with the per-agent
//! value being a `HashMap<String, MemoryEntry>` rather than the store's
//! top-level map holding individual entries directly — matches §6's
//! "one document per agent" persistence note.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::memory::MemoryEntry;
use crate::infrastructure::repositories::FileBackedStore;

pub struct MemoryService {
    store: Arc<FileBackedStore<String, HashMap<String, MemoryEntry>>>,
}

impl MemoryService {
    pub fn new(store: Arc<FileBackedStore<String, HashMap<String, MemoryEntry>>>) -> Self {
        Self { store }
    }

    pub async fn set(&self, agent_id: &str, key: &str, value: serde_json::Value, ttl_seconds: Option<i64>) -> anyhow::Result<()> {
        let entry = MemoryEntry {
            key: key.to_string(),
            value,
            expires_at: ttl_seconds.map(|s| Utc::now() + chrono::Duration::seconds(s)),
        };
        self.store
            .mutate_or_default(&agent_id.to_string(), |doc| {
                doc.insert(key.to_string(), entry);
            })
            .await?;
        Ok(())
    }

    /// Reads prune expired entries as a side effect, matching §3's "pruned on
    /// read" lifecycle note, then return only the remaining live entries.
    pub async fn get(&self, agent_id: &str, key: &str) -> Option<serde_json::Value> {
        let live = self.live_entries(agent_id).await;
        live.get(key).map(|e| e.value.clone())
    }

    pub async fn list(&self, agent_id: &str) -> Vec<MemoryEntry> {
        self.live_entries(agent_id).await.into_values().collect()
    }

    pub async fn delete(&self, agent_id: &str, key: &str) -> anyhow::Result<()> {
        self.store
            .mutate_or_default(&agent_id.to_string(), |doc| {
                doc.remove(key);
            })
            .await?;
        Ok(())
    }

    /// Admin-triggered sweep (`POST /agents/{id}/memory/prune`): persist the
    /// pruned set back to disk rather than only filtering on read.
    pub async fn prune(&self, agent_id: &str) -> anyhow::Result<usize> {
        let now = Utc::now();
        let removed = self
            .store
            .mutate_or_default(&agent_id.to_string(), |doc| {
                let before = doc.len();
                doc.retain(|_, entry| !entry.is_expired(now));
                before - doc.len()
            })
            .await?;
        Ok(removed)
    }

    async fn live_entries(&self, agent_id: &str) -> HashMap<String, MemoryEntry> {
        let now: DateTime<Utc> = Utc::now();
        self.store
            .get(&agent_id.to_string())
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, e)| !e.is_expired(now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(dir: &std::path::Path) -> MemoryService {
        MemoryService::new(Arc::new(FileBackedStore::load(dir.join("memory.json")).unwrap()))
    }

    #[tokio::test]
    async fn set_then_get_within_ttl_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.set("agent-1", "greeting", serde_json::json!("hi"), Some(3600)).await.unwrap();
        assert_eq!(svc.get("agent-1", "greeting").await, Some(serde_json::json!("hi")));
    }

    #[tokio::test]
    async fn expired_entries_never_surface() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.set("agent-1", "stale", serde_json::json!("bye"), Some(-1)).await.unwrap();
        assert_eq!(svc.get("agent-1", "stale").await, None);
    }

    #[tokio::test]
    async fn prune_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.set("agent-1", "fresh", serde_json::json!(1), Some(3600)).await.unwrap();
        svc.set("agent-1", "stale", serde_json::json!(2), Some(-1)).await.unwrap();
        let removed = svc.prune("agent-1").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(svc.list("agent-1").await.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.set("agent-1", "k", serde_json::json!(1), None).await.unwrap();
        svc.delete("agent-1", "k").await.unwrap();
        assert_eq!(svc.get("agent-1", "k").await, None);
    }
}
