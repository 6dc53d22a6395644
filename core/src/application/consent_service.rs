// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consent log (§3 ConsentRecord, §6 `/consent/timeline`, `/consent/export`):
//! append-only, erasable per actor, never carries field values.
//!
//! Grounded in `FileBackedStore`, keyed by `actor` so a per-actor export or
//! delete (§6 `GET/DELETE /consent/export/{actor}`) touches exactly one
//! document rather than scanning a flat log.

use std::sync::Arc;

use crate::domain::consent::ConsentRecord;
use crate::infrastructure::repositories::FileBackedStore;

pub struct ConsentService {
    store: Arc<FileBackedStore<String, Vec<ConsentRecord>>>,
}

impl ConsentService {
    pub fn new(store: Arc<FileBackedStore<String, Vec<ConsentRecord>>>) -> Self {
        Self { store }
    }

    pub async fn record(&self, actor: &str, origin: &str, field_names: Vec<String>) -> anyhow::Result<()> {
        let record = ConsentRecord::new(actor.to_string(), origin.to_string(), field_names);
        self.store
            .mutate_or_default(&actor.to_string(), |records| records.push(record))
            .await?;
        Ok(())
    }

    /// Full timeline across every actor, ordered oldest-first within each
    /// actor's own document (cross-actor interleaving is not ordered, matching
    /// the "no total order across unrelated requests" concurrency note §5).
    pub async fn timeline(&self) -> Vec<ConsentRecord> {
        let mut all: Vec<ConsentRecord> = self.store.list().await.into_iter().flatten().collect();
        all.sort_by_key(|r| r.timestamp);
        all
    }

    pub async fn export(&self, actor: &str) -> Vec<ConsentRecord> {
        self.store.get(&actor.to_string()).await.unwrap_or_default()
    }

    pub async fn erase(&self, actor: &str) -> anyhow::Result<()> {
        self.store.remove(&actor.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(dir: &std::path::Path) -> ConsentService {
        ConsentService::new(Arc::new(FileBackedStore::load(dir.join("consent.json")).unwrap()))
    }

    #[tokio::test]
    async fn record_then_export_returns_only_that_actor() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.record("alice", "https://example.com", vec!["email".to_string()]).await.unwrap();
        svc.record("bob", "https://example.com", vec!["name".to_string()]).await.unwrap();
        let alice = svc.export("alice").await;
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].actor, "alice");
    }

    #[tokio::test]
    async fn erase_removes_actor_from_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.record("alice", "https://example.com", vec!["email".to_string()]).await.unwrap();
        svc.erase("alice").await.unwrap();
        assert!(svc.timeline().await.is_empty());
    }

    #[tokio::test]
    async fn field_names_never_carry_values() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.record("alice", "https://example.com", vec!["email".to_string()]).await.unwrap();
        let records = svc.export("alice").await;
        assert_eq!(records[0].field_names, vec!["email".to_string()]);
    }
}
