// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The pending-approval store, SSE-style broadcast bus, and timeout reaper
//! (§4.2). Grounded directly in the teacher's
//! `infrastructure/event_bus.rs::EventBus` (`tokio::sync::broadcast`,
//! `subscriber_count`, lag handling) generalized from domain events to
//! approval events, plus a `DashMap`-backed pending store generalized from
//! the teacher's `InMemorySmcpSessionRepository`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::domain::approval::{Approval, ApprovalEvent, ApprovalId, ApprovalState};
use crate::domain::errors::GatewayError;
use crate::domain::manifest::RiskLevel;
use crate::domain::tool_call::ToolCall;

/// Upper bound on the pending store (§4.2 "Upper bound: 10 000").
pub const MAX_PENDING: usize = 10_000;
/// Minimum per-subscriber broadcast buffer (§4.2 "≥ 64 events").
pub const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalBusError {
    #[error("approval queue full")]
    QueueFull,
    #[error("approval {0} not found")]
    NotFound(ApprovalId),
}

impl From<ApprovalBusError> for GatewayError {
    fn from(e: ApprovalBusError) -> Self {
        match e {
            ApprovalBusError::QueueFull => GatewayError::ApprovalQueueFull,
            ApprovalBusError::NotFound(id) => GatewayError::NotFound { what: format!("approval {id}") },
        }
    }
}

pub struct ApprovalBus {
    next_id: AtomicU64,
    pending: DashMap<ApprovalId, Approval>,
    sender: broadcast::Sender<ApprovalEvent>,
    timeout_seconds: std::sync::atomic::AtomicU64,
}

impl ApprovalBus {
    pub fn new(timeout_seconds: u64) -> Arc<Self> {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            sender,
            timeout_seconds: std::sync::atomic::AtomicU64::new(timeout_seconds),
        })
    }

    pub fn set_timeout_seconds(&self, seconds: u64) {
        self.timeout_seconds.store(seconds, Ordering::Relaxed);
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.load(Ordering::Relaxed)
    }

    /// §4.1 stage 7: construct and register an Approval, publish `approval.created`.
    /// Resolved approvals are retained up to `MAX_PENDING` too (§4.2 "resolved
    /// approvals retained in memory up to a cap"): at capacity, the oldest
    /// resolved entry is evicted to make room before a genuinely-pending queue
    /// is rejected as full.
    pub fn create(&self, call: ToolCall, risk: RiskLevel) -> Result<Approval, ApprovalBusError> {
        if self.pending.len() >= MAX_PENDING {
            self.evict_oldest_resolved();
        }
        if self.pending.len() >= MAX_PENDING {
            return Err(ApprovalBusError::QueueFull);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let approval = Approval::new(id, call, risk);
        self.pending.insert(id, approval.clone());
        crate::infrastructure::metrics::set_pending_approvals(self.pending.len() as u64);
        self.publish(ApprovalEvent::Created {
            approval: Box::new(approval.clone()),
        });
        Ok(approval)
    }

    /// Removes the resolved entry with the oldest `resolved_at` (falling back
    /// to `created_at` for entries resolved before that field existed). A
    /// no-op if nothing is resolved yet.
    fn evict_oldest_resolved(&self) {
        let oldest = self
            .pending
            .iter()
            .filter(|e| e.state.is_terminal())
            .min_by_key(|e| e.resolved_at.unwrap_or(e.created_at))
            .map(|e| *e.key());
        if let Some(id) = oldest {
            self.pending.remove(&id);
        }
    }

    pub fn get(&self, id: ApprovalId) -> Option<Approval> {
        self.pending.get(&id).map(|a| a.clone())
    }

    pub fn list(&self) -> Vec<Approval> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    /// Idempotent on terminal state (§4.2). Returns the resulting `Approval`
    /// so callers can tell whether dispatch resumption is still owed (only
    /// the caller that actually transitioned pending->approved resumes it).
    pub fn approve(&self, id: ApprovalId, resolver: &str) -> Result<(Approval, bool), ApprovalBusError> {
        let mut entry = self.pending.get_mut(&id).ok_or(ApprovalBusError::NotFound(id))?;
        let was_pending = entry.state == ApprovalState::Pending;
        entry.approve(resolver);
        let approval = entry.clone();
        drop(entry);
        if was_pending {
            self.publish(ApprovalEvent::Approved {
                id,
                resolver: resolver.to_string(),
            });
        }
        Ok((approval, was_pending))
    }

    pub fn reject(&self, id: ApprovalId, resolver: &str) -> Result<(Approval, bool), ApprovalBusError> {
        let mut entry = self.pending.get_mut(&id).ok_or(ApprovalBusError::NotFound(id))?;
        let was_pending = entry.state == ApprovalState::Pending;
        entry.reject(resolver);
        let approval = entry.clone();
        drop(entry);
        if was_pending {
            self.publish(ApprovalEvent::Rejected {
                id,
                resolver: resolver.to_string(),
            });
        }
        Ok((approval, was_pending))
    }

    /// One reaper tick: transition every pending entry older than the
    /// configured timeout to `timed_out`. Timeout 0 disables this entirely
    /// (§4.2, §8 boundary behavior).
    pub fn reap_expired(&self) -> Vec<Approval> {
        let timeout = self.timeout_seconds();
        if timeout == 0 {
            return Vec::new();
        }
        let mut timed_out = Vec::new();
        for mut entry in self.pending.iter_mut() {
            if entry.state == ApprovalState::Pending
                && entry.age() >= chrono::Duration::seconds(timeout as i64)
            {
                entry.time_out();
                timed_out.push(entry.clone());
            }
        }
        for approval in &timed_out {
            self.publish(ApprovalEvent::TimedOut { id: approval.id });
        }
        timed_out
    }

    pub fn subscribe(&self) -> ApprovalEventReceiver {
        ApprovalEventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn publish(&self, event: ApprovalEvent) {
        // No receivers is not an error — matches the teacher's EventBus,
        // which treats `send` failures as "nobody is listening right now".
        let _ = self.sender.send(event);
    }

    #[cfg(test)]
    pub(crate) fn force_created_at(&self, id: ApprovalId, created_at: chrono::DateTime<Utc>) {
        if let Some(mut entry) = self.pending.get_mut(&id) {
            entry.created_at = created_at;
        }
    }
}

pub struct ApprovalEventReceiver {
    inner: broadcast::Receiver<ApprovalEvent>,
}

impl ApprovalEventReceiver {
    /// Returns `Ok(None)` on lag (slow consumer) so the caller can emit
    /// `ApprovalEvent::SlowConsumer` and drop the subscription, matching
    /// §4.2's "drop the subscriber with a slow_consumer terminal event".
    pub async fn recv(&mut self) -> Result<Option<ApprovalEvent>, broadcast::error::RecvError> {
        match self.inner.recv().await {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("approval bus subscriber lagged by {n} events");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool_call::Actor;
    use uuid::Uuid;

    fn sample_call() -> ToolCall {
        ToolCall::new(
            Uuid::new_v4(),
            "shell".into(),
            "exec".into(),
            serde_json::json!({}),
            Actor::anonymous(),
        )
    }

    #[tokio::test]
    async fn created_event_is_observed_by_subscriber() {
        let bus = ApprovalBus::new(300);
        let mut rx = bus.subscribe();
        let approval = bus.create(sample_call(), RiskLevel::High).unwrap();
        let event = rx.recv().await.unwrap().unwrap();
        assert_eq!(event.approval_id(), Some(approval.id));
    }

    #[tokio::test]
    async fn approve_resumption_flag_only_true_once() {
        let bus = ApprovalBus::new(300);
        let approval = bus.create(sample_call(), RiskLevel::High).unwrap();
        let (_, resumed_first) = bus.approve(approval.id, "admin").unwrap();
        let (_, resumed_second) = bus.approve(approval.id, "admin").unwrap();
        assert!(resumed_first);
        assert!(!resumed_second);
    }

    #[tokio::test]
    async fn zero_timeout_disables_reaper() {
        let bus = ApprovalBus::new(0);
        let approval = bus.create(sample_call(), RiskLevel::High).unwrap();
        bus.force_created_at(approval.id, Utc::now() - chrono::Duration::days(1));
        let timed_out = bus.reap_expired();
        assert!(timed_out.is_empty());
    }

    #[tokio::test]
    async fn reaper_times_out_stale_entries() {
        let bus = ApprovalBus::new(1);
        let approval = bus.create(sample_call(), RiskLevel::High).unwrap();
        bus.force_created_at(approval.id, Utc::now() - chrono::Duration::seconds(5));
        let timed_out = bus.reap_expired();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(bus.get(approval.id).unwrap().state, ApprovalState::TimedOut);
    }

    #[tokio::test]
    async fn queue_full_rejects_new_high_risk_calls() {
        let bus = ApprovalBus::new(300);
        for _ in 0..MAX_PENDING {
            bus.pending.insert(
                bus.next_id.fetch_add(1, Ordering::Relaxed),
                Approval::new(0, sample_call(), RiskLevel::High),
            );
        }
        assert!(matches!(
            bus.create(sample_call(), RiskLevel::High),
            Err(ApprovalBusError::QueueFull)
        ));
    }
}
