// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::manifest::RiskLevel;
use super::tool_call::ToolCall;

pub type ApprovalId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    TimedOut,
}

impl ApprovalState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }
}

/// A paused ToolCall awaiting human sign-off. Identified by a gateway-assigned
/// monotonically increasing integer.
///
/// Unlike the teacher's `ToolInvocation` state machine (which errors on an
/// invalid transition), resolution here is deliberately idempotent on terminal
/// state per spec §4.2 ("approve/reject are idempotent on terminal state;
/// return current state, not an error") — callers retrying a webhook-driven
/// approve must never see a spurious conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub call: ToolCall,
    pub risk: RiskLevel,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolver: Option<String>,
}

impl Approval {
    pub fn new(id: ApprovalId, call: ToolCall, risk: RiskLevel) -> Self {
        Self {
            id,
            call,
            risk,
            state: ApprovalState::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolver: None,
        }
    }

    /// Transition to a terminal state. No-op if already terminal: returns the
    /// state that was actually reached (the original terminal state, not the
    /// requested one), matching the "idempotent on terminal state" invariant.
    fn resolve(&mut self, state: ApprovalState, resolver: Option<String>) -> ApprovalState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = state;
        self.resolved_at = Some(Utc::now());
        self.resolver = resolver;
        self.state
    }

    pub fn approve(&mut self, resolver: impl Into<String>) -> ApprovalState {
        self.resolve(ApprovalState::Approved, Some(resolver.into()))
    }

    pub fn reject(&mut self, resolver: impl Into<String>) -> ApprovalState {
        self.resolve(ApprovalState::Rejected, Some(resolver.into()))
    }

    pub fn time_out(&mut self) -> ApprovalState {
        self.resolve(ApprovalState::TimedOut, None)
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Approval Bus event kinds, broadcast to SSE subscribers and webhook fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalEvent {
    #[serde(rename = "approval.created")]
    Created { approval: Box<Approval> },
    #[serde(rename = "approval.approved")]
    Approved { id: ApprovalId, resolver: String },
    #[serde(rename = "approval.rejected")]
    Rejected { id: ApprovalId, resolver: String },
    #[serde(rename = "approval.timed_out")]
    TimedOut { id: ApprovalId },
    /// Terminal event delivered to a subscriber whose buffer overflowed; the
    /// subscriber is then dropped (§4.2 "drop the subscriber with a slow_consumer
    /// terminal event").
    SlowConsumer,
}

impl ApprovalEvent {
    pub fn approval_id(&self) -> Option<ApprovalId> {
        match self {
            ApprovalEvent::Created { approval } => Some(approval.id),
            ApprovalEvent::Approved { id, .. }
            | ApprovalEvent::Rejected { id, .. }
            | ApprovalEvent::TimedOut { id } => Some(*id),
            ApprovalEvent::SlowConsumer => None,
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
            "shell".to_string(),
            "exec".to_string(),
            serde_json::json!({"cmd": "rm -rf /tmp/x"}),
            Actor::anonymous(),
        )
    }

    #[test]
    fn approve_then_approve_is_idempotent() {
        let mut a = Approval::new(1, sample_call(), RiskLevel::High);
        assert_eq!(a.approve("admin"), ApprovalState::Approved);
        let resolved_at_first = a.resolved_at;
        assert_eq!(a.approve("someone-else"), ApprovalState::Approved);
        assert_eq!(a.resolver.as_deref(), Some("admin"));
        assert_eq!(a.resolved_at, resolved_at_first);
    }

    #[test]
    fn reject_after_approve_does_not_override() {
        let mut a = Approval::new(1, sample_call(), RiskLevel::High);
        a.approve("admin");
        assert_eq!(a.reject("someone-else"), ApprovalState::Approved);
    }
}
