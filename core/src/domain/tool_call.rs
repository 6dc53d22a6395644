// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A `{tool, action, args}` triple addressed to a specific action handler
/// inside a sandbox worker. Created per request, destroyed after dispatch;
/// never mutated once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub request_id: Uuid,
    pub tool: String,
    pub action: String,
    pub args: Value,
    pub actor: Actor,
    pub received_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(request_id: Uuid, tool: String, action: String, args: Value, actor: Actor) -> Self {
        Self {
            request_id,
            tool,
            action,
            args,
            actor,
            received_at: Utc::now(),
        }
    }

    /// The manifest/schema key `tool.action`, e.g. `file.read`.
    pub fn tool_action(&self) -> String {
        format!("{}.{}", self.tool, self.action)
    }

    /// Serialized payload size in bytes, used for the 64 KiB / 256 KiB thresholds.
    pub fn payload_size(&self) -> usize {
        serde_json::to_vec(&self.args).map(|v| v.len()).unwrap_or(0)
    }
}

/// Resolved identity of the caller: either an authenticated `User.username`, or
/// `anonymous` for unauthenticated calls (kept distinct from `User` itself so
/// the pipeline never needs a DB lookup to know who made a request).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub username: String,
    pub allowed_tools: Vec<String>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self {
            username: "anonymous".to_string(),
            allowed_tools: Vec::new(),
        }
    }

    /// Per spec §4.1 stage 2: non-empty allow-list restricts which `tool`
    /// names this actor may invoke.
    pub fn may_call_tool(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_action_joins_with_dot() {
        let call = ToolCall::new(
            Uuid::new_v4(),
            "file".to_string(),
            "read".to_string(),
            serde_json::json!({}),
            Actor::anonymous(),
        );
        assert_eq!(call.tool_action(), "file.read");
    }

    #[test]
    fn empty_allow_list_permits_everything() {
        let actor = Actor::anonymous();
        assert!(actor.may_call_tool("shell.exec"));
    }

    #[test]
    fn non_empty_allow_list_restricts() {
        let actor = Actor {
            username: "bob".to_string(),
            allowed_tools: vec!["file".to_string()],
        };
        assert!(actor.may_call_tool("file"));
        assert!(!actor.may_call_tool("shell"));
    }
}
