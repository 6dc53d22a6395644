// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A per-agent key-value entry, identified by `(agent_id, key)`. Expired
/// entries are pruned on read and never surface (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp < now).unwrap_or(false)
    }
}
