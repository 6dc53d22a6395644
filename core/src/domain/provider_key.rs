// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named secret value held by the Key Store, identified by `provider` name
/// (e.g. `openai`, `anthropic`). The raw `value` is never logged or audited —
/// only fingerprints and metadata leave this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKey {
    pub provider: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProviderKey {
    pub fn new(provider: String, value: String, ttl: Option<chrono::Duration>) -> Self {
        let created_at = Utc::now();
        Self {
            provider,
            value,
            created_at,
            expires_at: ttl.map(|d| created_at + d),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp < now).unwrap_or(false)
    }

    pub fn rotate(&mut self, new_value: String, ttl: Option<chrono::Duration>) {
        self.value = new_value;
        self.created_at = Utc::now();
        self.expires_at = ttl.map(|d| self.created_at + d);
    }

    /// Status view that never exposes `value` (used by the `/key/status` endpoint).
    pub fn status(&self) -> ProviderKeyStatus {
        ProviderKeyStatus {
            provider: self.provider.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKeyStatus {
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}
