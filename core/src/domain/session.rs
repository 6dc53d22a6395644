// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Access,
    Refresh,
}

/// An opaque bearer token mapped server-side to `(user, kind, expiry)`.
/// State machine: `active -> (revoked | expired)`, terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: String,
    pub kind: SessionKind,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Session {
    pub fn is_active(&self) -> bool {
        !self.revoked && Utc::now() < self.expires_at
    }

    pub fn revoke(&mut self) {
        self.revoked = true;
    }
}
