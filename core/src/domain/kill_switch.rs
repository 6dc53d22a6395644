// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide singleton flag. While active, the Supervisor rejects every
/// call at pipeline stage 1 (§4.1, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitch {
    pub active: bool,
    pub reason: Option<String>,
    pub engaged_at: Option<DateTime<Utc>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self {
            active: false,
            reason: None,
            engaged_at: None,
        }
    }
}

impl KillSwitch {
    pub fn engage(&mut self, reason: String) {
        self.active = true;
        self.reason = Some(reason);
        self.engaged_at = Some(Utc::now());
    }

    pub fn disengage(&mut self) {
        self.active = false;
        self.reason = None;
        self.engaged_at = None;
    }
}
