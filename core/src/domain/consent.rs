// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An append-only consent event: never carries field *values*, only the
/// names of fields a capture covered (§3 invariant: "no user-content payloads
/// in the log").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub origin: String,
    pub field_names: Vec<String>,
}

impl ConsentRecord {
    pub fn new(actor: String, origin: String, field_names: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor,
            origin,
            field_names,
        }
    }
}
