// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One append-only audit line: `{ts, actor, event, details}`. `details` is
/// redacted by construction — callers pass fingerprints/sizes/names, never
/// secret values or raw tool args (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub event: String,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(actor: impl Into<String>, event: impl Into<String>, details: Value) -> Self {
        Self {
            ts: Utc::now(),
            actor: actor.into(),
            event: event.into(),
            details,
        }
    }
}

/// Stable short hash of args (not their content) used in audit and dedup
/// (GLOSSARY "Fingerprint"). Deliberately one-way and non-reversible.
pub fn fingerprint(value: &Value) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let v = serde_json::json!({"a": 1, "b": "x"});
        assert_eq!(fingerprint(&v), fingerprint(&v));
    }

    #[test]
    fn fingerprint_differs_for_different_input() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
