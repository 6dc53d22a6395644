// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! §4.1 stage 6: heuristic risk scoring. A pure function — no I/O, no locks —
//! so it stays snapshot-testable, per §9's "keep pure so tests are trivial".
//!
//! Grounded in the teacher's `domain/security_context/capability.rs`
//! pattern-matching style (exact/wildcard tool matching, path- and
//! command-allowlist checks via simple string ops) without its `url`-crate
//! dependency or the `PolicyViolation` coupling that subtree carried.

use crate::domain::manifest::RiskLevel;
use crate::domain::tool_call::ToolCall;

const LARGE_PAYLOAD_BYTES: usize = 64 * 1024;

/// §4.1 stage 6, base-by-family step.
fn base_risk(tool: &str) -> RiskLevel {
    if tool == "shell" || tool == "system" || tool == "exec" {
        RiskLevel::High
    } else if tool == "file" || tool == "network" {
        RiskLevel::Med
    } else {
        RiskLevel::Low
    }
}

/// Arg-key-pattern escalation step. Walks only string values (same traversal
/// shape as the content filter) looking for path traversal, privileged shell
/// idioms, and SSRF-shaped targets.
fn has_escalating_pattern(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => string_is_risky(s),
        serde_json::Value::Array(items) => items.iter().any(has_escalating_pattern),
        serde_json::Value::Object(map) => map.values().any(has_escalating_pattern),
        _ => false,
    }
}

fn string_is_risky(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    s.contains("..")
        || lower.starts_with("/etc")
        || lower.starts_with("/root")
        || lower.contains("sudo")
        || lower.contains("rm -rf")
        || ((lower.contains("curl") || lower.contains("wget")) && lower.contains('|'))
        || lower.contains("eval(")
        || is_ssrf_target(&lower)
}

fn is_ssrf_target(lower: &str) -> bool {
    lower.contains("127.0.0.1")
        || lower.contains("localhost")
        || lower.contains("169.254.")
        || lower.contains("10.")
        || lower.contains("192.168.")
        || lower.contains(".internal")
        || lower.contains(".local")
}

/// Compute the heuristic risk level for a call that has no manifest-declared
/// `risk_level`. Clamped to `{low, med, high}` (never escalates twice from
/// the same step; each matching step bumps exactly one level).
pub fn score(call: &ToolCall) -> RiskLevel {
    let mut risk = base_risk(&call.tool);
    if has_escalating_pattern(&call.args) {
        risk = risk.bump();
    }
    if call.payload_size() > LARGE_PAYLOAD_BYTES {
        risk = risk.bump();
    }
    risk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool_call::Actor;
    use uuid::Uuid;

    fn call(tool: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(Uuid::new_v4(), tool.to_string(), "run".to_string(), args, Actor::anonymous())
    }

    #[test]
    fn shell_family_is_high_by_default() {
        assert_eq!(score(&call("shell", serde_json::json!({}))), RiskLevel::High);
    }

    #[test]
    fn read_only_family_is_low_by_default() {
        assert_eq!(score(&call("weather", serde_json::json!({}))), RiskLevel::Low);
    }

    #[test]
    fn path_traversal_escalates_one_level() {
        let c = call("file", serde_json::json!({"path": "../../etc/passwd"}));
        assert_eq!(score(&c), RiskLevel::High);
    }

    #[test]
    fn large_payload_escalates_one_level() {
        let big = "x".repeat(LARGE_PAYLOAD_BYTES + 1);
        let c = call("weather", serde_json::json!({"blob": big}));
        assert_eq!(score(&c), RiskLevel::Med);
    }

    #[test]
    fn high_never_escalates_past_high() {
        let c = call("shell", serde_json::json!({"cmd": "sudo rm -rf /"}));
        assert_eq!(score(&c), RiskLevel::High);
    }

    #[test]
    fn ssrf_target_escalates() {
        let c = call("network", serde_json::json!({"url": "http://169.254.169.254/latest/meta-data"}));
        assert_eq!(score(&c), RiskLevel::High);
    }
}
