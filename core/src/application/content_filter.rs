// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! §4.1 stage 3: literal + regex deny rules over arbitrary nested values.
//! Recursively walks `args` collecting every string value (not map keys),
//! evaluates literal substrings then regex patterns, first match wins.
//!
//! Grounded in the teacher's `ToolPolicy`/`Capability` pattern-matching style
//! (`domain/mcp.rs`, `domain/security_context/capability.rs`): a flat Vec of
//! rules walked in order, never holding a lock while evaluating.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFilterRule {
    pub label: String,
    #[serde(flatten)]
    pub pattern: RulePattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePattern {
    Literal { literal: String },
    Regex { regex: String },
}

struct CompiledRule {
    label: String,
    matcher: Matcher,
}

enum Matcher {
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, haystack: &str) -> bool {
        match self {
            Matcher::Literal(needle) => haystack.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(haystack),
        }
    }
}

/// Rules are reloadable at runtime (`POST /admin/content-filter/reload`)
/// without restarting the process, so the compiled set lives behind a lock
/// that's only held for the O(rules) scan of one string at a time.
pub struct ContentFilter {
    rules: RwLock<Vec<CompiledRule>>,
}

impl ContentFilter {
    pub fn new(rules: Vec<ContentFilterRule>) -> anyhow::Result<Self> {
        Ok(Self {
            rules: RwLock::new(compile(rules)?),
        })
    }

    pub fn empty() -> Self {
        Self { rules: RwLock::new(Vec::new()) }
    }

    pub fn reload(&self, rules: Vec<ContentFilterRule>) -> anyhow::Result<()> {
        let compiled = compile(rules)?;
        *self.rules.write() = compiled;
        Ok(())
    }

    /// Evaluate every string found anywhere in `value` (object values, array
    /// elements, nested recursively). Literal rules are checked before regex
    /// rules within a rule list scanned in declaration order; the first
    /// matching rule wins and is returned (never the matched text itself —
    /// only the rule label is ever surfaced, per §4.1 stage 3).
    pub fn check(&self, value: &Value) -> Result<(), GatewayError> {
        let rules = self.rules.read();
        let mut strings = Vec::new();
        collect_strings(value, &mut strings);
        for s in &strings {
            for rule in rules.iter() {
                if matches!(rule.matcher, Matcher::Literal(_)) && rule.matcher.is_match(s) {
                    return Err(violation(&rule.label));
                }
            }
            for rule in rules.iter() {
                if matches!(rule.matcher, Matcher::Regex(_)) && rule.matcher.is_match(s) {
                    return Err(violation(&rule.label));
                }
            }
        }
        Ok(())
    }
}

fn violation(label: &str) -> GatewayError {
    GatewayError::ContentPolicyViolation { rule_label: label.to_string() }
}

fn compile(rules: Vec<ContentFilterRule>) -> anyhow::Result<Vec<CompiledRule>> {
    rules
        .into_iter()
        .map(|r| {
            let matcher = match r.pattern {
                RulePattern::Literal { literal } => Matcher::Literal(literal),
                RulePattern::Regex { regex } => Matcher::Regex(Regex::new(&regex)?),
            };
            Ok(CompiledRule { label: r.label, matcher })
        })
        .collect()
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal_rule(label: &str, literal: &str) -> ContentFilterRule {
        ContentFilterRule {
            label: label.to_string(),
            pattern: RulePattern::Literal { literal: literal.to_string() },
        }
    }

    #[test]
    fn literal_match_at_any_depth() {
        let filter = ContentFilter::new(vec![literal_rule("sql-injection", "DROP TABLE")]).unwrap();
        let args = serde_json::json!({"sql": "select 1; DROP TABLE x"});
        let err = filter.check(&args).unwrap_err();
        assert!(matches!(err, GatewayError::ContentPolicyViolation { rule_label } if rule_label == "sql-injection"));
    }

    #[test]
    fn nested_array_values_are_scanned() {
        let filter = ContentFilter::new(vec![literal_rule("secret", "api_key=")]).unwrap();
        let args = serde_json::json!({"lines": ["hello", "api_key=sk-123"]});
        assert!(filter.check(&args).is_err());
    }

    #[test]
    fn keys_are_not_scanned_only_values() {
        let filter = ContentFilter::new(vec![literal_rule("secret", "password")]).unwrap();
        let args = serde_json::json!({"password": "hunter2"});
        // "password" key is not scanned, but the value is, and doesn't match "password"
        assert!(filter.check(&args).is_ok());
    }

    #[test]
    fn no_match_passes() {
        let filter = ContentFilter::new(vec![literal_rule("x", "forbidden")]).unwrap();
        assert!(filter.check(&serde_json::json!({"a": "benign"})).is_ok());
    }

    #[test]
    fn regex_rule_matches() {
        let rule = ContentFilterRule {
            label: "ssn".to_string(),
            pattern: RulePattern::Regex { regex: r"\d{3}-\d{2}-\d{4}".to_string() },
        };
        let filter = ContentFilter::new(vec![rule]).unwrap();
        assert!(filter.check(&serde_json::json!({"note": "ssn is 123-45-6789"})).is_err());
    }
}
