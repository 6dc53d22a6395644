// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

impl RiskLevel {
    pub fn bump(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Med,
            RiskLevel::Med | RiskLevel::High => RiskLevel::High,
        }
    }
}

/// Capability/risk declaration for one `tool.action`, loaded at startup and
/// read-only thereafter. When present, overrides the heuristic risk scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub tool_action: String,
    pub risk_level: Option<RiskLevel>,
    pub requires_approval: bool,
    pub required_capabilities: Vec<String>,
    pub allowed_arg_keys: Vec<String>,
}

impl Manifest {
    pub fn new(tool_action: impl Into<String>) -> Self {
        Self {
            tool_action: tool_action.into(),
            risk_level: None,
            requires_approval: false,
            required_capabilities: Vec::new(),
            allowed_arg_keys: Vec::new(),
        }
    }
}
