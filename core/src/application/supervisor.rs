// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! §4.1 Supervisor: the nine-stage pipeline from raw `ToolCall` to result,
//! validation error, pending-approval ticket, or policy denial.
//!
//! Grounded in the teacher's orchestration-layer composition style (a single
//! struct holding references to every leaf service, methods named after
//! pipeline stages) generalized from agent-workflow orchestration to this
//! gateway's fixed nine-stage pipeline. The idempotency LRU is new (the
//! teacher has no request-dedup layer to imitate); `lru` is already on the
//! workspace dependency list.

use std::collections::HashSet;
use std::sync::Arc;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::application::content_filter::ContentFilter;
use crate::application::risk;
use crate::application::schema_registry::SchemaRegistry;
use crate::domain::approval::{Approval, ApprovalId};
use crate::domain::audit::{fingerprint, AuditRecord};
use crate::domain::errors::GatewayError;
use crate::domain::kill_switch::KillSwitch;
use crate::domain::manifest::RiskLevel;
use crate::domain::tool_call::{Actor, ToolCall};
use crate::infrastructure::approval_bus::ApprovalBus;
use crate::infrastructure::audit_sink::AuditSink;
use crate::infrastructure::metrics;
use crate::infrastructure::sandbox_pool::SandboxPool;

/// §4.1 "size the map as an LRU of ≥ last 10 000 completions".
const IDEMPOTENCY_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
pub enum Outcome {
    Result(Value),
    PendingApproval { approval_id: ApprovalId },
}

type CachedOutcome = Result<Outcome, GatewayError>;

/// An in-flight marker occupies the slot for the duration of `process_uncached`
/// so a second concurrent call with the same `request_id` is rejected instead
/// of re-running the pipeline (§4.1 "idempotently").
#[derive(Clone)]
enum IdempotencyEntry {
    InFlight,
    Done(CachedOutcome),
}

pub struct Supervisor {
    kill_switch: RwLock<KillSwitch>,
    content_filter: Arc<ContentFilter>,
    schema_registry: Arc<SchemaRegistry>,
    allowed_capabilities: HashSet<String>,
    sandbox_pool: Arc<SandboxPool>,
    approval_bus: Arc<ApprovalBus>,
    audit_sink: Arc<AuditSink>,
    idempotency: Mutex<LruCache<Uuid, IdempotencyEntry>>,
}

impl Supervisor {
    pub fn new(
        content_filter: Arc<ContentFilter>,
        schema_registry: Arc<SchemaRegistry>,
        allowed_capabilities: Vec<String>,
        sandbox_pool: Arc<SandboxPool>,
        approval_bus: Arc<ApprovalBus>,
        audit_sink: Arc<AuditSink>,
    ) -> Self {
        Self {
            kill_switch: RwLock::new(KillSwitch::default()),
            content_filter,
            schema_registry,
            allowed_capabilities: allowed_capabilities.into_iter().collect(),
            sandbox_pool,
            approval_bus,
            audit_sink,
            idempotency: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(IDEMPOTENCY_CACHE_SIZE).unwrap())),
        }
    }

    pub async fn kill_switch_status(&self) -> KillSwitch {
        self.kill_switch.read().await.clone()
    }

    pub async fn engage_kill_switch(&self, reason: String, actor: &str) {
        self.kill_switch.write().await.engage(reason.clone());
        self.audit("kill_switch.engaged", actor, serde_json::json!({"reason": reason})).await;
    }

    pub async fn disengage_kill_switch(&self, actor: &str) {
        self.kill_switch.write().await.disengage();
        self.audit("kill_switch.disengaged", actor, serde_json::json!({})).await;
    }

    /// §4.1: the full nine-stage pipeline. Idempotent on `call.request_id`
    /// while the outcome remains in the LRU; a second call racing the first
    /// with the same `request_id` is rejected with `DuplicateRequest` rather
    /// than re-running the pipeline.
    pub async fn process(&self, call: ToolCall) -> Result<Outcome, GatewayError> {
        {
            let mut cache = self.idempotency.lock().await;
            match cache.get(&call.request_id) {
                Some(IdempotencyEntry::Done(outcome)) => return outcome.clone(),
                Some(IdempotencyEntry::InFlight) => {
                    return Err(GatewayError::DuplicateRequest { request_id: call.request_id.to_string() });
                }
                None => {
                    cache.put(call.request_id, IdempotencyEntry::InFlight);
                }
            }
        }

        let outcome = self.process_uncached(&call).await;
        self.idempotency.lock().await.put(call.request_id, IdempotencyEntry::Done(outcome.clone()));
        outcome
    }

    async fn process_uncached(&self, call: &ToolCall) -> Result<Outcome, GatewayError> {
        // Stage 1: kill-switch gate.
        let switch = self.kill_switch.read().await.clone();
        if switch.active {
            return Err(GatewayError::ServiceUnavailable {
                reason: switch.reason.unwrap_or_else(|| "kill switch engaged".to_string()),
            });
        }

        // Stage 2: per-user tool-scope gate.
        if !call.actor.may_call_tool(&call.tool) {
            let err = GatewayError::ToolNotPermitted { tool: call.tool.clone() };
            self.audit_denial(call, &err).await;
            return Err(err);
        }

        // Stage 3: content filter.
        if let Err(err) = self.content_filter.check(&call.args) {
            self.audit_denial(call, &err).await;
            return Err(err);
        }

        // Stage 4: schema validation.
        let tool_action = call.tool_action();
        if let Err(err) = self.schema_registry.validate(&tool_action, &call.args) {
            metrics::record_validation_error(&call.tool);
            self.audit_denial(call, &err).await;
            return Err(err);
        }

        // Stage 5: capability / manifest gate.
        let manifest = self.schema_registry.manifest(&tool_action).cloned();
        if let Some(manifest) = &manifest {
            let missing: Vec<&String> = manifest
                .required_capabilities
                .iter()
                .filter(|c| !self.allowed_capabilities.contains(c.as_str()))
                .collect();
            if !missing.is_empty() {
                let err = GatewayError::CapabilityDenied {
                    reason: format!("missing capabilities: {}", missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")),
                };
                self.audit_denial(call, &err).await;
                return Err(err);
            }
            if !manifest.allowed_arg_keys.is_empty() {
                if let Some(obj) = call.args.as_object() {
                    if let Some(bad_key) = obj.keys().find(|k| !manifest.allowed_arg_keys.contains(k)) {
                        let err = GatewayError::CapabilityDenied {
                            reason: format!("arg key not permitted: {bad_key}"),
                        };
                        self.audit_denial(call, &err).await;
                        return Err(err);
                    }
                }
            }
        }

        // Stage 6: risk scoring (manifest-declared level overrides heuristic).
        let risk = manifest
            .as_ref()
            .and_then(|m| m.risk_level)
            .unwrap_or_else(|| risk::score(call));
        let requires_approval = manifest.as_ref().map(|m| m.requires_approval).unwrap_or(false);

        // Stage 7: approval routing.
        if risk == RiskLevel::High || requires_approval {
            let approval = self.approval_bus.create(call.clone(), risk)?;
            self.audit(
                "approval.created",
                &call.actor.username,
                serde_json::json!({"approval_id": approval.id, "tool": call.tool, "risk": risk}),
            )
            .await;
            return Ok(Outcome::PendingApproval { approval_id: approval.id });
        }

        self.dispatch(call).await
    }

    /// Stage 8 re-entry for an approved call, using the originally validated
    /// and filtered args (§4.1 "Resumption after approval"). Never re-runs
    /// stages 1-7.
    pub async fn resume_approved(&self, approval: &Approval) -> Result<Outcome, GatewayError> {
        let outcome = self.dispatch(&approval.call).await;
        self.idempotency.lock().await.put(approval.call.request_id, outcome.clone());
        outcome
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<Outcome, GatewayError> {
        metrics::record_tool_call(&call.tool);
        let start = std::time::Instant::now();
        let result = self.sandbox_pool.call(&call.action, call.args.clone()).await;
        metrics::record_tool_call_duration(&call.tool, start.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                self.audit(
                    "tool_call",
                    &call.actor.username,
                    serde_json::json!({
                        "tool": call.tool,
                        "action": call.action,
                        "fingerprint": fingerprint(&call.args),
                        "size": call.payload_size(),
                        "ok": true,
                    }),
                )
                .await;
                Ok(Outcome::Result(value))
            }
            Err(err) => {
                self.audit(
                    "tool_call",
                    &call.actor.username,
                    serde_json::json!({
                        "tool": call.tool,
                        "action": call.action,
                        "fingerprint": fingerprint(&call.args),
                        "size": call.payload_size(),
                        "ok": false,
                        "kind": err.kind(),
                    }),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn audit_denial(&self, call: &ToolCall, err: &GatewayError) {
        self.audit(
            "tool_call.denied",
            &call.actor.username,
            serde_json::json!({"tool": call.tool, "action": call.action, "kind": err.kind()}),
        )
        .await;
    }

    async fn audit(&self, event: &str, actor: &str, details: Value) {
        let record = AuditRecord::new(actor, event, details);
        if let Err(e) = self.audit_sink.append(&record).await {
            tracing::error!("failed to write audit record for {event}: {e}");
        }
    }
}

/// Validation-only path for `POST /validate` (§6): runs stages up to and
/// including stage 5 without ever reaching the sandbox.
pub async fn validate_only(
    content_filter: &ContentFilter,
    schema_registry: &SchemaRegistry,
    allowed_capabilities: &HashSet<String>,
    actor: &Actor,
    tool: &str,
    action: &str,
    args: &Value,
) -> Result<(), GatewayError> {
    if !actor.may_call_tool(tool) {
        return Err(GatewayError::ToolNotPermitted { tool: tool.to_string() });
    }
    content_filter.check(args)?;
    let tool_action = format!("{tool}.{action}");
    schema_registry.validate(&tool_action, args)?;
    if let Some(manifest) = schema_registry.manifest(&tool_action) {
        let missing: Vec<&String> = manifest
            .required_capabilities
            .iter()
            .filter(|c| !allowed_capabilities.contains(c.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(GatewayError::CapabilityDenied {
                reason: format!("missing capabilities: {}", missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::Manifest;

    // A supervisor wired to a sandbox pool is exercised via integration tests
    // under core/tests/ (needs a real worker binary); these unit tests cover
    // the stages reachable without dispatch.

    #[tokio::test]
    async fn unknown_tool_short_circuits_before_dispatch() {
        let schema_registry = Arc::new(SchemaRegistry::new());
        let content_filter = Arc::new(ContentFilter::empty());
        let actor = Actor::anonymous();
        let err = validate_only(
            &content_filter,
            &schema_registry,
            &HashSet::new(),
            &actor,
            "file",
            "read",
            &serde_json::json!({}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn capability_gate_denies_missing_capability() {
        let mut registry = SchemaRegistry::new();
        let mut manifest = Manifest::new("file.read");
        manifest.required_capabilities = vec!["fs.read".to_string()];
        registry
            .register("file.read", &serde_json::json!({"type": "object"}), manifest)
            .unwrap();
        let registry = Arc::new(registry);
        let content_filter = Arc::new(ContentFilter::empty());
        let actor = Actor::anonymous();
        let err = validate_only(
            &content_filter,
            &registry,
            &HashSet::new(),
            &actor,
            "file",
            "read",
            &serde_json::json!({}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::CapabilityDenied { .. }));
    }
}
