// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable, closed vocabulary of error kinds returned in `{error: {kind, ...}}` bodies.
///
/// Callers (LLM agents) depend on this set for deterministic retries; never add
/// a new variant without updating the HTTP mapping and this doc list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTool,
    SchemaValidationFailed,
    ContentPolicyViolation,
    CapabilityDenied,
    ToolNotPermitted,
    RateLimited,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PayloadTooLarge,
    Timeout,
    WorkerError,
    SandboxUnavailable,
    ServiceUnavailable,
    DuplicateRequest,
    ApprovalQueueFull,
    InvalidRequest,
}

/// One schema-keyword-derived validation failure at a JSON pointer.
///
/// `token` is drawn from a closed set (`ERR_REQUIRED`, `ERR_TYPE`, `ERR_ENUM`,
/// `ERR_PATTERN`, `ERR_ADDITIONAL`, `ERR_MAXLENGTH`, ...) so upstream models can
/// correct deterministically on the same input every time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub token: String,
    pub pointer: String,
    pub message: String,
}

/// The single error type produced anywhere in the pipeline and translated 1:1
/// into the HTTP error envelope. Every pipeline stage either succeeds or
/// returns one of these; nothing is swallowed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown tool {tool_action}")]
    UnknownTool { tool_action: String },

    #[error("schema validation failed for {tool_action}")]
    SchemaValidationFailed {
        tool_action: String,
        errors: Vec<ValidationError>,
    },

    #[error("content policy violation: {rule_label}")]
    ContentPolicyViolation { rule_label: String },

    #[error("capability denied: {reason}")]
    CapabilityDenied { reason: String },

    #[error("tool {tool} not permitted for this actor")]
    ToolNotPermitted { tool: String },

    #[error("rate limited")]
    RateLimited { retry_after_seconds: u64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("worker error: {message}")]
    WorkerError { message: String },

    #[error("sandbox unavailable")]
    SandboxUnavailable,

    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error("duplicate request {request_id}")]
    DuplicateRequest { request_id: String },

    #[error("approval queue full")]
    ApprovalQueueFull,

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnknownTool { .. } => ErrorKind::UnknownTool,
            GatewayError::SchemaValidationFailed { .. } => ErrorKind::SchemaValidationFailed,
            GatewayError::ContentPolicyViolation { .. } => ErrorKind::ContentPolicyViolation,
            GatewayError::CapabilityDenied { .. } => ErrorKind::CapabilityDenied,
            GatewayError::ToolNotPermitted { .. } => ErrorKind::ToolNotPermitted,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::Unauthorized => ErrorKind::Unauthorized,
            GatewayError::Forbidden => ErrorKind::Forbidden,
            GatewayError::NotFound { .. } => ErrorKind::NotFound,
            GatewayError::Conflict { .. } => ErrorKind::Conflict,
            GatewayError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::WorkerError { .. } => ErrorKind::WorkerError,
            GatewayError::SandboxUnavailable => ErrorKind::SandboxUnavailable,
            GatewayError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            GatewayError::DuplicateRequest { .. } => ErrorKind::DuplicateRequest,
            GatewayError::ApprovalQueueFull => ErrorKind::ApprovalQueueFull,
            GatewayError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
        }
    }

    /// Render into the wire shape `{error: {kind, token?, message, details?}}`.
    pub fn to_body(&self) -> Value {
        let mut details = serde_json::Map::new();
        if let GatewayError::SchemaValidationFailed { errors, .. } = self {
            details.insert(
                "validation_errors".to_string(),
                serde_json::to_value(errors).unwrap_or(Value::Null),
            );
        }
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
                "details": if details.is_empty() { Value::Null } else { Value::Object(details) },
            }
        })
    }
}
