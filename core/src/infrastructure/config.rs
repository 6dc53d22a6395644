// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Environment-driven configuration, mirroring the daemon's own
//! `NodeConfigManifest::load_or_default` bootstrap convention: one function
//! reads the process environment once at startup and produces a validated,
//! typed struct. Nothing else in this crate reads `std::env::var` directly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    /// Root directory for all file-backed registries (users, webhooks,
    /// schedule, memory, content-filter rules, provider-key metadata).
    pub data_dir: PathBuf,
    pub audit_log_path: PathBuf,
    /// Base64-encoded 256-bit key; when set, audit lines are AES-GCM sealed at rest.
    pub audit_encryption_key: Option<String>,

    pub bootstrap_admin_username: String,
    pub bootstrap_admin_password: Option<String>,
    /// One-time secret (environment-supplied) that mints the first admin
    /// token without knowing the password (§4.5 "bootstrap secret").
    pub bootstrap_secret: Option<String>,

    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,

    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_burst: u32,

    pub approval_timeout_seconds: u64,

    pub content_filter_rules_path: PathBuf,
    pub manifests_dir: PathBuf,

    pub sandbox_worker_path: PathBuf,
    pub sandbox_pool_size: usize,
    pub sandbox_call_timeout_seconds: u64,
    pub sandbox_max_payload_bytes: usize,

    pub docker_image: Option<String>,
    pub docker_seccomp_profile: Option<PathBuf>,

    pub allowed_capabilities: Vec<String>,

    pub webhook_max_retries: u32,

    pub provider_key_vault_address: Option<String>,
    pub provider_key_vault_token: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_or("GATEWAY_DATA_DIR", "./data"));
        Self {
            host: env_or("GATEWAY_HOST", "127.0.0.1"),
            port: env_parse("GATEWAY_PORT", 8787u16),

            audit_log_path: PathBuf::from(env_or(
                "GATEWAY_AUDIT_LOG_PATH",
                data_dir.join("audit.jsonl").to_string_lossy().as_ref(),
            )),
            audit_encryption_key: std::env::var("GATEWAY_AUDIT_ENCRYPTION_KEY").ok(),

            bootstrap_admin_username: env_or("GATEWAY_ADMIN_USERNAME", "admin"),
            bootstrap_admin_password: std::env::var("GATEWAY_ADMIN_PASSWORD").ok(),
            bootstrap_secret: std::env::var("GATEWAY_BOOTSTRAP_SECRET").ok(),

            access_token_ttl_seconds: env_parse("GATEWAY_ACCESS_TTL_SECONDS", 3600i64),
            refresh_token_ttl_seconds: env_parse("GATEWAY_REFRESH_TTL_SECONDS", 7 * 24 * 3600i64),

            rate_limit_max_requests: env_parse("GATEWAY_RATE_LIMIT_MAX_REQUESTS", 60u32),
            rate_limit_window_seconds: env_parse("GATEWAY_RATE_LIMIT_WINDOW_SECONDS", 60u64),
            rate_limit_burst: env_parse("GATEWAY_RATE_LIMIT_BURST", 10u32),

            approval_timeout_seconds: env_parse("GATEWAY_APPROVAL_TIMEOUT_SECONDS", 300u64),

            content_filter_rules_path: PathBuf::from(env_or(
                "GATEWAY_CONTENT_FILTER_RULES_PATH",
                data_dir.join("content_filter_rules.json").to_string_lossy().as_ref(),
            )),
            manifests_dir: PathBuf::from(env_or(
                "GATEWAY_MANIFESTS_DIR",
                data_dir.join("manifests").to_string_lossy().as_ref(),
            )),

            sandbox_worker_path: PathBuf::from(env_or(
                "GATEWAY_SANDBOX_WORKER_PATH",
                "./sandbox-worker",
            )),
            sandbox_pool_size: env_parse("GATEWAY_SANDBOX_POOL_SIZE", 4usize),
            sandbox_call_timeout_seconds: env_parse("GATEWAY_SANDBOX_CALL_TIMEOUT_SECONDS", 5u64),
            sandbox_max_payload_bytes: env_parse("GATEWAY_SANDBOX_MAX_PAYLOAD_BYTES", 256 * 1024usize),

            docker_image: std::env::var("GATEWAY_DOCKER_IMAGE").ok(),
            docker_seccomp_profile: std::env::var("GATEWAY_DOCKER_SECCOMP_PROFILE")
                .ok()
                .map(PathBuf::from),

            allowed_capabilities: std::env::var("GATEWAY_ALLOWED_CAPABILITIES")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),

            webhook_max_retries: env_parse("GATEWAY_WEBHOOK_MAX_RETRIES", 3u32),

            provider_key_vault_address: std::env::var("GATEWAY_VAULT_ADDRESS").ok(),
            provider_key_vault_token: std::env::var("GATEWAY_VAULT_TOKEN").ok(),

            data_dir,
        }
    }
}
