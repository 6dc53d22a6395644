// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Wires a `GatewayConfig` into a fully constructed `AppState`, and spawns
//! the background loops (scheduler tick, approval reaper, sandbox health
//! check) that run alongside the HTTP server.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use intelli_gateway_core::application::auth_service::AuthService;
use intelli_gateway_core::application::consent_service::ConsentService;
use intelli_gateway_core::application::content_filter::{ContentFilter, ContentFilterRule};
use intelli_gateway_core::application::key_store::KeyStore;
use intelli_gateway_core::application::memory_service::MemoryService;
use intelli_gateway_core::application::rate_limiter::{RateLimitConfig, RateLimiter};
use intelli_gateway_core::application::schema_registry;
use intelli_gateway_core::application::scheduler::Scheduler;
use intelli_gateway_core::application::supervisor::Supervisor;
use intelli_gateway_core::application::webhook_dispatcher::WebhookDispatcher;
use intelli_gateway_core::domain::consent::ConsentRecord;
use intelli_gateway_core::domain::memory::MemoryEntry;
use intelli_gateway_core::domain::provider_key::ProviderKey;
use intelli_gateway_core::domain::scheduled_task::ScheduledTask;
use intelli_gateway_core::domain::session::Session;
use intelli_gateway_core::domain::user::User;
use intelli_gateway_core::domain::webhook::Webhook;
use intelli_gateway_core::infrastructure::approval_bus::ApprovalBus;
use intelli_gateway_core::infrastructure::audit_sink::AuditSink;
use intelli_gateway_core::infrastructure::config::GatewayConfig;
use intelli_gateway_core::infrastructure::metrics;
use intelli_gateway_core::infrastructure::repositories::FileBackedStore;
use intelli_gateway_core::infrastructure::sandbox_pool::{SandboxPool, SandboxPoolConfig};
use intelli_gateway_core::presentation::api::AppState;

/// Build every application/infrastructure service and assemble the shared
/// `AppState`. Fallible: a malformed manifest, an unreadable store file, or a
/// sandbox worker that fails to spawn all abort startup rather than serving
/// traffic against a half-initialized gateway.
pub async fn build_state(config: &GatewayConfig) -> anyhow::Result<Arc<AppState>> {
    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;

    let users: Arc<FileBackedStore<String, User>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("users.json")).context("loading users store")?);
    let sessions: Arc<FileBackedStore<String, Session>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("sessions.json")).context("loading sessions store")?);
    let revoked: Arc<FileBackedStore<String, chrono::DateTime<chrono::Utc>>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("revoked_tokens.json")).context("loading revoked-tokens store")?);
    let webhooks: Arc<FileBackedStore<uuid::Uuid, Webhook>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("webhooks.json")).context("loading webhooks store")?);
    let content_filter_rules: Arc<FileBackedStore<String, ContentFilterRule>> =
        Arc::new(FileBackedStore::load(&config.content_filter_rules_path).context("loading content-filter rules")?);
    let provider_keys: Arc<FileBackedStore<String, ProviderKey>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("provider_keys.json")).context("loading provider-key metadata")?);
    let memory: Arc<FileBackedStore<String, std::collections::HashMap<String, MemoryEntry>>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("agent_memory.json")).context("loading agent memory store")?);
    let consent: Arc<FileBackedStore<String, Vec<ConsentRecord>>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("consent.json")).context("loading consent log")?);
    let scheduled_tasks: Arc<FileBackedStore<uuid::Uuid, ScheduledTask>> =
        Arc::new(FileBackedStore::load(config.data_dir.join("schedule.json")).context("loading scheduled tasks")?);

    let auth = Arc::new(AuthService::new(
        Arc::clone(&users),
        sessions,
        revoked,
        chrono::Duration::seconds(config.access_token_ttl_seconds),
        chrono::Duration::seconds(config.refresh_token_ttl_seconds),
        config.bootstrap_secret.clone(),
    ));
    auth.ensure_bootstrap_admin(&config.bootstrap_admin_username, config.bootstrap_admin_password.as_deref())
        .await
        .context("creating bootstrap admin")?;

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window_seconds: config.rate_limit_window_seconds,
        burst: config.rate_limit_burst,
    }));

    let initial_rules = content_filter_rules.list().await;
    let content_filter = Arc::new(ContentFilter::new(initial_rules).context("compiling content-filter rules")?);

    let schema_registry = Arc::new(schema_registry::load_dir(&config.manifests_dir).context("loading tool manifests")?);
    tracing::info!(manifests_dir = %config.manifests_dir.display(), "loaded tool manifests");

    let sandbox_pool = SandboxPool::new(SandboxPoolConfig {
        worker_path: config.sandbox_worker_path.clone(),
        pool_size: config.sandbox_pool_size,
        call_timeout: Duration::from_secs(config.sandbox_call_timeout_seconds),
        max_payload_bytes: config.sandbox_max_payload_bytes,
    })
    .context("spawning sandbox worker pool")?;

    let approval_bus = ApprovalBus::new(config.approval_timeout_seconds);

    let audit_sink = Arc::new(
        AuditSink::open(config.audit_log_path.clone(), config.audit_encryption_key.as_deref()).context("opening audit log")?,
    );

    let allowed_capabilities: HashSet<String> = config.allowed_capabilities.iter().cloned().collect();

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&content_filter),
        Arc::clone(&schema_registry),
        config.allowed_capabilities.clone(),
        Arc::clone(&sandbox_pool),
        Arc::clone(&approval_bus),
        Arc::clone(&audit_sink),
    ));

    let scheduler = Arc::new(Scheduler::new(scheduled_tasks, Arc::clone(&supervisor)));
    let webhook_dispatcher = Arc::new(WebhookDispatcher::new(Arc::clone(&webhooks), config.webhook_max_retries));
    let key_store = Arc::new(KeyStore::new(provider_keys));
    let memory_service = Arc::new(MemoryService::new(memory));
    let consent_service = Arc::new(ConsentService::new(consent));
    let metrics_handle = metrics::install().context("installing metrics recorder")?;

    Ok(Arc::new(AppState {
        supervisor,
        scheduler,
        approval_bus,
        auth,
        rate_limiter,
        content_filter,
        content_filter_rules,
        schema_registry,
        webhook_dispatcher,
        webhooks,
        key_store,
        memory_service,
        consent_service,
        audit_sink,
        users,
        sandbox_pool,
        metrics_handle,
        allowed_capabilities,
        bootstrap_admin_username: config.bootstrap_admin_username.clone(),
        tab_snapshot: Arc::new(tokio::sync::RwLock::new(None)),
        tab_inject_queue: Arc::new(tokio::sync::Mutex::new(VecDeque::new())),
    }))
}

/// Spawns the scheduler tick loop, the approval-bus reaper, and the sandbox
/// health-check loop as background tasks. All three hold the same
/// `CancellationToken` and exit cleanly when it's cancelled at shutdown
/// (§2a "Background loops ... hold a CancellationToken and exit cleanly").
pub fn spawn_background_tasks(state: &Arc<AppState>, cancel: tokio_util::sync::CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(3);

    let scheduler = Arc::clone(&state.scheduler);
    let scheduler_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        scheduler.run(scheduler_cancel).await;
    }));

    let sandbox_pool = Arc::clone(&state.sandbox_pool);
    let health_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        tokio::select! {
            _ = sandbox_pool.health_check_loop(Duration::from_secs(30)) => {},
            _ = health_cancel.cancelled() => {},
        }
    }));

    let approval_bus = Arc::clone(&state.approval_bus);
    let webhook_dispatcher = Arc::clone(&state.webhook_dispatcher);
    let audit_sink = Arc::clone(&state.audit_sink);
    handles.push(tokio::spawn(async move {
        // §4.2 "single worker wakes every second".
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let timed_out = approval_bus.reap_expired();
                    if !timed_out.is_empty() {
                        tracing::info!(count = timed_out.len(), "reaped expired approvals");
                    }
                    // Reaper actions take the same path as an explicit reject:
                    // webhook fan-out and an audit record per resolved approval.
                    for approval in &timed_out {
                        webhook_dispatcher.dispatch(&intelli_gateway_core::domain::approval::ApprovalEvent::TimedOut { id: approval.id });
                        let record = intelli_gateway_core::domain::audit::AuditRecord::new(
                            "system",
                            "approval.timed_out",
                            serde_json::json!({"approval_id": approval.id}),
                        );
                        if let Err(e) = audit_sink.append(&record).await {
                            tracing::error!("failed to write audit record for approval.timed_out: {e}");
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }));

    handles
}
