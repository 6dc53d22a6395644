// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end coverage of the seed scenarios: a real `Router` driven with
//! `tower::ServiceExt::oneshot`, backed by a throwaway sandbox worker
//! subprocess (`tests/fixtures/echo_worker.py`) so the low-risk happy path
//! exercises the full nine-stage pipeline, not a mock.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use intelli_gateway_core::application::auth_service::AuthService;
use intelli_gateway_core::application::consent_service::ConsentService;
use intelli_gateway_core::application::content_filter::{ContentFilter, ContentFilterRule, RulePattern};
use intelli_gateway_core::application::key_store::KeyStore;
use intelli_gateway_core::application::memory_service::MemoryService;
use intelli_gateway_core::application::rate_limiter::{RateLimitConfig, RateLimiter};
use intelli_gateway_core::application::schema_registry::SchemaRegistry;
use intelli_gateway_core::application::scheduler::Scheduler;
use intelli_gateway_core::application::supervisor::Supervisor;
use intelli_gateway_core::application::webhook_dispatcher::WebhookDispatcher;
use intelli_gateway_core::domain::manifest::{Manifest, RiskLevel};
use intelli_gateway_core::infrastructure::approval_bus::ApprovalBus;
use intelli_gateway_core::infrastructure::audit_sink::AuditSink;
use intelli_gateway_core::infrastructure::repositories::FileBackedStore;
use intelli_gateway_core::infrastructure::sandbox_pool::{SandboxPool, SandboxPoolConfig};
use intelli_gateway_core::presentation::api::{self, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn worker_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/echo_worker.py")
}

/// Assembles a full `AppState` against a temp directory, with one registered
/// `echo.run` (low risk) and `shell.exec` (high risk, requires approval)
/// tool, and a bootstrap admin whose password is known to the test.
async fn test_state(approval_timeout_seconds: u64) -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let users = Arc::new(FileBackedStore::load(dir.path().join("users.json")).unwrap());
    let sessions = Arc::new(FileBackedStore::load(dir.path().join("sessions.json")).unwrap());
    let revoked = Arc::new(FileBackedStore::load(dir.path().join("revoked.json")).unwrap());
    let webhooks = Arc::new(FileBackedStore::load(dir.path().join("webhooks.json")).unwrap());
    let content_filter_rules: Arc<FileBackedStore<String, ContentFilterRule>> =
        Arc::new(FileBackedStore::load(dir.path().join("filter_rules.json")).unwrap());
    let provider_keys = Arc::new(FileBackedStore::load(dir.path().join("keys.json")).unwrap());
    let memory = Arc::new(FileBackedStore::load(dir.path().join("memory.json")).unwrap());
    let consent = Arc::new(FileBackedStore::load(dir.path().join("consent.json")).unwrap());
    let scheduled_tasks = Arc::new(FileBackedStore::load(dir.path().join("schedule.json")).unwrap());

    content_filter_rules
        .insert(
            "block-secret".to_string(),
            ContentFilterRule { label: "block-secret".to_string(), pattern: RulePattern::Literal { literal: "sk-live-".to_string() } },
        )
        .await
        .unwrap();

    let auth = Arc::new(AuthService::new(
        Arc::clone(&users),
        sessions,
        revoked,
        chrono::Duration::hours(1),
        chrono::Duration::days(7),
        None,
    ));
    auth.ensure_bootstrap_admin("admin", Some("test-password")).await.unwrap();

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig { max_requests: 1_000, window_seconds: 60, burst: 100 }));

    let initial_rules = content_filter_rules.list().await;
    let content_filter = Arc::new(ContentFilter::new(initial_rules).unwrap());

    let mut registry = SchemaRegistry::new();
    registry
        .register(
            "echo.run",
            &json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"], "additionalProperties": false}),
            Manifest::new("echo.run"),
        )
        .unwrap();
    let mut shell_manifest = Manifest::new("shell.exec");
    shell_manifest.risk_level = Some(RiskLevel::High);
    registry
        .register(
            "shell.exec",
            &json!({"type": "object", "properties": {"command": {"type": "string"}}, "required": ["command"], "additionalProperties": false}),
            shell_manifest,
        )
        .unwrap();
    let schema_registry = Arc::new(registry);

    let sandbox_pool = SandboxPool::new(SandboxPoolConfig {
        worker_path: worker_path(),
        pool_size: 2,
        call_timeout: Duration::from_secs(5),
        max_payload_bytes: 1024 * 1024,
    })
    .unwrap();

    let approval_bus = ApprovalBus::new(approval_timeout_seconds);
    let audit_sink = Arc::new(AuditSink::open(dir.path().join("audit.jsonl"), None).unwrap());
    let allowed_capabilities: HashSet<String> = HashSet::new();

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&content_filter),
        Arc::clone(&schema_registry),
        Vec::new(),
        Arc::clone(&sandbox_pool),
        Arc::clone(&approval_bus),
        Arc::clone(&audit_sink),
    ));

    let state = Arc::new(AppState {
        scheduler: Arc::new(Scheduler::new(scheduled_tasks, Arc::clone(&supervisor))),
        supervisor,
        approval_bus,
        auth,
        rate_limiter,
        content_filter,
        content_filter_rules,
        schema_registry,
        webhook_dispatcher: Arc::new(WebhookDispatcher::new(webhooks.clone(), 3)),
        webhooks,
        key_store: Arc::new(KeyStore::new(provider_keys)),
        memory_service: Arc::new(MemoryService::new(memory)),
        consent_service: Arc::new(ConsentService::new(consent)),
        audit_sink,
        users,
        sandbox_pool,
        metrics_handle: intelli_gateway_core::infrastructure::metrics::install().unwrap(),
        allowed_capabilities,
        bootstrap_admin_username: "admin".to_string(),
        tab_snapshot: Arc::new(tokio::sync::RwLock::new(None)),
        tab_inject_queue: Arc::new(tokio::sync::Mutex::new(VecDeque::new())),
    });

    (state, dir)
}

async fn admin_token(state: &Arc<AppState>) -> String {
    let (access, _refresh) = state.auth.login("admin", "test-password").await.unwrap();
    access
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri).header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

#[tokio::test]
async fn low_risk_happy_path_dispatches_through_the_sandbox() {
    let (state, _dir) = test_state(300).await;
    let app = api::app(state);

    let req = post("/tools/call", None, json!({"request_id": uuid::Uuid::new_v4(), "tool": "echo", "action": "run", "args": {"message": "hi"}}));
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["message"], "hi");
}

#[tokio::test]
async fn schema_failure_returns_bad_request_with_err_required() {
    let (state, _dir) = test_state(300).await;
    let app = api::app(state);

    let req = post("/tools/call", None, json!({"request_id": uuid::Uuid::new_v4(), "tool": "echo", "action": "run", "args": {}}));
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "schema_validation_failed");
}

#[tokio::test]
async fn content_policy_violation_is_rejected_before_dispatch() {
    let (state, _dir) = test_state(300).await;
    let app = api::app(state);

    let req = post(
        "/tools/call",
        None,
        json!({"request_id": uuid::Uuid::new_v4(), "tool": "echo", "action": "run", "args": {"message": "here is sk-live-abc123"}}),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn high_risk_call_queues_an_approval_and_admin_can_approve_it() {
    let (state, _dir) = test_state(300).await;
    let token = admin_token(&state).await;
    let app = api::app(state);

    let req = post("/tools/call", None, json!({"request_id": uuid::Uuid::new_v4(), "tool": "shell", "action": "exec", "args": {"command": "ls"}}));
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["pending_approval"], true);
    let approval_id = body["approval_id"].as_u64().unwrap();

    let approve_req = Request::builder()
        .method("POST")
        .uri(format!("/approvals/{approval_id}/approve"))
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(approve_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["approval"]["state"], "approved");
}

#[tokio::test]
async fn approval_reaper_times_out_stale_pending_entries() {
    let (state, _dir) = test_state(1).await;
    let app = api::app(state.clone());

    let req = post("/tools/call", None, json!({"request_id": uuid::Uuid::new_v4(), "tool": "shell", "action": "exec", "args": {"command": "ls"}}));
    let response = app.oneshot(req).await.unwrap();
    let body = body_json(response).await;
    let approval_id = body["approval_id"].as_u64().unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let timed_out = state.approval_bus.reap_expired();
    assert!(timed_out.iter().any(|a| a.id == approval_id));
}

#[tokio::test]
async fn kill_switch_blocks_every_call_until_disengaged() {
    let (state, _dir) = test_state(300).await;
    let token = admin_token(&state).await;
    let app = api::app(state);

    let engage_req = Request::builder()
        .method("POST")
        .uri("/admin/kill-switch")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({"reason": "incident"})).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(engage_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let call_req = post("/tools/call", None, json!({"request_id": uuid::Uuid::new_v4(), "tool": "echo", "action": "run", "args": {"message": "hi"}}));
    let response = app.oneshot(call_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
