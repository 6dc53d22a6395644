// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface (§6): every endpoint composes application-layer services. No
//! policy decision is made here — the Supervisor's `GatewayError` is
//! translated to a response, never re-derived (§9 "the HTTP layer never
//! independently re-derives or re-reports a policy decision").

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::application::auth_service::AuthService;
use crate::application::consent_service::ConsentService;
use crate::application::content_filter::{ContentFilter, ContentFilterRule};
use crate::application::key_store::KeyStore;
use crate::application::memory_service::MemoryService;
use crate::application::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::application::schema_registry::SchemaRegistry;
use crate::application::scheduler::Scheduler;
use crate::application::supervisor::{self, Outcome, Supervisor};
use crate::application::webhook_dispatcher::WebhookDispatcher;
use crate::domain::audit::AuditRecord;
use crate::domain::errors::GatewayError;
use crate::domain::tool_call::{Actor, ToolCall};
use crate::domain::user::{Role, User};
use crate::domain::webhook::{Webhook, WebhookEventKind};
use crate::infrastructure::approval_bus::ApprovalBus;
use crate::infrastructure::audit_sink::AuditSink;
use crate::infrastructure::repositories::FileBackedStore;
use crate::infrastructure::sandbox_pool::SandboxPool;

pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub scheduler: Arc<Scheduler>,
    pub approval_bus: Arc<ApprovalBus>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub content_filter: Arc<ContentFilter>,
    pub content_filter_rules: Arc<FileBackedStore<String, ContentFilterRule>>,
    pub schema_registry: Arc<SchemaRegistry>,
    pub webhook_dispatcher: Arc<WebhookDispatcher>,
    pub webhooks: Arc<FileBackedStore<Uuid, Webhook>>,
    pub key_store: Arc<KeyStore>,
    pub memory_service: Arc<MemoryService>,
    pub consent_service: Arc<ConsentService>,
    pub audit_sink: Arc<AuditSink>,
    pub users: Arc<FileBackedStore<String, User>>,
    pub sandbox_pool: Arc<SandboxPool>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub allowed_capabilities: HashSet<String>,
    pub bootstrap_admin_username: String,
    pub tab_snapshot: Arc<RwLock<Option<Value>>>,
    pub tab_inject_queue: Arc<Mutex<VecDeque<Value>>>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/admin/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/revoke", post(revoke))
        .route("/admin/bootstrap-token", post(bootstrap_token))
        .route("/tools/call", post(tool_call))
        .route("/validate", post(validate))
        .route("/approvals", get(list_approvals))
        .route("/approvals/stream", get(stream_approvals))
        .route("/approvals/{id}/approve", post(approve))
        .route("/approvals/{id}/reject", post(reject))
        .route("/admin/schedule", get(list_schedule).post(create_schedule))
        .route("/admin/schedule/{id}", patch(patch_schedule).delete(delete_schedule))
        .route("/admin/schedule/{id}/trigger", post(trigger_schedule))
        .route("/admin/schedule/{id}/history", get(schedule_history))
        .route("/admin/rate-limits", get(get_rate_limits).put(put_rate_limits))
        .route("/admin/rate-limits/clients/{key}", delete(clear_rate_limit_client))
        .route("/admin/rate-limits/users/{name}", delete(clear_rate_limit_user))
        .route("/admin/content-filter/rules", get(list_filter_rules).post(add_filter_rule).delete(delete_filter_rule))
        .route("/admin/content-filter/reload", post(reload_filter_rules))
        .route("/admin/webhooks", get(list_webhooks).post(create_webhook).delete(delete_webhook))
        .route("/admin/webhooks/{id}/deliveries", get(webhook_deliveries))
        .route("/admin/users", get(list_users).post(create_user).delete(delete_user))
        .route("/admin/users/{name}/permissions", put(update_permissions))
        .route("/admin/users/{name}/password", post(change_password))
        .route("/admin/kill-switch", get(kill_switch_status).post(engage_kill_switch).delete(disengage_kill_switch))
        .route("/admin/providers/{provider}/key", get(provider_key_status).post(set_provider_key))
        .route("/admin/providers/{provider}/key/rotate", post(rotate_provider_key))
        .route("/admin/providers/{provider}/key/status", get(provider_key_status))
        .route("/admin/providers/expiring", get(expiring_provider_keys))
        .route("/agents/{id}/memory", get(list_memory).post(set_memory))
        .route("/agents/{id}/memory/{key}", delete(delete_memory))
        .route("/agents/{id}/memory/prune", post(prune_memory))
        .route("/admin/audit", get(list_audit))
        .route("/admin/audit/export.csv", get(export_audit_csv))
        .route("/tab/snapshot", put(put_tab_snapshot))
        .route("/tab/preview", post(post_tab_preview))
        .route("/tab/inject-queue", get(get_tab_inject_queue))
        .route("/consent/timeline", get(consent_timeline))
        .route("/consent/export/{actor}", get(consent_export).delete(consent_erase))
        .route("/admin/sandbox/status", get(sandbox_status))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error envelope (§7: stable `kind` tokens, implementer's choice of status)
// ---------------------------------------------------------------------------

struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            GatewayError::UnknownTool { .. } | GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::SchemaValidationFailed { .. } | GatewayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::ContentPolicyViolation { .. }
            | GatewayError::CapabilityDenied { .. }
            | GatewayError::ToolNotPermitted { .. }
            | GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Conflict { .. } | GatewayError::DuplicateRequest { .. } => StatusCode::CONFLICT,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::WorkerError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::SandboxUnavailable | GatewayError::ServiceUnavailable { .. } | GatewayError::ApprovalQueueFull => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Auth helpers
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Resolves the caller's `Actor`. Missing `Authorization` header ⇒ anonymous
/// (GLOSSARY "Actor"); a present but invalid/expired token ⇒ `Unauthorized`.
async fn resolve_actor(state: &AppState, headers: &HeaderMap) -> Result<Actor, GatewayError> {
    match bearer_token(headers) {
        None => Ok(Actor::anonymous()),
        Some(token) => {
            let user = state.auth.resolve_actor(token).await?;
            Ok(Actor { username: user.username, allowed_tools: user.allowed_tools })
        }
    }
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<User, GatewayError> {
    let token = bearer_token(headers).ok_or(GatewayError::Unauthorized)?;
    let user = state.auth.resolve_actor(token).await?;
    if user.is_admin() {
        Ok(user)
    } else {
        Err(GatewayError::Forbidden)
    }
}

fn client_scope(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("ip:{v}"))
        .unwrap_or_else(|| "ip:unknown".to_string())
}

fn check_rate_limit(state: &AppState, headers: &HeaderMap, actor: &Actor) -> Result<(), GatewayError> {
    let scope = client_scope(headers);
    if !state.rate_limiter.check(&scope) {
        crate::infrastructure::metrics::record_rate_limited(&scope);
        return Err(GatewayError::RateLimited { retry_after_seconds: state.rate_limiter.config().window_seconds });
    }
    if actor.username != "anonymous" {
        let user_scope = format!("user:{}", actor.username);
        if !state.rate_limiter.check(&user_scope) {
            crate::infrastructure::metrics::record_rate_limited(&user_scope);
            return Err(GatewayError::RateLimited { retry_after_seconds: state.rate_limiter.config().window_seconds });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Health / metrics
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<String> {
    require_admin(&state, &headers).await?;
    Ok(state.metrics_handle.render())
}

async fn sandbox_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({
        "idle_workers": state.sandbox_pool.idle_count().await,
        "exhausted": state.sandbox_pool.is_exhausted(),
    })))
}

// ---------------------------------------------------------------------------
// Auth endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<LoginRequest>) -> ApiResult<Json<Value>> {
    check_rate_limit(&state, &headers, &Actor::anonymous())?;
    let (access, refresh) = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(json!({"access": access, "refresh": refresh})))
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh: String,
}

async fn refresh(State(state): State<Arc<AppState>>, Json(req): Json<RefreshRequest>) -> ApiResult<Json<Value>> {
    let access = state.auth.refresh(&req.refresh).await?;
    Ok(Json(json!({"access": access})))
}

#[derive(Deserialize)]
struct RevokeRequest {
    token: String,
}

async fn revoke(State(state): State<Arc<AppState>>, Json(req): Json<RevokeRequest>) -> ApiResult<Json<Value>> {
    state.auth.revoke(&req.token).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct BootstrapTokenRequest {
    secret: String,
}

async fn bootstrap_token(State(state): State<Arc<AppState>>, Json(req): Json<BootstrapTokenRequest>) -> ApiResult<Json<Value>> {
    let access = state.auth.bootstrap_token(&req.secret, &state.bootstrap_admin_username).await?;
    Ok(Json(json!({"access": access})))
}

// ---------------------------------------------------------------------------
// Tool invocation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ToolCallRequest {
    request_id: Uuid,
    tool: String,
    action: String,
    #[serde(default)]
    args: Value,
}

async fn tool_call(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<ToolCallRequest>) -> ApiResult<Json<Value>> {
    let actor = resolve_actor(&state, &headers).await?;
    check_rate_limit(&state, &headers, &actor)?;

    let call = ToolCall::new(req.request_id, req.tool, req.action, req.args, actor);
    match state.supervisor.process(call).await {
        Ok(Outcome::Result(value)) => Ok(Json(json!({"result": value}))),
        Ok(Outcome::PendingApproval { approval_id }) => Ok(Json(json!({"pending_approval": true, "approval_id": approval_id}))),
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
struct ValidateRequest {
    tool: String,
    action: String,
    #[serde(default)]
    args: Value,
}

async fn validate(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<ValidateRequest>) -> ApiResult<Json<Value>> {
    let actor = resolve_actor(&state, &headers).await?;
    supervisor::validate_only(
        &state.content_filter,
        &state.schema_registry,
        &state.allowed_capabilities,
        &actor,
        &req.tool,
        &req.action,
        &req.args,
    )
    .await?;
    Ok(Json(json!({"valid": true})))
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

async fn list_approvals(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"approvals": state.approval_bus.list()})))
}

async fn stream_approvals(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>> {
    require_admin(&state, &headers).await?;
    let mut rx = state.approval_bus.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(Some(event)) => {
                    let name = event_name(&event);
                    if let Ok(data) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event(name).data(data));
                    }
                }
                Ok(None) => {
                    // Lagged: emit the terminal event then drop the subscription.
                    if let Ok(data) = serde_json::to_string(&crate::domain::approval::ApprovalEvent::SlowConsumer) {
                        yield Ok(Event::default().event("slow_consumer").data(data));
                    }
                    break;
                }
                Err(_) => break,
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn event_name(event: &crate::domain::approval::ApprovalEvent) -> &'static str {
    use crate::domain::approval::ApprovalEvent as E;
    match event {
        E::Created { .. } => "approval.created",
        E::Approved { .. } => "approval.approved",
        E::Rejected { .. } => "approval.rejected",
        E::TimedOut { .. } => "approval.timed_out",
        E::SlowConsumer => "slow_consumer",
    }
}

async fn approve(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<u64>) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    let (approval, was_pending) = state
        .approval_bus
        .approve(id, &admin.username)
        .map_err(GatewayError::from)?;
    if was_pending {
        let record = AuditRecord::new(admin.username.as_str(), "approval.approved", json!({"approval_id": id}));
        if let Err(e) = state.audit_sink.append(&record).await {
            tracing::error!("failed to write audit record for approval.approved: {e}");
        }
        state.webhook_dispatcher.dispatch(&crate::domain::approval::ApprovalEvent::Approved { id, resolver: admin.username.clone() });
        let supervisor = Arc::clone(&state.supervisor);
        let approval_for_resume = approval.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.resume_approved(&approval_for_resume).await {
                tracing::warn!("resumed approval {} failed: {e}", approval_for_resume.id);
            }
        });
    }
    Ok(Json(json!({"approval": approval})))
}

async fn reject(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<u64>) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    let (approval, was_pending) = state
        .approval_bus
        .reject(id, &admin.username)
        .map_err(GatewayError::from)?;
    if was_pending {
        let record = AuditRecord::new(admin.username.as_str(), "approval.rejected", json!({"approval_id": id}));
        if let Err(e) = state.audit_sink.append(&record).await {
            tracing::error!("failed to write audit record for approval.rejected: {e}");
        }
        state.webhook_dispatcher.dispatch(&crate::domain::approval::ApprovalEvent::Rejected { id, resolver: admin.username.clone() });
    }
    Ok(Json(json!({"approval": approval})))
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateScheduleRequest {
    name: String,
    tool: String,
    action: String,
    #[serde(default)]
    args: Value,
    interval_seconds: u64,
}

async fn create_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateScheduleRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let task = state
        .scheduler
        .create(req.name, req.tool, req.action, req.args, req.interval_seconds)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({"task": task})))
}

async fn list_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"tasks": state.scheduler.list().await})))
}

#[derive(Deserialize)]
struct PatchScheduleRequest {
    enabled: Option<bool>,
}

async fn patch_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>, Json(req): Json<PatchScheduleRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    if let Some(enabled) = req.enabled {
        let found = state
            .scheduler
            .set_enabled(id, enabled)
            .await
            .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
        if !found {
            return Err(GatewayError::NotFound { what: format!("scheduled task {id}") }.into());
        }
    }
    let task = state.scheduler.get(id).await.ok_or(GatewayError::NotFound { what: format!("scheduled task {id}") })?;
    Ok(Json(json!({"task": task})))
}

async fn delete_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .scheduler
        .delete(id)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}

async fn trigger_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let found = state
        .scheduler
        .trigger_now(id)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    if !found {
        return Err(GatewayError::NotFound { what: format!("scheduled task {id}") }.into());
    }
    Ok(Json(json!({"triggered": true})))
}

async fn schedule_history(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let history = state.scheduler.history(id).await.ok_or(GatewayError::NotFound { what: format!("scheduled task {id}") })?;
    Ok(Json(json!({"history": history})))
}

// ---------------------------------------------------------------------------
// Rate limits
// ---------------------------------------------------------------------------

async fn get_rate_limits(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let config = state.rate_limiter.config();
    Ok(Json(json!({"max_requests": config.max_requests, "window_seconds": config.window_seconds, "burst": config.burst})))
}

async fn put_rate_limits(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(config): Json<RateLimitConfig>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state.rate_limiter.reconfigure(config);
    Ok(Json(json!({})))
}

async fn clear_rate_limit_client(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(key): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state.rate_limiter.clear_client(&key);
    Ok(Json(json!({})))
}

async fn clear_rate_limit_user(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state.rate_limiter.clear_user(&name);
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// Content filter
// ---------------------------------------------------------------------------

async fn list_filter_rules(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"rules": state.content_filter_rules.list().await})))
}

async fn add_filter_rule(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(rule): Json<ContentFilterRule>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .content_filter_rules
        .insert(rule.label.clone(), rule)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    reload_filter_rules_inner(&state).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct DeleteFilterRuleRequest {
    label: String,
}

async fn delete_filter_rule(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<DeleteFilterRuleRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .content_filter_rules
        .remove(&req.label)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    reload_filter_rules_inner(&state).await?;
    Ok(Json(json!({})))
}

async fn reload_filter_rules(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    reload_filter_rules_inner(&state).await?;
    Ok(Json(json!({})))
}

async fn reload_filter_rules_inner(state: &AppState) -> Result<(), GatewayError> {
    let rules = state.content_filter_rules.list().await;
    state
        .content_filter
        .reload(rules)
        .map_err(|e| GatewayError::InvalidRequest { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateWebhookRequest {
    url: String,
    events: Vec<WebhookEventKind>,
    secret: Option<String>,
}

async fn create_webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateWebhookRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let hook = Webhook::new(req.url, req.events, req.secret);
    state
        .webhooks
        .insert(hook.id, hook.clone())
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({"webhook": hook})))
}

async fn list_webhooks(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"webhooks": state.webhooks.list().await})))
}

#[derive(Deserialize)]
struct DeleteWebhookRequest {
    id: Uuid,
}

async fn delete_webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<DeleteWebhookRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .webhooks
        .remove(&req.id)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}

async fn webhook_deliveries(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let hook = state.webhooks.get(&id).await.ok_or(GatewayError::NotFound { what: format!("webhook {id}") })?;
    Ok(Json(json!({"deliveries": hook.deliveries})))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    #[serde(default)]
    roles: Vec<Role>,
    #[serde(default)]
    allowed_tools: Vec<String>,
}

async fn create_user(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateUserRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    if state.users.get(&req.username).await.is_some() {
        return Err(GatewayError::Conflict { reason: format!("user {} already exists", req.username) }.into());
    }
    let placeholder = User {
        username: req.username.clone(),
        password_hash: String::new(),
        salt: String::new(),
        roles: req.roles,
        allowed_tools: req.allowed_tools,
    };
    state
        .users
        .insert(req.username.clone(), placeholder)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    state.auth.set_password(&req.username, &req.password).await?;
    let user = state.users.get(&req.username).await.ok_or(GatewayError::NotFound { what: format!("user {}", req.username) })?;
    Ok(Json(json!({"user": {"username": user.username, "roles": user.roles, "allowed_tools": user.allowed_tools}})))
}

async fn list_users(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let users: Vec<Value> = state
        .users
        .list()
        .await
        .into_iter()
        .map(|u| json!({"username": u.username, "roles": u.roles, "allowed_tools": u.allowed_tools}))
        .collect();
    Ok(Json(json!({"users": users})))
}

#[derive(Deserialize)]
struct DeleteUserRequest {
    username: String,
}

async fn delete_user(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<DeleteUserRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    if req.username == state.bootstrap_admin_username {
        return Err(GatewayError::Conflict { reason: "the built-in admin user cannot be deleted".to_string() }.into());
    }
    state
        .users
        .remove(&req.username)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct UpdatePermissionsRequest {
    #[serde(default)]
    roles: Option<Vec<Role>>,
    #[serde(default)]
    allowed_tools: Option<Vec<String>>,
}

async fn update_permissions(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(name): Path<String>, Json(req): Json<UpdatePermissionsRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let updated = state
        .users
        .mutate(&name, |u| match u {
            Some(u) => {
                if let Some(roles) = req.roles.clone() {
                    u.roles = roles;
                }
                if let Some(tools) = req.allowed_tools.clone() {
                    u.allowed_tools = tools;
                }
                true
            }
            None => false,
        })
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    if !updated {
        return Err(GatewayError::NotFound { what: format!("user {name}") }.into());
    }
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    password: String,
}

async fn change_password(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(name): Path<String>, Json(req): Json<ChangePasswordRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state.auth.set_password(&name, &req.password).await?;
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// Kill switch
// ---------------------------------------------------------------------------

async fn kill_switch_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!(state.supervisor.kill_switch_status().await)))
}

#[derive(Deserialize)]
struct EngageKillSwitchRequest {
    reason: String,
}

async fn engage_kill_switch(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<EngageKillSwitchRequest>) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    state.supervisor.engage_kill_switch(req.reason, &admin.username).await;
    Ok(Json(json!({})))
}

async fn disengage_kill_switch(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    state.supervisor.disengage_kill_switch(&admin.username).await;
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// Provider keys
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SetProviderKeyRequest {
    value: String,
    ttl_seconds: Option<i64>,
}

async fn set_provider_key(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(provider): Path<String>, Json(req): Json<SetProviderKeyRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .key_store
        .set(&provider, req.value, req.ttl_seconds.map(chrono::Duration::seconds))
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}

async fn rotate_provider_key(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(provider): Path<String>, Json(req): Json<SetProviderKeyRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .key_store
        .rotate(&provider, req.value, req.ttl_seconds.map(chrono::Duration::seconds))
        .await?;
    Ok(Json(json!({})))
}

async fn provider_key_status(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(provider): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let status = state.key_store.status(&provider).await.ok_or(GatewayError::NotFound { what: format!("provider key {provider}") })?;
    Ok(Json(json!({"status": status})))
}

#[derive(Deserialize)]
struct ExpiringQuery {
    #[serde(default = "default_expiring_within_seconds")]
    within_seconds: i64,
}

fn default_expiring_within_seconds() -> i64 {
    7 * 24 * 3600
}

async fn expiring_provider_keys(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(query): Query<ExpiringQuery>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let expiring = state.key_store.expiring(chrono::Duration::seconds(query.within_seconds)).await;
    Ok(Json(json!({"expiring": expiring})))
}

// ---------------------------------------------------------------------------
// Agent memory
// ---------------------------------------------------------------------------

async fn list_memory(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"entries": state.memory_service.list(&id).await})))
}

#[derive(Deserialize)]
struct SetMemoryRequest {
    key: String,
    value: Value,
    ttl_seconds: Option<i64>,
}

async fn set_memory(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>, Json(req): Json<SetMemoryRequest>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .memory_service
        .set(&id, &req.key, req.value, req.ttl_seconds)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}

async fn delete_memory(State(state): State<Arc<AppState>>, headers: HeaderMap, Path((id, key)): Path<(String, String)>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .memory_service
        .delete(&id, &key)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}

async fn prune_memory(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let removed = state
        .memory_service
        .prune(&id)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({"removed": removed})))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct AuditQuery {
    actor: Option<String>,
    action: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

fn filter_audit(records: Vec<crate::domain::audit::AuditRecord>, query: &AuditQuery) -> Vec<crate::domain::audit::AuditRecord> {
    records
        .into_iter()
        .filter(|r| query.actor.as_ref().map(|a| &r.actor == a).unwrap_or(true))
        .filter(|r| query.action.as_ref().map(|a| &r.event == a).unwrap_or(true))
        .filter(|r| query.since.map(|s| r.ts >= s).unwrap_or(true))
        .filter(|r| query.until.map(|u| r.ts <= u).unwrap_or(true))
        .collect()
}

async fn list_audit(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(query): Query<AuditQuery>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let records = state.audit_sink.read_all().map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({"records": filter_audit(records, &query)})))
}

async fn export_audit_csv(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(query): Query<AuditQuery>) -> ApiResult<String> {
    require_admin(&state, &headers).await?;
    let records = state.audit_sink.read_all().map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    let mut csv = String::from("ts,actor,event,details\n");
    for record in filter_audit(records, &query) {
        let details = serde_json::to_string(&record.details).unwrap_or_default().replace('"', "\"\"");
        csv.push_str(&format!("{},{},{},\"{}\"\n", record.ts.to_rfc3339(), record.actor, record.event, details));
    }
    Ok(csv)
}

// ---------------------------------------------------------------------------
// Browser-shell collaboration surface (§6 "Collaborators")
// ---------------------------------------------------------------------------

async fn put_tab_snapshot(State(state): State<Arc<AppState>>, Json(snapshot): Json<Value>) -> Json<Value> {
    *state.tab_snapshot.write().await = Some(snapshot);
    Json(json!({}))
}

async fn post_tab_preview(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.tab_snapshot.read().await.clone();
    Json(json!({"preview": snapshot}))
}

async fn get_tab_inject_queue(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut queue = state.tab_inject_queue.lock().await;
    let drained: Vec<Value> = queue.drain(..).collect();
    Json(json!({"inject": drained}))
}

// ---------------------------------------------------------------------------
// Consent
// ---------------------------------------------------------------------------

async fn consent_timeline(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"timeline": state.consent_service.timeline().await})))
}

async fn consent_export(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(actor): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({"records": state.consent_service.export(&actor).await})))
}

async fn consent_erase(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(actor): Path<String>) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    state
        .consent_service
        .erase(&actor)
        .await
        .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
    Ok(Json(json!({})))
}
