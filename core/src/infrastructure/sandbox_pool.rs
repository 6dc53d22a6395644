// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pool of persistent sandbox worker subprocesses (§4.3). Grounded in the
//! teacher's `ToolServerManager::health_check_loop` (30 s-interval periodic
//! ping, continue-past-per-worker-failure) generalized to a checkout/return
//! pool instead of a fixed registry, since the gateway dispatches one call
//! at a time per worker rather than routing to named named servers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::errors::GatewayError;
use crate::infrastructure::metrics;
use crate::infrastructure::sandbox_worker::SandboxWorker;

/// Linear backoff cap on restart storms (§4.3 "capped at e.g. 30 s").
const MAX_BACKOFF_SECONDS: u64 = 30;
/// Consecutive-restart-within-window threshold before the pool declares
/// itself exhausted (§4.3 "Fatal: pool exhaustion after N consecutive
/// restarts within window").
const EXHAUSTION_THRESHOLD: u32 = 10;

pub struct SandboxPoolConfig {
    pub worker_path: PathBuf,
    pub pool_size: usize,
    pub call_timeout: Duration,
    pub max_payload_bytes: usize,
}

pub struct SandboxPool {
    config: SandboxPoolConfig,
    idle: Mutex<VecDeque<SandboxWorker>>,
    consecutive_restarts: AtomicU32,
    exhausted: std::sync::atomic::AtomicBool,
}

impl SandboxPool {
    pub fn new(config: SandboxPoolConfig) -> anyhow::Result<Arc<Self>> {
        let mut idle = VecDeque::with_capacity(config.pool_size);
        for _ in 0..config.pool_size.max(1) {
            idle.push_back(SandboxWorker::spawn(&config.worker_path)?);
        }
        Ok(Arc::new(Self {
            config,
            idle: Mutex::new(idle),
            consecutive_restarts: AtomicU32::new(0),
            exhausted: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    /// Check out a worker, run one call, return the worker (replacing it if
    /// the call left it unhealthy). Fails fast with `sandbox_unavailable`
    /// when no worker is free rather than queueing indefinitely (§5 backpressure).
    pub async fn call(&self, action: &str, params: Value) -> Result<Value, GatewayError> {
        if self.exhausted.load(Ordering::Relaxed) {
            return Err(GatewayError::SandboxUnavailable);
        }

        let mut worker = {
            let mut idle = self.idle.lock().await;
            idle.pop_front().ok_or(GatewayError::SandboxUnavailable)?
        };

        let result = worker
            .call(action, params, self.config.max_payload_bytes, self.config.call_timeout)
            .await;

        if worker.is_healthy() {
            self.consecutive_restarts.store(0, Ordering::Relaxed);
            self.idle.lock().await.push_back(worker);
        } else {
            self.replace_worker(worker).await;
        }

        result
    }

    async fn replace_worker(&self, mut dead: SandboxWorker) {
        dead.kill().await;
        let restarts = self.consecutive_restarts.fetch_add(1, Ordering::Relaxed) + 1;
        if restarts >= EXHAUSTION_THRESHOLD {
            tracing::error!("sandbox pool exhausted after {restarts} consecutive restarts");
            self.exhausted.store(true, Ordering::Relaxed);
            metrics::set_sandbox_pool_exhausted(true);
            return;
        }
        let backoff = Duration::from_secs((restarts as u64).min(MAX_BACKOFF_SECONDS));
        tokio::time::sleep(backoff).await;
        match SandboxWorker::spawn(&self.config.worker_path) {
            Ok(worker) => self.idle.lock().await.push_back(worker),
            Err(e) => tracing::error!("failed to respawn sandbox worker: {e}"),
        }
    }

    /// Background health-check loop: pings every currently-idle worker.
    /// Workers checked out mid-call are never pinged concurrently (the pool
    /// only ever gives exclusive access to one caller at a time).
    pub async fn health_check_loop(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            self.run_health_check().await;
        }
    }

    async fn run_health_check(&self) {
        let mut idle = self.idle.lock().await;
        let mut healthy_count = 0u64;
        let mut refreshed = VecDeque::with_capacity(idle.len());
        while let Some(mut worker) = idle.pop_front() {
            if worker.ping(Duration::from_secs(2)).await {
                healthy_count += 1;
                refreshed.push_back(worker);
            } else {
                tracing::warn!("sandbox worker failed health check, replacing");
                worker.kill().await;
                match SandboxWorker::spawn(&self.config.worker_path) {
                    Ok(new_worker) => {
                        healthy_count += 1;
                        refreshed.push_back(new_worker);
                    }
                    Err(e) => tracing::error!("failed to respawn sandbox worker: {e}"),
                }
            }
        }
        *idle = refreshed;
        metrics::set_sandbox_healthy_workers(healthy_count);
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }
}
