// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sliding-window rate limiter (§4.5 "Rate limits"): per-IP and per-username
//! counters, live reconfigure, enforced on every mutating endpoint.
//!
//! Grounded in the teacher's lock-free counter style for metrics
//! (`infrastructure/metrics.rs`) generalized to a `DashMap<String, Window>`
//! keyed by scope (`ip:<addr>` / `user:<name>`), since the teacher itself has
//! no rate limiter to imitate directly.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
    pub burst: u32,
}

struct Window {
    /// Unix seconds marking the start of the current window.
    window_start: AtomicU64,
    count: AtomicU32,
}

/// A sliding window approximated as a fixed window that resets when
/// `window_seconds` elapses; `burst` is added on top of `max_requests` as
/// slack absorbed within a single window, matching the teacher's preference
/// for simple, auditable counters over a weighted sliding log.
pub struct RateLimiter {
    config: parking_lot::RwLock<RateLimitConfig>,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: parking_lot::RwLock::new(config),
            windows: DashMap::new(),
        }
    }

    pub fn reconfigure(&self, config: RateLimitConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> RateLimitConfig {
        *self.config.read()
    }

    /// `max_requests == 0` rejects everything (§8 boundary behavior); a very
    /// large `window_seconds` degenerates to a plain lifetime counter.
    pub fn check(&self, scope: &str) -> bool {
        let config = self.config();
        if config.max_requests == 0 {
            return false;
        }
        let now = now_unix();
        let limit = config.max_requests + config.burst;

        let entry = self.windows.entry(scope.to_string()).or_insert_with(|| Window {
            window_start: AtomicU64::new(now),
            count: AtomicU32::new(0),
        });

        let window_start = entry.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window_start) >= config.window_seconds {
            entry.window_start.store(now, Ordering::Relaxed);
            entry.count.store(1, Ordering::Relaxed);
            return true;
        }

        let prior = entry.count.fetch_add(1, Ordering::Relaxed);
        prior < limit
    }

    pub fn clear_client(&self, ip: &str) {
        self.windows.remove(&format!("ip:{ip}"));
    }

    pub fn clear_user(&self, username: &str) {
        self.windows.remove(&format!("user:{username}"));
    }
}

fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: u32, window: u64, burst: u32) -> RateLimitConfig {
        RateLimitConfig { max_requests: max, window_seconds: window, burst }
    }

    #[test]
    fn zero_max_requests_rejects_all() {
        let limiter = RateLimiter::new(config(0, 60, 0));
        assert!(!limiter.check("ip:1.2.3.4"));
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(config(3, 3600, 0));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(!limiter.check("ip:1.2.3.4"));
    }

    #[test]
    fn burst_adds_slack_on_top_of_max() {
        let limiter = RateLimiter::new(config(1, 3600, 2));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(!limiter.check("ip:1.2.3.4"));
    }

    #[test]
    fn scopes_are_independent() {
        let limiter = RateLimiter::new(config(1, 3600, 0));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(limiter.check("user:alice"));
    }

    #[test]
    fn reconfigure_takes_effect_immediately() {
        let limiter = RateLimiter::new(config(1, 3600, 0));
        assert!(limiter.check("ip:1.2.3.4"));
        assert!(!limiter.check("ip:1.2.3.4"));
        limiter.reconfigure(config(10, 3600, 0));
        assert!(limiter.check("ip:1.2.3.4"));
    }
}
