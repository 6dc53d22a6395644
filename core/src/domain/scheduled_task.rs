// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Bound on the per-task run-history ring (§3 TaskRunRecord, §4.4 "History bound").
pub const MAX_RUN_HISTORY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    pub tool: String,
    pub action: String,
    pub args: Value,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub run_count: u64,
    pub error_count: u64,
    #[serde(default)]
    pub history: VecDeque<TaskRunRecord>,
}

impl ScheduledTask {
    pub fn new(name: String, tool: String, action: String, args: Value, interval_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            tool,
            action,
            args,
            interval_seconds,
            enabled: true,
            last_run_at: None,
            next_run_at: now,
            run_count: 0,
            error_count: 0,
            history: VecDeque::new(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }

    /// §4.4 "trigger-now": pulls `next_run_at` to now; next tick picks it up.
    /// This is the only operation allowed to *decrease* `next_run_at`.
    pub fn trigger_now(&mut self) {
        self.next_run_at = Utc::now();
    }

    /// Called at pipeline *acceptance*, not completion (§4.4 "Crash safety").
    /// Advances `next_run_at` strictly forward so a crash mid-run never
    /// duplicates the task; actual duplicate protection is the Supervisor's
    /// request-UUID idempotence.
    pub fn mark_accepted(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.next_run_at = now + chrono::Duration::seconds(self.interval_seconds as i64);
    }

    pub fn record_run(&mut self, record: TaskRunRecord) {
        self.run_count += 1;
        if !record.ok {
            self.error_count += 1;
        }
        self.history.push_back(record);
        while self.history.len() > MAX_RUN_HISTORY {
            self.history.pop_front();
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.history.back().map(|r| r.seq + 1).unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub seq: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_ring_is_bounded() {
        let mut task = ScheduledTask::new(
            "t".into(),
            "noop".into(),
            "ping".into(),
            serde_json::json!({}),
            60,
        );
        for i in 0..(MAX_RUN_HISTORY + 10) {
            task.record_run(TaskRunRecord {
                seq: i as u64,
                started_at: Utc::now(),
                duration_ms: 1,
                ok: true,
                result: None,
                error: None,
            });
        }
        assert_eq!(task.history.len(), MAX_RUN_HISTORY);
        assert_eq!(task.run_count, (MAX_RUN_HISTORY + 10) as u64);
    }

    #[test]
    fn trigger_now_pulls_next_run_backward() {
        let mut task = ScheduledTask::new(
            "t".into(),
            "noop".into(),
            "ping".into(),
            serde_json::json!({}),
            3600,
        );
        let far_future = Utc::now() + chrono::Duration::hours(1);
        task.next_run_at = far_future;
        task.trigger_now();
        assert!(task.next_run_at <= Utc::now());
    }
}
