// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process counters, gauges, histograms with text-format export, via the
//! `metrics` facade + `metrics-exporter-prometheus`, matching the teacher's
//! workspace dependency choice.

use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;

/// Installs the global recorder once and returns a handle that can render the
/// current state as Prometheus text (`GET /metrics`).
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

pub fn record_tool_call(tool: &str) {
    metrics::counter!("tool_calls_total", "tool" => tool.to_string()).increment(1);
}

pub fn record_validation_error(tool: &str) {
    metrics::counter!("tool_validation_errors_total", "tool" => tool.to_string()).increment(1);
}

pub fn record_tool_call_duration(tool: &str, seconds: f64) {
    metrics::histogram!("tool_call_duration_seconds", "tool" => tool.to_string()).record(seconds);
}

pub fn record_scheduler_run(task: &str, ok: bool, seconds: f64) {
    metrics::counter!("scheduler_runs_total", "task" => task.to_string()).increment(1);
    if !ok {
        metrics::counter!("scheduler_errors_total", "task" => task.to_string()).increment(1);
    }
    metrics::histogram!("scheduler_run_duration_seconds", "task" => task.to_string()).record(seconds);
}

pub fn set_sandbox_healthy_workers(count: u64) {
    metrics::gauge!("sandbox_healthy_workers").set(count as f64);
}

pub fn set_sandbox_pool_exhausted(exhausted: bool) {
    metrics::gauge!("sandbox_pool_exhausted").set(if exhausted { 1.0 } else { 0.0 });
}

pub fn set_pending_approvals(count: u64) {
    metrics::gauge!("pending_approvals").set(count as f64);
}

pub fn record_rate_limited(scope: &str) {
    metrics::counter!("rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_webhook_delivery(ok: bool) {
    metrics::counter!("webhook_deliveries_total", "ok" => ok.to_string()).increment(1);
}
