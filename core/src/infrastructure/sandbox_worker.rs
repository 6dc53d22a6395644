// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! A single persistent sandbox worker subprocess and its length-prefixed JSON
//! IPC wire protocol (§4.3: "newline-delimited or length-prefixed JSON on
//! stdio, implementer's choice; must be unambiguous" — this implementation
//! picks a 4-byte big-endian length prefix).
//!
//! Grounded in the teacher's `ToolServerManager` lifecycle shape
//! (`infrastructure/tool_router.rs`): spawn, health-check, and replace on
//! failure, generalized from MCP tool-server bookkeeping to an actual
//! subprocess transport (the teacher's version never wired up real IPC).

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::domain::errors::GatewayError;

const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    action: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// One long-lived subprocess. Not `Clone`; the pool hands out exclusive
/// access per call and returns the worker to the idle queue afterward.
pub struct SandboxWorker {
    child: Child,
    healthy: bool,
}

impl SandboxWorker {
    pub fn spawn(program: &std::path::Path) -> anyhow::Result<Self> {
        let child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Self { child, healthy: true })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    /// `noop` action used by the pool's health-check loop (§4.3 "Every worker
    /// handles a noop action").
    pub async fn ping(&mut self, timeout: Duration) -> bool {
        matches!(
            self.call("noop", Value::Object(Default::default()), MAX_FRAME_BYTES, timeout).await,
            Ok(_)
        )
    }

    /// Send one request frame, read one response frame, enforcing
    /// `max_payload_bytes` on both directions and the per-call deadline.
    /// On any protocol-level failure the worker is marked unhealthy so the
    /// pool replaces it on return.
    pub async fn call(
        &mut self,
        action: &str,
        params: Value,
        max_payload_bytes: usize,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let request = WorkerRequest { action, params: &params };
        let body = serde_json::to_vec(&request).map_err(|e| GatewayError::WorkerError {
            message: format!("failed to encode request: {e}"),
        })?;
        if body.len() > max_payload_bytes {
            return Err(GatewayError::PayloadTooLarge {
                size: body.len(),
                limit: max_payload_bytes,
            });
        }

        let result = tokio::time::timeout(timeout, self.send_and_receive(&body, max_payload_bytes)).await;
        match result {
            Ok(Ok(response)) => {
                if response.ok {
                    Ok(response.result)
                } else {
                    Err(GatewayError::WorkerError {
                        message: response.error.unwrap_or_else(|| "unknown worker error".to_string()),
                    })
                }
            }
            Ok(Err(e)) => {
                self.healthy = false;
                Err(e)
            }
            Err(_) => {
                self.healthy = false;
                Err(GatewayError::Timeout {
                    elapsed_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn send_and_receive(&mut self, body: &[u8], max_payload_bytes: usize) -> Result<WorkerResponse, GatewayError> {
        let stdin = self.child.stdin.as_mut().ok_or_else(|| GatewayError::WorkerError {
            message: "worker stdin closed".to_string(),
        })?;
        let len = body.len() as u32;
        stdin
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;
        stdin
            .write_all(body)
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;
        stdin.flush().await.map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;

        let stdout = self.child.stdout.as_mut().ok_or_else(|| GatewayError::WorkerError {
            message: "worker stdout closed".to_string(),
        })?;
        let mut len_buf = [0u8; 4];
        stdout
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;
        let response_len = u32::from_be_bytes(len_buf) as usize;
        if response_len > max_payload_bytes.max(MAX_FRAME_BYTES) {
            return Err(GatewayError::PayloadTooLarge {
                size: response_len,
                limit: max_payload_bytes,
            });
        }
        let mut response_buf = vec![0u8; response_len];
        stdout
            .read_exact(&mut response_buf)
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;
        serde_json::from_slice(&response_buf).map_err(|e| GatewayError::WorkerError {
            message: format!("malformed worker response: {e}"),
        })
    }
}
