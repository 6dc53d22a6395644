// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Optional container-isolated sandbox variant (§4.3 "docker runner"):
//! launches each call in a fresh container with no added capabilities, no
//! new privileges, read-only rootfs, no network, a PID limit, a memory cap,
//! and a seccomp profile. Same IPC contract as the persistent-process
//! variant (`SandboxWorker`) at the protocol level; here each call gets its
//! own container instead of a long-lived process.
//!
//! Grounded in the teacher's `infrastructure/runtime.rs::DockerRuntime`:
//! connect-with-local-defaults, detailed troubleshooting error messages on
//! connect failure, `create_exec`/`start_exec`/`inspect_exec` call shape, and
//! host_config resource limits (memory, storage_opt). Feature-gated behind
//! `docker-sandbox` since it pulls in `bollard`.

use std::time::Duration;

use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use serde_json::Value;

use crate::domain::errors::GatewayError;

pub struct DockerSandboxConfig {
    pub image: String,
    pub seccomp_profile_path: Option<std::path::PathBuf>,
    pub memory_bytes: i64,
    pub pids_limit: i64,
}

pub struct DockerSandboxRunner {
    docker: Docker,
    config: DockerSandboxConfig,
}

impl DockerSandboxRunner {
    pub fn connect(config: DockerSandboxConfig) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            anyhow::anyhow!(
                "failed to connect to Docker daemon: {e}. Is Docker running? \
                 Check `docker info` and that the current user has access to the \
                 Docker socket (usually /var/run/docker.sock)."
            )
        })?;
        Ok(Self { docker, config })
    }

    pub async fn healthcheck(&self) -> anyhow::Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Run one `(action, params)` call in a fresh, locked-down container and
    /// collect its stdout as the JSON result. The container is always
    /// removed afterward, success or failure.
    pub async fn call(&self, action: &str, params: Value, timeout: Duration) -> Result<Value, GatewayError> {
        let name = format!("gateway-sandbox-{}", uuid::Uuid::new_v4());
        let security_opt = self
            .config
            .seccomp_profile_path
            .as_ref()
            .map(|p| format!("seccomp={}", p.display()))
            .into_iter()
            .chain(std::iter::once("no-new-privileges:true".to_string()))
            .collect();

        let host_config = HostConfig {
            memory: Some(self.config.memory_bytes),
            pids_limit: Some(self.config.pids_limit),
            readonly_rootfs: Some(true),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(security_opt),
            ..Default::default()
        };

        let payload = serde_json::json!({ "action": action, "params": params }).to_string();
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let container_config = Config {
            image: Some(self.config.image.clone()),
            cmd: Some(vec!["--payload".to_string(), payload]),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let create_result = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;

        let run = tokio::time::timeout(timeout, self.run_and_collect(&create_result.id)).await;

        let _ = self
            .docker
            .remove_container(
                &create_result.id,
                Some(RemoveContainerOptions { force: true, ..Default::default() }),
            )
            .await;

        match run {
            Ok(inner) => inner,
            Err(_) => Err(GatewayError::Timeout { elapsed_ms: timeout.as_millis() as u64 }),
        }
    }

    async fn run_and_collect(&self, container_id: &str) -> Result<Value, GatewayError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(vec!["cat".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?;

        let mut stdout = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| GatewayError::WorkerError { message: e.to_string() })?
        {
            while let Some(Ok(chunk)) = output.next().await {
                stdout.push_str(&chunk.to_string());
            }
        }

        serde_json::from_str(&stdout).map_err(|e| GatewayError::WorkerError {
            message: format!("malformed sandbox container output: {e}"),
        })
    }
}
