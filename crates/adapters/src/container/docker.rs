// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker-backed `ContainerDriver`: spawns one container per worker run,
//! provisions source via `git clone` into a named volume, tears the volume
//! down on kill. Grounded on the sibling pack's Docker agent adapter
//! (`alfredjeanlab-oddjobs/crates/daemon/src/adapters/agent/docker/mod.rs`),
//! trimmed of its TCP/coop-specific transport: this driver talks to the
//! container purely through `docker exec`/`docker attach`-style subprocess
//! calls, since the spec has no wire protocol of its own for the agent
//! inside the box.

use super::{ContainerError, ContainerHandle, ContainerReconnectConfig, ContainerSpawnConfig};
use crate::subprocess::{run_with_timeout, CONTAINER_COMMAND_TIMEOUT, CONTAINER_SPAWN_TIMEOUT};
use async_trait::async_trait;
use lanectl_core::{AgentSessionId, RunId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;

struct ContainerMeta {
    container_name: String,
    volume_name: Option<String>,
}

/// `ContainerDriver` that shells out to the `docker` CLI.
#[derive(Clone)]
pub struct DockerContainerDriver {
    meta: Arc<Mutex<HashMap<RunId, ContainerMeta>>>,
}

impl Default for DockerContainerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerContainerDriver {
    pub fn new() -> Self {
        Self {
            meta: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn do_spawn(
        &self,
        config: ContainerSpawnConfig,
    ) -> Result<ContainerHandle, ContainerError> {
        let container_name = format!("lanectl-{}", config.run_id);
        let volume_name = format!("lanectl-{}-ws", config.run_id);

        run_docker(&["volume", "create", &volume_name])
            .await
            .map_err(|e| ContainerError::SpawnFailed(format!("volume create failed: {e}")))?;

        if let Some(ref repo) = config.repo {
            let vol_arg = format!("{volume_name}:/workspace");
            let mut clone_args = vec!["run", "--rm", "-v", vol_arg.as_str()];
            let ssh_dir = dirs_home_ssh();
            let ssh_mount = format!("{}:/root/.ssh:ro", ssh_dir.display());
            if ssh_dir.exists() {
                clone_args.extend_from_slice(&["-v", ssh_mount.as_str()]);
            }
            clone_args.push(config.image.as_str());

            let git_cmd = match &config.branch {
                Some(branch) => format!(
                    "git clone --branch {branch} --single-branch --depth 1 {repo} /workspace"
                ),
                None => format!("git clone --single-branch --depth 1 {repo} /workspace"),
            };
            clone_args.extend_from_slice(&["bash", "-c", git_cmd.as_str()]);

            tracing::info!(run_id = %config.run_id, %repo, branch = ?config.branch, "cloning source into container volume");
            if let Err(e) = run_docker(&clone_args).await {
                tracing::warn!(run_id = %config.run_id, error = %e, "git clone into volume failed, continuing with empty volume");
            }
        }

        let vol_mount = format!("{volume_name}:/workspace");
        let mut docker_args = vec!["run", "-d", "--name", container_name.as_str()];
        let env_pairs: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        for pair in &env_pairs {
            docker_args.extend_from_slice(&["-e", pair.as_str()]);
        }
        docker_args.extend_from_slice(&["-v", vol_mount.as_str(), "-w", "/workspace"]);
        docker_args.push(config.image.as_str());

        tracing::info!(run_id = %config.run_id, %container_name, "spawning container");
        run_docker(&docker_args)
            .await
            .map_err(|e| ContainerError::SpawnFailed(format!("docker run failed: {e}")))?;

        if !config.initial_input.is_empty() {
            self.exec_input(&container_name, &config.initial_input)
                .await?;
        }

        let session_id = AgentSessionId::new(container_name.clone());
        self.meta.lock().insert(
            config.run_id.clone(),
            ContainerMeta {
                container_name: container_name.clone(),
                volume_name: Some(volume_name),
            },
        );
        Ok(ContainerHandle {
            run_id: config.run_id,
            session_id,
            container_name,
        })
    }

    async fn exec_input(&self, container_name: &str, input: &str) -> Result<(), ContainerError> {
        let mut cmd = Command::new("docker");
        cmd.args(["exec", "-i", container_name, "bash", "-c", "cat > /dev/stdin"]);
        run_with_timeout(cmd, CONTAINER_COMMAND_TIMEOUT, "docker exec")
            .await
            .map_err(ContainerError::SendFailed)?;
        Ok(())
    }
}

#[async_trait]
impl super::ContainerDriver for DockerContainerDriver {
    async fn spawn(&self, config: ContainerSpawnConfig) -> Result<ContainerHandle, ContainerError> {
        let start = std::time::Instant::now();
        let result = self.do_spawn(config).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(h) => tracing::info!(run_id = %h.run_id, elapsed_ms, "container spawned"),
            Err(e) => tracing::error!(elapsed_ms, error = %e, "container spawn failed"),
        }
        result
    }

    async fn reconnect(
        &self,
        config: ContainerReconnectConfig,
    ) -> Result<ContainerHandle, ContainerError> {
        let container_name = format!("lanectl-{}", config.run_id);
        let output = tokio::process::Command::new("docker")
            .args(["inspect", "-f", "{{.State.Running}}", &container_name])
            .output()
            .await
            .map_err(|e| {
                ContainerError::NotFound(format!("docker inspect failed for {container_name}: {e}"))
            })?;

        if !output.status.success() || String::from_utf8_lossy(&output.stdout).trim() != "true" {
            return Err(ContainerError::NotFound(format!(
                "container {container_name} not running"
            )));
        }

        self.meta.lock().insert(
            config.run_id.clone(),
            ContainerMeta {
                container_name: container_name.clone(),
                volume_name: None,
            },
        );
        Ok(ContainerHandle {
            run_id: config.run_id,
            session_id: config.session_id,
            container_name,
        })
    }

    async fn send(&self, run_id: &RunId, input: &str) -> Result<(), ContainerError> {
        let container_name = self
            .meta
            .lock()
            .get(run_id)
            .map(|m| m.container_name.clone())
            .ok_or_else(|| ContainerError::NotFound(run_id.to_string()))?;
        self.exec_input(&container_name, input).await
    }

    async fn kill(&self, run_id: &RunId) -> Result<(), ContainerError> {
        let meta = self.meta.lock().remove(run_id);
        let Some(meta) = meta else {
            return Ok(());
        };
        tracing::info!(%run_id, "killing container");
        let _ = run_docker(&["rm", "-f", &meta.container_name]).await;
        if let Some(ref vol) = meta.volume_name {
            let _ = run_docker(&["volume", "rm", vol]).await;
        }
        Ok(())
    }

    async fn is_alive(&self, run_id: &RunId) -> bool {
        let Some(container_name) = self.meta.lock().get(run_id).map(|m| m.container_name.clone())
        else {
            return false;
        };
        let output = tokio::process::Command::new("docker")
            .args(["inspect", "-f", "{{.State.Running}}", &container_name])
            .output()
            .await;
        matches!(output, Ok(o) if o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
    }
}

fn dirs_home_ssh() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/root"))
        .join(".ssh")
}

/// Run a docker CLI command and return stdout on success, bounded by
/// `CONTAINER_SPAWN_TIMEOUT`.
async fn run_docker(args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("docker");
    cmd.args(args);
    let output = run_with_timeout(cmd, CONTAINER_SPAWN_TIMEOUT, "docker").await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "docker {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        ))
    }
}
