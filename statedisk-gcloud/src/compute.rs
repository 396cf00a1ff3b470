//! Google Cloud compute backend
//!
//! Wraps the `gcloud` CLI:
//! - `compute instances create-with-container` / `delete` for the ephemeral
//!   instance lifecycle
//! - `logging read` for the system log stream used by container discovery
//! - `compute ssh` for attaching to container output in follow mode
//! - `compute images create --force` for freezing the attached disk
//!
//! The CLI only specifies *what* to run; it does not report the runtime
//! container identity at create time, so `create_instance` always returns
//! `container: None` and discovery runs as a fallback.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use statedisk_core::domain::instance::{
    ContainerHandle, DiskSpec, InstanceCreated, InstanceRef, InstanceSpec,
};
use statedisk_core::domain::snapshot::SnapshotRef;
use statedisk_core::error::ProvisionError;

use crate::error::{ProviderError, Result};
use crate::{ComputeProvider, StreamExit, SystemLogEntry};

/// Keep-alive probe interval for the ssh follow channel
///
/// Multi-hour follows over an otherwise idle connection are subject to
/// aggressive network-level idle timeouts; a 5-second probe keeps the
/// channel open.
const SSH_KEEPALIVE_SECS: u32 = 5;

/// Unanswered keep-alive probes before the ssh client gives up
const SSH_KEEPALIVE_MAX_MISSED: u32 = 12;

/// Compute provider backed by the `gcloud` CLI
#[derive(Debug, Clone)]
pub struct GcloudCompute {
    project: String,
    zone: String,
}

impl GcloudCompute {
    /// Creates a client scoped to one project and zone
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
        }
    }

    /// Runs a gcloud invocation to completion, capturing its output
    async fn run(&self, args: &[String]) -> Result<std::process::Output> {
        debug!("Running gcloud {}", args.join(" "));

        let output = Command::new("gcloud").args(args).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("gcloud stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("gcloud stderr: {}", stderr.trim());
        }

        Ok(output)
    }

    /// Runs a gcloud invocation, mapping failure to `CommandFailed`
    async fn run_checked(&self, args: &[String]) -> Result<std::process::Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::CommandFailed {
                program: "gcloud".to_string(),
                detail: format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        Ok(output)
    }
}

/// Builds the argument vector for `instances create-with-container`
fn create_instance_args(project: &str, zone: &str, spec: &InstanceSpec) -> Vec<String> {
    let name = spec.name.as_str();

    let mut disk = format!(
        "name={name},device-name={name},size={}GB,type={},auto-delete=yes",
        spec.disk.size_gb(),
        spec.disk.disk_type().name(),
    );
    if let Some(snapshot) = spec.disk.source_snapshot() {
        disk.push_str(&format!(",image={}", snapshot.name()));
    }

    let mut args = vec![
        "compute".to_string(),
        "instances".to_string(),
        "create-with-container".to_string(),
        name.to_string(),
        format!("--project={project}"),
        format!("--zone={zone}"),
        format!("--machine-type={}", spec.machine_type),
        format!("--container-image={}", spec.container.image),
        "--container-restart-policy=never".to_string(),
        format!("--create-disk={disk}"),
    ];

    for arg in &spec.container.args {
        args.push(format!("--container-arg={arg}"));
    }

    let mut env: Vec<_> = spec.container.env.iter().collect();
    env.sort();
    for (key, value) in env {
        args.push(format!("--container-env={key}={value}"));
    }

    args
}

/// Classifies a failed create by its stderr
///
/// Quota, name collision, and rejected specs are distinguishable because
/// none of them is worth retrying and each needs a different operator
/// response.
fn classify_create_error(stderr: &str, name: &str) -> ProvisionError {
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("already exists") {
        ProvisionError::NameCollision(name.to_string())
    } else if lower.contains("quota") {
        ProvisionError::Quota(stderr.trim().to_string())
    } else if lower.contains("invalid") || lower.contains("must match") {
        ProvisionError::InvalidSpec(stderr.trim().to_string())
    } else {
        ProvisionError::Other(stderr.trim().to_string())
    }
}

/// Remote command that follows a container's output and exits with the
/// container's own status
///
/// `docker logs --follow` exits 0 once the container stops no matter how it
/// died; `docker wait` reports the container's real exit code, so the trailing
/// `exit` makes the ssh channel carry the container's status instead.
fn follow_command(container: &ContainerHandle) -> String {
    let c = container.as_str();
    format!("sudo docker logs --follow {c} 2>&1; exit $(sudo docker wait {c})")
}

/// Extracts log messages from `gcloud logging read --format=json` output
fn parse_log_entries(json: &str) -> Result<Vec<SystemLogEntry>> {
    #[derive(serde::Deserialize)]
    struct RawPayload {
        message: Option<String>,
    }

    #[derive(serde::Deserialize)]
    struct RawEntry {
        #[serde(rename = "textPayload")]
        text_payload: Option<String>,
        #[serde(rename = "jsonPayload")]
        json_payload: Option<RawPayload>,
    }

    let raw: Vec<RawEntry> = serde_json::from_str(json)
        .map_err(|e| ProviderError::ParseError(format!("log entries: {e}")))?;

    Ok(raw
        .into_iter()
        .filter_map(|entry| {
            entry
                .text_payload
                .or(entry.json_payload.and_then(|p| p.message))
        })
        .map(|message| SystemLogEntry { message })
        .collect())
}

#[async_trait]
impl ComputeProvider for GcloudCompute {
    async fn create_instance(
        &self,
        spec: &InstanceSpec,
    ) -> std::result::Result<InstanceCreated, ProvisionError> {
        info!(
            "Creating instance {} (machine: {}, image: {})",
            spec.name, spec.machine_type, spec.container.image
        );

        let args = create_instance_args(&self.project, &self.zone, spec);
        let output = self
            .run(&args)
            .await
            .map_err(|e| ProvisionError::Other(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_create_error(&stderr, spec.name.as_str()));
        }

        info!("Instance {} created in zone {}", spec.name, self.zone);

        Ok(InstanceCreated {
            instance: InstanceRef {
                name: spec.name.clone(),
                zone: self.zone.clone(),
            },
            container: None,
        })
    }

    async fn delete_instance(&self, instance: &InstanceRef, delete_disks: bool) -> Result<()> {
        info!("Deleting instance {}", instance);

        let mut args = vec![
            "compute".to_string(),
            "instances".to_string(),
            "delete".to_string(),
            instance.name.as_str().to_string(),
            format!("--project={}", self.project),
            format!("--zone={}", instance.zone),
            "--quiet".to_string(),
        ];
        if delete_disks {
            args.push("--delete-disks=all".to_string());
        }

        let output = self.run(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_ascii_lowercase().contains("not found") {
                return Err(ProviderError::NotFound(instance.name.as_str().to_string()));
            }
            return Err(ProviderError::CommandFailed {
                program: "gcloud".to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        info!("Instance {} deleted", instance.name);
        Ok(())
    }

    async fn query_system_log(&self, filter: &str) -> Result<Vec<SystemLogEntry>> {
        let args = vec![
            "logging".to_string(),
            "read".to_string(),
            filter.to_string(),
            format!("--project={}", self.project),
            "--format=json".to_string(),
            "--freshness=30m".to_string(),
            "--limit=200".to_string(),
        ];

        let output = self.run_checked(&args).await?;
        parse_log_entries(&String::from_utf8_lossy(&output.stdout))
    }

    async fn stream_container_logs(
        &self,
        instance: &InstanceRef,
        container: &ContainerHandle,
        sentinel: Option<&str>,
    ) -> Result<StreamExit> {
        info!(
            "Following container {} on instance {}",
            container, instance.name
        );

        let remote_command = follow_command(container);
        let mut child = Command::new("gcloud")
            .arg("compute")
            .arg("ssh")
            .arg(instance.name.as_str())
            .arg(format!("--project={}", self.project))
            .arg(format!("--zone={}", instance.zone))
            .arg(format!("--ssh-flag=-oServerAliveInterval={SSH_KEEPALIVE_SECS}"))
            .arg(format!("--ssh-flag=-oServerAliveCountMax={SSH_KEEPALIVE_MAX_MISSED}"))
            .arg("--command")
            .arg(&remote_command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Local ssh/gcloud noise goes to debug; it is not container output
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ssh: {}", line);
                }
            });
        }

        let mut sentinel_seen = false;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(pattern) = sentinel {
                    if line.contains(pattern) {
                        info!("Success sentinel observed: {}", line.trim());
                        sentinel_seen = true;
                    }
                }
                debug!("[{}] {}", instance.name, line);
            }
        }

        let status = child.wait().await?;

        match status.code() {
            // 255 is the ssh client's own failure code: the connection
            // dropped rather than the remote command exiting
            Some(255) | None => {
                warn!("Log follow connection to {} lost", instance.name);
                Ok(StreamExit::ConnectionLost)
            }
            Some(code) => {
                info!(
                    "Container {} on {} exited with code {}",
                    container, instance.name, code
                );
                Ok(StreamExit::RemoteExit {
                    code,
                    sentinel_seen,
                })
            }
        }
    }

    async fn create_disk_image(
        &self,
        instance: &InstanceRef,
        image_name: &str,
    ) -> Result<SnapshotRef> {
        info!(
            "Creating image {} from disk of instance {}",
            image_name, instance.name
        );

        // The data disk shares the instance's deterministic name
        let create_args = vec![
            "compute".to_string(),
            "images".to_string(),
            "create".to_string(),
            image_name.to_string(),
            format!("--project={}", self.project),
            format!("--source-disk={}", instance.name.as_str()),
            format!("--source-disk-zone={}", instance.zone),
            "--force".to_string(),
        ];

        let output = self.run(&create_args).await?;
        if output.status.success() {
            info!("Image {} created", image_name);
            return Ok(SnapshotRef::new(image_name));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.to_ascii_lowercase().contains("already exists") {
            return Err(ProviderError::CommandFailed {
                program: "gcloud".to_string(),
                detail: stderr,
            });
        }

        // Overwrite path: a retried run re-freezes under the same key
        info!("Image {} already exists; replacing it", image_name);
        let delete_args = vec![
            "compute".to_string(),
            "images".to_string(),
            "delete".to_string(),
            image_name.to_string(),
            format!("--project={}", self.project),
            "--quiet".to_string(),
        ];
        self.run_checked(&delete_args).await?;
        self.run_checked(&create_args).await?;

        info!("Image {} replaced", image_name);
        Ok(SnapshotRef::new(image_name))
    }

    async fn image_exists(&self, image_name: &str) -> Result<bool> {
        let args = vec![
            "compute".to_string(),
            "images".to_string(),
            "describe".to_string(),
            image_name.to_string(),
            format!("--project={}", self.project),
            "--format=value(name)".to_string(),
        ];

        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_ascii_lowercase().contains("not found") {
            Ok(false)
        } else {
            Err(ProviderError::CommandFailed {
                program: "gcloud".to_string(),
                detail: stderr.trim().to_string(),
            })
        }
    }
}
