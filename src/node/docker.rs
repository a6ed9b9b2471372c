//! Docker CLI backed container runtime
//!
//! Drives the `docker` binary through `tokio::process`. Every call is bounded
//! by a timeout and the child is killed if the timeout fires.

use super::config::{NodeConfig, NodeId, NodeRecord, NodeStatus, LABEL_MANAGED};
use super::runtime::{ContainerRuntime, RuntimeResult};
use crate::config::DEFAULT_PULL_TIMEOUT;
use crate::error::ProvisionError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::time::Duration;

/// Messages the docker CLI prints when the daemon cannot be reached
const UNREACHABLE_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
    "permission denied while trying to connect",
];

/// Runtime that shells out to the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
    pull_timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    /// Bound image pulls by `timeout` instead of the per-call timeout
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Run the CLI and capture its output
    async fn run(&self, action: &str, node: &str, args: &[&str]) -> RuntimeResult<Output> {
        self.run_for(self.timeout, action, node, args).await
    }

    async fn run_for(&self, timeout: Duration, action: &str, node: &str, args: &[&str]) -> RuntimeResult<Output> {
        tracing::debug!("{} {}", self.binary, args.join(" "));

        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ProvisionError::RuntimeUnavailable(format!(
                "failed to run {}: {}",
                self.binary, e
            ))),
            Err(_) => Err(ProvisionError::Command {
                node: node.to_string(),
                action: action.to_string(),
                message: format!("{} timed out after {}s", self.binary, timeout.as_secs()),
            }),
        }
    }

    /// Run the CLI and turn a non-zero exit into an error
    async fn run_checked(&self, action: &str, node: &str, args: &[&str]) -> RuntimeResult<Output> {
        let output = self.run(action, node, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(failure(action, node, &output))
        }
    }

    /// Pull `image` unless it is already present
    async fn ensure_image(&self, node: &str, image: &str) -> RuntimeResult<()> {
        let present = self
            .run("pull", node, &["image", "inspect", "--format", "{{.Id}}", image])
            .await?;
        if present.status.success() {
            return Ok(());
        }

        tracing::info!("Pulling image {}", image);
        let output = self.run_for(self.pull_timeout, "pull", node, &["pull", image]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(failure("pull", node, &output))
        }
    }

    async fn inspect_many(&self, names: &[&str]) -> RuntimeResult<Vec<NodeRecord>> {
        let mut args = vec!["inspect", "--type", "container"];
        args.extend_from_slice(names);

        let node = names.join(",");
        let output = self.run("inspect", &node, &args).await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            // A node removed between listing and inspecting is simply gone.
            if !is_missing(&stderr) {
                return Err(failure("inspect", &node, &output));
            }
            if output.stdout.iter().all(u8::is_ascii_whitespace) {
                return Ok(Vec::new());
            }
        }

        parse_inspect(&output.stdout)
    }
}

impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> RuntimeResult<()> {
        let output = self
            .run("ping", "-", &["version", "--format", "{{.Server.Version}}"])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ProvisionError::RuntimeUnavailable(stderr_of(&output)))
        }
    }

    async fn inspect(&self, id: &NodeId) -> RuntimeResult<Option<NodeRecord>> {
        Ok(self.inspect_many(&[id.as_str()]).await?.into_iter().next())
    }

    async fn list_managed(&self) -> RuntimeResult<Vec<NodeRecord>> {
        let filter = format!("label={}=true", LABEL_MANAGED);
        let output = self
            .run_checked("list", "-", &["ps", "--all", "--filter", filter.as_str(), "--format", "{{.Names}}"])
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let names: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        self.inspect_many(&names).await
    }

    async fn create(&self, config: &NodeConfig) -> RuntimeResult<()> {
        self.ensure_image(config.id.as_str(), &config.image).await?;

        let args = create_args(config);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run("create", config.id.as_str(), &args).await?;

        if output.status.success() {
            return Ok(());
        }
        if stderr_of(&output).contains("is already in use") {
            return Err(ProvisionError::AlreadyExists(config.id.to_string()));
        }
        Err(failure("create", config.id.as_str(), &output))
    }

    async fn start(&self, id: &NodeId) -> RuntimeResult<()> {
        let output = self.run("start", id.as_str(), &["start", id.as_str()]).await?;
        if output.status.success() {
            return Ok(());
        }
        if stderr_of(&output).to_ascii_lowercase().contains("paused") {
            self.run_checked("unpause", id.as_str(), &["unpause", id.as_str()])
                .await?;
            return Ok(());
        }
        Err(failure("start", id.as_str(), &output))
    }

    async fn stop(&self, id: &NodeId) -> RuntimeResult<()> {
        self.run_checked("stop", id.as_str(), &["stop", id.as_str()])
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &NodeId) -> RuntimeResult<()> {
        let output = self
            .run("remove", id.as_str(), &["rm", "--force", "--volumes", id.as_str()])
            .await?;
        if output.status.success() || is_missing(&stderr_of(&output)) {
            Ok(())
        } else {
            Err(failure("remove", id.as_str(), &output))
        }
    }
}

/// Arguments for `docker create`
pub fn create_args(config: &NodeConfig) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        config.id.to_string(),
        "--hostname".to_string(),
        config.application.clone(),
    ];

    for (key, value) in config.labels() {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push("--volume".to_string());
    args.push(format!("{}:{}", config.workdir.display(), config.nodedir.display()));
    args.push("--workdir".to_string());
    args.push(config.nodedir.display().to_string());
    args.push("--publish".to_string());
    args.push(format!("{}:{}", config.host_port, config.port));

    if config.privileged {
        args.push("--privileged".to_string());
    }

    args.push(config.image.clone());
    args
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// Classify a failed CLI call
fn failure(action: &str, node: &str, output: &Output) -> ProvisionError {
    let stderr = stderr_of(output);
    let lower = stderr.to_ascii_lowercase();
    if UNREACHABLE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ProvisionError::RuntimeUnavailable(stderr);
    }

    let message = if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    };

    ProvisionError::Command {
        node: node.to_string(),
        action: action.to_string(),
        message,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectContainer {
    name: String,
    state: InspectState,
    #[serde(default)]
    config: Option<InspectConfig>,
    #[serde(default)]
    host_config: Option<InspectHostConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    port_bindings: Option<BTreeMap<String, Option<Vec<InspectPortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectPortBinding {
    #[serde(default)]
    host_port: String,
}

/// Decode `docker inspect` output
pub fn parse_inspect(stdout: &[u8]) -> RuntimeResult<Vec<NodeRecord>> {
    let containers: Vec<InspectContainer> =
        serde_json::from_slice(stdout).map_err(|e| ProvisionError::Decode(e.to_string()))?;

    Ok(containers
        .into_iter()
        .map(|c| {
            let host_port = c
                .host_config
                .and_then(|hc| hc.port_bindings)
                .and_then(|bindings| {
                    bindings
                        .into_values()
                        .flatten()
                        .flatten()
                        .find_map(|b| b.host_port.parse::<u16>().ok())
                });

            NodeRecord {
                id: c.name.trim_start_matches('/').to_string(),
                status: NodeStatus::from_runtime_state(&c.state.status),
                state: c.state.status,
                labels: c.config.and_then(|cfg| cfg.labels).unwrap_or_default(),
                host_port,
            }
        })
        .collect())
}
