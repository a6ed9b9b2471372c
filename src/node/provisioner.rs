//! Per-application node lifecycle

use super::config::{NodeConfig, NodeId, NodeRecord, NodeStatus};
use super::runtime::{is_port_in_use, ContainerRuntime, RuntimeResult};
use crate::error::ProvisionError;
use crate::manifest::ApplicationSpec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Converges single nodes towards their application spec
///
/// Holds no node state of its own; every operation inspects the runtime
/// first. Operations on the same [`NodeId`] are serialized.
pub struct NodeProvisioner<R> {
    runtime: Arc<R>,
    locks: Mutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>,
}

impl<R: ContainerRuntime> NodeProvisioner<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    async fn lock(&self, id: &NodeId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Current status of the node for `spec`
    pub async fn observe(&self, spec: &ApplicationSpec) -> RuntimeResult<NodeStatus> {
        let id = NodeId::for_application(spec);
        Ok(self
            .runtime
            .inspect(&id)
            .await?
            .map(|r| r.status)
            .unwrap_or(NodeStatus::Absent))
    }

    /// Make sure the node for `spec` is running
    ///
    /// A running node is left alone. A stopped node is started in place
    /// unless its configuration drifted from the spec, in which case it is
    /// recreated. A missing node is created and started.
    pub async fn ensure(&self, spec: &ApplicationSpec) -> RuntimeResult<NodeStatus> {
        let desired = NodeConfig::from_spec(spec).map_err(|e| ProvisionError::Command {
            node: NodeId::for_application(spec).to_string(),
            action: "resolve workdir for".to_string(),
            message: e.to_string(),
        })?;
        let _guard = self.lock(&desired.id).await;

        match self.runtime.inspect(&desired.id).await? {
            Some(record) if record.status == NodeStatus::Running => {
                if record.drifted_from(&desired) {
                    tracing::warn!(
                        "Node {} is running with an outdated configuration; run `down` then `up` to apply it",
                        desired.id
                    );
                }
                tracing::debug!("Node {} already running", desired.id);
                Ok(NodeStatus::Running)
            }
            Some(record) if record.status.exists() && !record.drifted_from(&desired) => {
                tracing::info!("Starting node {}", desired.id);
                self.start(spec, &desired).await
            }
            Some(record) => {
                tracing::info!(
                    "Recreating node {} ({}, configuration changed)",
                    desired.id,
                    record.state
                );
                self.runtime.remove(&desired.id).await?;
                self.create_and_start(spec, &desired).await
            }
            None => {
                tracing::info!("Creating node {} for {}", desired.id, spec.qualified_name());
                self.create_and_start(spec, &desired).await
            }
        }
    }

    /// Stop the node for `spec`; a missing or stopped node is left alone
    pub async fn stop(&self, spec: &ApplicationSpec) -> RuntimeResult<NodeStatus> {
        let id = NodeId::for_application(spec);
        let _guard = self.lock(&id).await;

        match self.runtime.inspect(&id).await?.map(|r| r.status) {
            None => Ok(NodeStatus::Absent),
            Some(NodeStatus::Running) | Some(NodeStatus::Pending) => {
                tracing::info!("Stopping node {}", id);
                self.runtime.stop(&id).await?;
                Ok(NodeStatus::Stopped)
            }
            Some(status) => Ok(status),
        }
    }

    /// Remove the node for `spec`, whatever state it is in
    pub async fn remove(&self, spec: &ApplicationSpec) -> RuntimeResult<NodeStatus> {
        let id = NodeId::for_application(spec);
        let _guard = self.lock(&id).await;

        match self.runtime.inspect(&id).await? {
            None => Ok(NodeStatus::Absent),
            Some(_) => {
                tracing::info!("Removing node {}", id);
                self.runtime.remove(&id).await?;
                Ok(NodeStatus::Removed)
            }
        }
    }

    async fn create_and_start(
        &self,
        spec: &ApplicationSpec,
        desired: &NodeConfig,
    ) -> RuntimeResult<NodeStatus> {
        if !desired.workdir.is_dir() {
            return Err(ProvisionError::MissingWorkdir {
                application: spec.name.clone(),
                path: desired.workdir.clone(),
            });
        }

        match self.runtime.create(desired).await {
            Ok(()) => {}
            Err(ProvisionError::AlreadyExists(_)) => {
                // Another invocation created it first; converge on that node.
                return match self.runtime.inspect(&desired.id).await? {
                    Some(NodeRecord {
                        status: NodeStatus::Running,
                        ..
                    }) => Ok(NodeStatus::Running),
                    Some(_) => self.start(spec, desired).await,
                    None => Err(ProvisionError::Command {
                        node: desired.id.to_string(),
                        action: "create".to_string(),
                        message: "node vanished while being created".to_string(),
                    }),
                };
            }
            Err(e) => return Err(e),
        }

        match self.start(spec, desired).await {
            Ok(status) => Ok(status),
            Err(e) => {
                // Do not leave a created-but-never-started node behind.
                if !e.is_fatal() {
                    if let Err(cleanup) = self.runtime.remove(&desired.id).await {
                        tracing::warn!("Failed to roll back node {}: {}", desired.id, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn start(&self, spec: &ApplicationSpec, desired: &NodeConfig) -> RuntimeResult<NodeStatus> {
        match self.runtime.start(&desired.id).await {
            Ok(()) => Ok(NodeStatus::Running),
            Err(ProvisionError::Command { message, .. }) if is_port_in_use(&message) => {
                Err(ProvisionError::PortInUse {
                    application: spec.name.clone(),
                    port: spec.host_port,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::MemoryRuntime;
    use tempfile::tempdir;

    fn spec(dir: &std::path::Path, name: &str, port: u16) -> ApplicationSpec {
        ApplicationSpec::new(name, port).workdir(dir)
    }

    #[tokio::test]
    async fn test_ensure_creates_then_is_idempotent() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let provisioner = NodeProvisioner::new(runtime.clone());
        let web = spec(temp.path(), "web", 8080);

        assert_eq!(provisioner.observe(&web).await.unwrap(), NodeStatus::Absent);
        assert_eq!(provisioner.ensure(&web).await.unwrap(), NodeStatus::Running);
        assert_eq!(provisioner.ensure(&web).await.unwrap(), NodeStatus::Running);

        assert_eq!(runtime.count_calls("create"), 1);
        assert_eq!(runtime.count_calls("start"), 1);
        assert_eq!(runtime.node_count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_restarts_stopped_node_in_place() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let provisioner = NodeProvisioner::new(runtime.clone());
        let web = spec(temp.path(), "web", 8080);

        provisioner.ensure(&web).await.unwrap();
        assert_eq!(provisioner.stop(&web).await.unwrap(), NodeStatus::Stopped);
        assert_eq!(provisioner.ensure(&web).await.unwrap(), NodeStatus::Running);

        assert_eq!(runtime.count_calls("create"), 1);
        assert_eq!(runtime.count_calls("remove"), 0);
    }

    #[tokio::test]
    async fn test_ensure_recreates_drifted_stopped_node() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let provisioner = NodeProvisioner::new(runtime.clone());
        let web = spec(temp.path(), "web", 8080);

        provisioner.ensure(&web).await.unwrap();
        provisioner.stop(&web).await.unwrap();

        let moved = web.clone().host_port(9090);
        assert_eq!(provisioner.ensure(&moved).await.unwrap(), NodeStatus::Running);

        assert_eq!(runtime.count_calls("create"), 2);
        assert_eq!(runtime.count_calls("remove"), 1);
        assert_eq!(runtime.host_port(&NodeId::for_application(&web)), Some(9090));
    }

    #[tokio::test]
    async fn test_stop_and_remove_are_idempotent() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let provisioner = NodeProvisioner::new(runtime.clone());
        let web = spec(temp.path(), "web", 8080);

        assert_eq!(provisioner.stop(&web).await.unwrap(), NodeStatus::Absent);
        assert_eq!(provisioner.remove(&web).await.unwrap(), NodeStatus::Absent);

        provisioner.ensure(&web).await.unwrap();
        assert_eq!(provisioner.stop(&web).await.unwrap(), NodeStatus::Stopped);
        assert_eq!(provisioner.stop(&web).await.unwrap(), NodeStatus::Stopped);
        assert_eq!(runtime.count_calls("stop"), 1);

        assert_eq!(provisioner.remove(&web).await.unwrap(), NodeStatus::Removed);
        assert_eq!(provisioner.remove(&web).await.unwrap(), NodeStatus::Absent);
        assert_eq!(runtime.node_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_workdir_fails_before_create() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let provisioner = NodeProvisioner::new(runtime.clone());
        let web = spec(&temp.path().join("missing"), "web", 8080);

        let err = provisioner.ensure(&web).await.unwrap_err();
        assert!(matches!(err, ProvisionError::MissingWorkdir { .. }));
        assert_eq!(runtime.count_calls("create"), 0);
    }

    #[tokio::test]
    async fn test_port_in_use_rolls_back_created_node() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let provisioner = NodeProvisioner::new(runtime.clone());

        runtime.occupy_host_port(8080);
        let web = spec(temp.path(), "web", 8080);
        let err = provisioner.ensure(&web).await.unwrap_err();

        assert_eq!(
            err,
            ProvisionError::PortInUse {
                application: "web".to_string(),
                port: 8080
            }
        );
        assert_eq!(runtime.node_count(), 0);
    }

    #[tokio::test]
    async fn test_name_collision_converges_on_existing_node() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let web = spec(temp.path(), "web", 8080);

        let first = NodeProvisioner::new(runtime.clone());
        let second = NodeProvisioner::new(runtime.clone());
        let (a, b) = tokio::join!(first.ensure(&web), second.ensure(&web));

        assert_eq!(a.unwrap(), NodeStatus::Running);
        assert_eq!(b.unwrap(), NodeStatus::Running);
        assert_eq!(runtime.node_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_runtime_is_fatal() {
        let temp = tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.set_unreachable(true);
        let provisioner = NodeProvisioner::new(runtime);

        let err = provisioner.ensure(&spec(temp.path(), "web", 8080)).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
