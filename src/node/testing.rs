//! In-memory container runtime for tests

use super::config::{NodeConfig, NodeId, NodeRecord, NodeStatus};
use super::runtime::{ContainerRuntime, RuntimeResult};
use crate::error::ProvisionError;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryNode {
    config: NodeConfig,
    state: &'static str,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<NodeId, MemoryNode>,
    calls: Vec<(String, String)>,
    fail: HashSet<(String, String)>,
    occupied_ports: HashSet<u16>,
    unreachable: bool,
}

/// Runtime that keeps nodes in a map, with fault injection
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: RwLock<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `action` fail for the node of `application`
    pub fn fail_on(&self, action: &str, application: &str) {
        self.write().fail.insert((action.to_string(), application.to_string()));
    }

    /// Simulate a foreign process holding a host port
    pub fn occupy_host_port(&self, port: u16) {
        self.write().occupied_ports.insert(port);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.write().unreachable = unreachable;
    }

    /// Number of calls made for `action`
    pub fn count_calls(&self, action: &str) -> usize {
        self.read().calls.iter().filter(|(a, _)| a == action).count()
    }

    /// Applications touched by `action`, in call order
    pub fn calls_for(&self, action: &str) -> Vec<String> {
        self.read()
            .calls
            .iter()
            .filter(|(a, _)| a == action)
            .map(|(_, app)| app.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Make the runtime report `port` as the published port of `id`
    pub fn republish(&self, id: &NodeId, port: u16) {
        if let Some(node) = self.write().nodes.get_mut(id) {
            node.config.host_port = port;
        }
    }

    pub fn host_port(&self, id: &NodeId) -> Option<u16> {
        self.read().nodes.get(id).map(|n| n.config.host_port)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap()
    }

    /// Record a call and apply injected faults
    fn enter(&self, action: &str, id: &NodeId) -> RuntimeResult<()> {
        let mut inner = self.write();
        if inner.unreachable {
            return Err(ProvisionError::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }

        let application = inner
            .nodes
            .get(id)
            .map(|n| n.config.application.clone())
            .unwrap_or_else(|| id.as_str().rsplit('.').next().unwrap_or_default().to_string());
        inner.calls.push((action.to_string(), application.clone()));

        if inner.fail.contains(&(action.to_string(), application)) {
            return Err(ProvisionError::Command {
                node: id.to_string(),
                action: action.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn record(id: &NodeId, node: &MemoryNode) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            status: NodeStatus::from_runtime_state(node.state),
            state: node.state.to_string(),
            labels: node.config.labels(),
            host_port: Some(node.config.host_port),
        }
    }
}

impl ContainerRuntime for MemoryRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        if self.read().unreachable {
            return Err(ProvisionError::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(())
    }

    async fn inspect(&self, id: &NodeId) -> RuntimeResult<Option<NodeRecord>> {
        self.ping().await?;
        Ok(self.read().nodes.get(id).map(|n| Self::record(id, n)))
    }

    async fn list_managed(&self) -> RuntimeResult<Vec<NodeRecord>> {
        self.ping().await?;
        let inner = self.read();
        let mut records: Vec<_> = inner.nodes.iter().map(|(id, n)| Self::record(id, n)).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn create(&self, config: &NodeConfig) -> RuntimeResult<()> {
        let mut inner = self.write();
        if inner.unreachable {
            return Err(ProvisionError::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        inner.calls.push(("create".to_string(), config.application.clone()));

        if inner.fail.contains(&("create".to_string(), config.application.clone())) {
            return Err(ProvisionError::Command {
                node: config.id.to_string(),
                action: "create".to_string(),
                message: format!("Unable to find image '{}' locally", config.image),
            });
        }
        if inner.nodes.contains_key(&config.id) {
            return Err(ProvisionError::AlreadyExists(config.id.to_string()));
        }

        inner.nodes.insert(
            config.id.clone(),
            MemoryNode {
                config: config.clone(),
                state: "created",
            },
        );
        Ok(())
    }

    async fn start(&self, id: &NodeId) -> RuntimeResult<()> {
        self.enter("start", id)?;
        let mut inner = self.write();

        let port = match inner.nodes.get(id) {
            Some(node) => node.config.host_port,
            None => {
                return Err(ProvisionError::Command {
                    node: id.to_string(),
                    action: "start".to_string(),
                    message: format!("No such container: {}", id),
                })
            }
        };
        let taken = inner.occupied_ports.contains(&port)
            || inner
                .nodes
                .iter()
                .any(|(other, n)| other != id && n.state == "running" && n.config.host_port == port);
        if taken {
            return Err(ProvisionError::Command {
                node: id.to_string(),
                action: "start".to_string(),
                message: format!("Bind for 0.0.0.0:{} failed: port is already allocated", port),
            });
        }

        if let Some(node) = inner.nodes.get_mut(id) {
            node.state = "running";
        }
        Ok(())
    }

    async fn stop(&self, id: &NodeId) -> RuntimeResult<()> {
        self.enter("stop", id)?;
        if let Some(node) = self.write().nodes.get_mut(id) {
            node.state = "exited";
        }
        Ok(())
    }

    async fn remove(&self, id: &NodeId) -> RuntimeResult<()> {
        self.enter("remove", id)?;
        self.write().nodes.remove(id);
        Ok(())
    }
}
