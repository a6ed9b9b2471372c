//! Container runtime interface

use super::config::{NodeConfig, NodeId, NodeRecord};
use crate::error::ProvisionError;
use std::future::Future;

/// Result type for runtime calls
pub type RuntimeResult<T> = std::result::Result<T, ProvisionError>;

/// Operations the provisioner needs from a container runtime
///
/// Every call addresses a single node by its [`NodeId`]. Implementations
/// report an unreachable runtime as [`ProvisionError::RuntimeUnavailable`]
/// and a name collision on create as [`ProvisionError::AlreadyExists`].
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Check that the runtime answers at all
    fn ping(&self) -> impl Future<Output = RuntimeResult<()>> + Send;

    /// Look up one node; `None` when it does not exist
    fn inspect(&self, id: &NodeId) -> impl Future<Output = RuntimeResult<Option<NodeRecord>>> + Send;

    /// Every node carrying the managed label
    fn list_managed(&self) -> impl Future<Output = RuntimeResult<Vec<NodeRecord>>> + Send;

    /// Create (but do not start) a node
    fn create(&self, config: &NodeConfig) -> impl Future<Output = RuntimeResult<()>> + Send;

    /// Start a created or stopped node
    fn start(&self, id: &NodeId) -> impl Future<Output = RuntimeResult<()>> + Send;

    /// Stop a running node
    fn stop(&self, id: &NodeId) -> impl Future<Output = RuntimeResult<()>> + Send;

    /// Remove a node, stopping it first if needed
    fn remove(&self, id: &NodeId) -> impl Future<Output = RuntimeResult<()>> + Send;
}

/// Whether a runtime error message says a host port is taken
pub fn is_port_in_use(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("port is already allocated") || message.contains("address already in use")
}
