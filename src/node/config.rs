//! Node identity, status and configuration

use crate::manifest::ApplicationSpec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Prefix of every node id and label key
pub const NODE_PREFIX: &str = "cluster-compose";

/// Marks containers owned by cluster-compose
pub const LABEL_MANAGED: &str = "io.cluster-compose.managed";
/// Application name
pub const LABEL_APPLICATION: &str = "io.cluster-compose.application";
/// Application namespace
pub const LABEL_NAMESPACE: &str = "io.cluster-compose.namespace";
/// Exposed service
pub const LABEL_SERVICE: &str = "io.cluster-compose.service";
/// Digest of the configuration the node was created from
pub const LABEL_CONFIG_HASH: &str = "io.cluster-compose.config-hash";

/// Deterministic node identifier, used as the container name
///
/// Derived from `namespace/name` only, so the same application always maps
/// to the same node and the runtime's name uniqueness acts as a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn for_application(spec: &ApplicationSpec) -> Self {
        Self(format!("{}.{}.{}", NODE_PREFIX, spec.namespace, spec.name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Node status as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// No node exists
    Absent,
    /// Node exists but is not serving yet
    Pending,
    /// Node is running
    Running,
    /// Node exists and is stopped
    Stopped,
    /// Node is being removed or was just removed
    Removed,
}

impl NodeStatus {
    /// Map a runtime container state (`docker inspect` `.State.Status`)
    pub fn from_runtime_state(state: &str) -> Self {
        match state {
            "running" => NodeStatus::Running,
            "created" | "restarting" | "paused" => NodeStatus::Pending,
            "exited" | "dead" => NodeStatus::Stopped,
            "removing" => NodeStatus::Removed,
            _ => NodeStatus::Pending,
        }
    }

    /// Whether a node in this status still exists in the runtime
    pub fn exists(self) -> bool {
        matches!(self, NodeStatus::Pending | NodeStatus::Running | NodeStatus::Stopped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Absent => write!(f, "absent"),
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Stopped => write!(f, "stopped"),
            NodeStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Everything the runtime needs to create one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: NodeId,
    pub application: String,
    pub namespace: String,
    pub service: String,
    pub image: String,
    /// Absolute host directory
    pub workdir: PathBuf,
    /// Mount target inside the node
    pub nodedir: PathBuf,
    pub port: u16,
    pub host_port: u16,
    /// Nodes run their own container runtime, so they need privileges
    pub privileged: bool,
}

impl NodeConfig {
    /// Build the node configuration for an application
    ///
    /// Relative work directories are made absolute against the current
    /// directory; bind mounts require absolute host paths.
    pub fn from_spec(spec: &ApplicationSpec) -> std::io::Result<Self> {
        Ok(Self {
            id: NodeId::for_application(spec),
            application: spec.name.clone(),
            namespace: spec.namespace.clone(),
            service: spec.service.clone(),
            image: spec.image.clone(),
            workdir: std::path::absolute(&spec.workdir)?,
            nodedir: spec.nodedir.clone(),
            port: spec.port,
            host_port: spec.host_port,
            privileged: true,
        })
    }

    /// Hex SHA-256 over every field that requires a recreate when changed
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let parts = [
            self.image.clone(),
            self.workdir.to_string_lossy().into_owned(),
            self.nodedir.to_string_lossy().into_owned(),
            self.service.clone(),
            self.port.to_string(),
            self.host_port.to_string(),
        ];
        for part in &parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Labels attached to the container
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_APPLICATION.to_string(), self.application.clone()),
            (LABEL_NAMESPACE.to_string(), self.namespace.clone()),
            (LABEL_SERVICE.to_string(), self.service.clone()),
            (LABEL_CONFIG_HASH.to_string(), self.config_hash()),
        ])
    }
}

/// What the runtime reports about one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Container name
    pub id: String,
    pub status: NodeStatus,
    /// Raw runtime state
    pub state: String,
    pub labels: BTreeMap<String, String>,
    /// Published host port, if any
    pub host_port: Option<u16>,
}

impl NodeRecord {
    pub fn config_hash(&self) -> Option<&str> {
        self.labels.get(LABEL_CONFIG_HASH).map(String::as_str)
    }

    /// Whether the node was created from a different configuration
    pub fn drifted_from(&self, desired: &NodeConfig) -> bool {
        self.config_hash() != Some(desired.config_hash().as_str())
    }
}
