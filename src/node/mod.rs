//! Node management module
//!
//! A node is one runtime container standing in for one application of the
//! manifest. This module names nodes, talks to the container runtime and
//! converges single nodes towards their spec.

pub mod config;
pub mod docker;
pub mod provisioner;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{NodeConfig, NodeId, NodeRecord, NodeStatus};
pub use docker::DockerCli;
pub use provisioner::NodeProvisioner;
pub use runtime::ContainerRuntime;
