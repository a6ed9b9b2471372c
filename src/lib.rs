//! cluster-compose - declarative local Kubernetes clusters
//!
//! Reads a manifest of applications and runs one privileged Kubernetes node
//! container per application on the local container runtime. It provides:
//!
//! - Manifest loading and validation
//! - Idempotent node provisioning with config drift detection
//! - Concurrent `up`, `down` and `clean` over the whole manifest
//! - Service endpoint resolution
//! - Passthrough of runtime commands such as `images`

pub mod cluster;
pub mod config;
pub mod error;
pub mod manifest;
pub mod network;
pub mod node;
pub mod runtime;

pub use error::{ClusterError, Result};
