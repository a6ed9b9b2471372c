//! Cluster manifests
//!
//! This module reads the declarative manifest that lists the applications
//! of a cluster and validates it into an ordered, typed model.

pub mod config;
pub mod parser;
pub mod template;

pub use config::{ApplicationSpec, ClusterManifest};
pub use parser::ManifestLoader;
pub use template::write_template;
