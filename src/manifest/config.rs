//! Cluster manifest types

use crate::config::{DEFAULT_IMAGE, DEFAULT_NODEDIR};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Default namespace for applications that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Manifest file as written on disk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestFile {
    /// Applications, in declaration order
    #[serde(default)]
    pub applications: Vec<RawApplication>,
}

/// One application entry before validation
///
/// Ports are kept as raw YAML values so a malformed port becomes a
/// validation issue next to every other one instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawApplication {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub nodedir: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub port: Option<serde_yaml::Value>,
    #[serde(default)]
    pub host_port: Option<serde_yaml::Value>,
    #[serde(default)]
    pub image: Option<String>,
    /// Keys we do not understand
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

/// A validated application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSpec {
    /// Unique application name
    pub name: String,
    /// Logical grouping
    pub namespace: String,
    /// Host directory bind-mounted into the node
    pub workdir: PathBuf,
    /// Mount target inside the node (absolute)
    pub nodedir: PathBuf,
    /// Service name used for routing
    pub service: String,
    /// Container port the service listens on
    pub port: u16,
    /// Host port the container port is published on
    pub host_port: u16,
    /// Node image
    pub image: String,
}

impl ApplicationSpec {
    /// Create an application with default settings
    pub fn new(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            workdir: PathBuf::from("."),
            nodedir: PathBuf::from(DEFAULT_NODEDIR),
            service: name.to_string(),
            port,
            host_port: port,
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    /// Set namespace
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set service name
    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    /// Set published host port
    pub fn host_port(mut self, port: u16) -> Self {
        self.host_port = port;
        self
    }

    /// Set host work directory
    pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workdir = dir.as_ref().to_path_buf();
        self
    }

    /// Set node directory
    pub fn nodedir(mut self, dir: impl AsRef<Path>) -> Self {
        self.nodedir = dir.as_ref().to_path_buf();
        self
    }

    /// Set image
    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    /// `namespace/name`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// An ordered, validated set of applications
///
/// Declaration order is the `up` order; `down` walks it backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterManifest {
    applications: Vec<ApplicationSpec>,
    #[serde(skip)]
    sources: Vec<PathBuf>,
}

impl ClusterManifest {
    /// Build a manifest, rejecting duplicate names
    pub fn new(applications: Vec<ApplicationSpec>) -> Result<Self, ValidationError> {
        let mut err = ValidationError::new();
        let mut seen = HashSet::new();
        for (idx, app) in applications.iter().enumerate() {
            if !seen.insert(app.name.as_str()) {
                err.push(
                    format!("applications[{}].name", idx),
                    format!("duplicate application name '{}'", app.name),
                );
            }
        }
        err.into_result()?;

        Ok(Self {
            applications,
            sources: Vec::new(),
        })
    }

    pub(crate) fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    /// Applications in declaration order
    pub fn applications(&self) -> &[ApplicationSpec] {
        &self.applications
    }

    /// Files this manifest was read from
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Look up an application by name
    pub fn get(&self, name: &str) -> Option<&ApplicationSpec> {
        self.applications.iter().find(|a| a.name == name)
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_rejects_duplicates() {
        let result = ClusterManifest::new(vec![
            ApplicationSpec::new("web", 8080),
            ApplicationSpec::new("api", 8081),
            ApplicationSpec::new("web", 8082),
        ]);

        let err = result.unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].location, "applications[2].name");
        assert!(err.issues[0].message.contains("web"));
    }

    #[test]
    fn test_manifest_keeps_declaration_order() {
        let manifest = ClusterManifest::new(vec![
            ApplicationSpec::new("zeta", 1),
            ApplicationSpec::new("alpha", 2),
        ])
        .unwrap();

        let names: Vec<_> = manifest.applications().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha"]);
        assert_eq!(manifest.get("alpha").unwrap().port, 2);
    }

    #[test]
    fn test_application_defaults() {
        let app = ApplicationSpec::new("dashboard", 80).namespace("kube-system");
        assert_eq!(app.service, "dashboard");
        assert_eq!(app.host_port, 80);
        assert_eq!(app.qualified_name(), "kube-system/dashboard");
    }
}
