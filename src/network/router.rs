//! Service routing
//!
//! Every exposed service is reachable as `{service}.127.0.0.1.xip.io` on the
//! host port its node publishes. The wildcard DNS name always resolves to
//! the loopback address, so no local DNS setup is needed.

use crate::error::PortConflictError;
use crate::manifest::{ApplicationSpec, ClusterManifest};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Domain appended to every service name
pub const HOST_SUFFIX: &str = "127.0.0.1.xip.io";

/// A node that is running and publishes a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningNode {
    pub application: String,
    pub namespace: String,
    pub service: String,
    /// Host port the node actually publishes
    pub host_port: u16,
}

impl RunningNode {
    /// A running node for `spec`, published on `host_port`
    pub fn new(spec: &ApplicationSpec, host_port: u16) -> Self {
        Self {
            application: spec.name.clone(),
            namespace: spec.namespace.clone(),
            service: spec.service.clone(),
            host_port,
        }
    }
}

/// Externally reachable address of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub application: String,
    pub namespace: String,
    pub service: String,
    pub hostname: String,
    pub port: u16,
}

impl ServiceEndpoint {
    /// `hostname:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.address())
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Computes service endpoints and catches host port clashes
pub struct ServiceRouter;

impl ServiceRouter {
    pub fn hostname(service: &str) -> String {
        format!("{}.{}", service, HOST_SUFFIX)
    }

    /// Reject manifests where two applications publish the same host port
    ///
    /// Runs before any node is created, so the outcome does not depend on
    /// which application would have been provisioned first.
    pub fn check_manifest(manifest: &ClusterManifest) -> Result<(), PortConflictError> {
        let mut claimed: HashMap<u16, &str> = HashMap::new();
        for app in manifest.applications() {
            if let Some(first) = claimed.insert(app.host_port, &app.name) {
                return Err(PortConflictError {
                    port: app.host_port,
                    first: first.to_string(),
                    second: app.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Endpoints for running nodes, in the order given
    pub fn resolve(nodes: &[RunningNode]) -> Result<Vec<ServiceEndpoint>, PortConflictError> {
        let mut claimed: HashMap<u16, &str> = HashMap::new();
        let mut endpoints = Vec::with_capacity(nodes.len());

        for node in nodes {
            if let Some(first) = claimed.insert(node.host_port, &node.application) {
                return Err(PortConflictError {
                    port: node.host_port,
                    first: first.to_string(),
                    second: node.application.clone(),
                });
            }

            endpoints.push(ServiceEndpoint {
                application: node.application.clone(),
                namespace: node.namespace.clone(),
                service: node.service.clone(),
                hostname: Self::hostname(&node.service),
                port: node.host_port,
            });
        }

        Ok(endpoints)
    }

    /// Pick the endpoint named by `selector` (`service` or `service.namespace`)
    pub fn highlight<'a>(endpoints: &'a [ServiceEndpoint], selector: &str) -> Option<&'a ServiceEndpoint> {
        endpoints
            .iter()
            .find(|e| format!("{}.{}", e.service, e.namespace) == selector)
            .or_else(|| endpoints.iter().find(|e| e.service == selector))
    }
}
