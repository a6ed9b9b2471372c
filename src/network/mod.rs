//! Service routing
//!
//! Maps running nodes to the hostnames and host ports their services are
//! reachable on.

pub mod router;

pub use router::{RunningNode, ServiceEndpoint, ServiceRouter, HOST_SUFFIX};
