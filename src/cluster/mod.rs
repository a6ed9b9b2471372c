//! Cluster lifecycle
//!
//! This module drives every application of a manifest through `up`, `down`
//! and `clean`, and reports what each command did.

pub mod controller;
pub mod report;
pub mod signal;
pub mod state;

pub use controller::LifecycleController;
pub use report::{ApplicationOutcome, Command, CommandReport};
pub use signal::Interrupt;
pub use state::{ClusterPhase, ClusterState};
