//! Cluster phases and observed node state

use crate::manifest::ClusterManifest;
use crate::node::NodeStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Phase of the cluster as driven by one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterPhase {
    /// No application is running
    Down,
    /// `up` is converging nodes
    Initializing,
    /// Every application is running
    Up,
    /// Some applications are running, some failed
    PartiallyUp,
    /// No application could be started
    Error,
    /// `down` is stopping nodes
    Stopping,
    /// `clean` is stopping and removing nodes
    Cleaning,
}

impl ClusterPhase {
    /// Whether the controller may move from `self` to `next`
    pub fn can_transition_to(self, next: ClusterPhase) -> bool {
        use ClusterPhase::*;
        matches!(
            (self, next),
            (Down | Up | PartiallyUp | Error, Initializing)
                | (Initializing, Up | PartiallyUp | Error)
                | (Initializing | Up | PartiallyUp | Error, Stopping)
                | (Stopping, Down)
                | (_, Cleaning)
                | (Cleaning, Down)
        )
    }

    /// Phase after an `up` batch
    pub fn after_up(succeeded: usize, failed: usize) -> ClusterPhase {
        match (succeeded, failed) {
            (_, 0) => ClusterPhase::Up,
            (0, _) => ClusterPhase::Error,
            _ => ClusterPhase::PartiallyUp,
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterPhase::Down => write!(f, "down"),
            ClusterPhase::Initializing => write!(f, "initializing"),
            ClusterPhase::Up => write!(f, "up"),
            ClusterPhase::PartiallyUp => write!(f, "partially-up"),
            ClusterPhase::Error => write!(f, "error"),
            ClusterPhase::Stopping => write!(f, "stopping"),
            ClusterPhase::Cleaning => write!(f, "cleaning"),
        }
    }
}

/// Node status per application, rebuilt from the runtime each invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClusterState {
    nodes: BTreeMap<String, NodeStatus>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, application: &str, status: NodeStatus) {
        self.nodes.insert(application.to_string(), status);
    }

    /// Status of `application`; unknown applications are absent
    pub fn get(&self, application: &str) -> NodeStatus {
        self.nodes.get(application).copied().unwrap_or(NodeStatus::Absent)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|s| **s == status).count()
    }

    /// Phase implied by the node statuses of `manifest`
    pub fn phase(&self, manifest: &ClusterManifest) -> ClusterPhase {
        let running = manifest
            .applications()
            .iter()
            .filter(|a| self.get(&a.name) == NodeStatus::Running)
            .count();

        if running == 0 {
            ClusterPhase::Down
        } else if running == manifest.len() {
            ClusterPhase::Up
        } else {
            ClusterPhase::PartiallyUp
        }
    }

    /// Whether no node of `manifest` is running or about to run
    pub fn is_quiescent(&self, manifest: &ClusterManifest) -> bool {
        manifest
            .applications()
            .iter()
            .all(|a| !matches!(self.get(&a.name), NodeStatus::Running | NodeStatus::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ApplicationSpec;

    #[test]
    fn test_transitions() {
        use ClusterPhase::*;
        assert!(Down.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(PartiallyUp));
        assert!(PartiallyUp.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Down));
        assert!(Error.can_transition_to(Cleaning));
        assert!(Cleaning.can_transition_to(Down));

        assert!(!Down.can_transition_to(Up));
        assert!(!Stopping.can_transition_to(Up));
        assert!(!Down.can_transition_to(Stopping));
    }

    #[test]
    fn test_after_up() {
        assert_eq!(ClusterPhase::after_up(2, 0), ClusterPhase::Up);
        assert_eq!(ClusterPhase::after_up(1, 1), ClusterPhase::PartiallyUp);
        assert_eq!(ClusterPhase::after_up(0, 2), ClusterPhase::Error);
        assert_eq!(ClusterPhase::after_up(0, 0), ClusterPhase::Up);
    }

    #[test]
    fn test_phase_from_state() {
        let manifest = ClusterManifest::new(vec![
            ApplicationSpec::new("a", 1),
            ApplicationSpec::new("b", 2),
        ])
        .unwrap();

        let mut state = ClusterState::new();
        assert_eq!(state.phase(&manifest), ClusterPhase::Down);
        assert!(state.is_quiescent(&manifest));

        state.set("a", NodeStatus::Running);
        assert_eq!(state.phase(&manifest), ClusterPhase::PartiallyUp);
        assert!(!state.is_quiescent(&manifest));

        state.set("b", NodeStatus::Running);
        assert_eq!(state.phase(&manifest), ClusterPhase::Up);
        assert_eq!(state.count(NodeStatus::Running), 2);
    }
}
