//! Cluster lifecycle controller

use super::report::{ApplicationOutcome, Command, CommandReport};
use super::signal::Interrupt;
use super::state::{ClusterPhase, ClusterState};
use crate::error::{PortConflictError, ProvisionError, Result};
use crate::manifest::{ApplicationSpec, ClusterManifest};
use crate::network::{RunningNode, ServiceEndpoint, ServiceRouter};
use crate::node::runtime::RuntimeResult;
use crate::node::{ContainerRuntime, NodeId, NodeProvisioner, NodeStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-node operation run over a batch of applications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Ensure,
    Stop,
    Remove,
}

impl Operation {
    async fn run<R: ContainerRuntime>(
        self,
        provisioner: &NodeProvisioner<R>,
        spec: &ApplicationSpec,
    ) -> RuntimeResult<NodeStatus> {
        match self {
            Operation::Ensure => provisioner.ensure(spec).await,
            Operation::Stop => provisioner.stop(spec).await,
            Operation::Remove => provisioner.remove(spec).await,
        }
    }
}

/// Drives a whole manifest through `up`, `down` and `clean`
///
/// Owns the observed [`ClusterState`] for the duration of one command. The
/// runtime remains the source of truth: state is re-read before and after
/// every batch.
pub struct LifecycleController<R> {
    provisioner: Arc<NodeProvisioner<R>>,
    parallelism: usize,
    interrupt: Interrupt,
    phase: ClusterPhase,
    state: ClusterState,
    host_ports: HashMap<String, u16>,
}

impl<R: ContainerRuntime> LifecycleController<R> {
    /// Create a controller running at most `parallelism` node operations at once
    pub fn new(runtime: Arc<R>, parallelism: usize) -> Self {
        Self {
            provisioner: Arc::new(NodeProvisioner::new(runtime)),
            parallelism: parallelism.max(1),
            interrupt: Interrupt::new(),
            phase: ClusterPhase::Down,
            state: ClusterState::new(),
            host_ports: HashMap::new(),
        }
    }

    /// Use `interrupt` to cut `up` short
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn phase(&self) -> ClusterPhase {
        self.phase
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    /// Bring every application up
    ///
    /// Failures of single applications are collected; the rest of the batch
    /// still converges. Only an unreachable runtime or a host port claimed
    /// twice aborts the command.
    pub async fn up(&mut self, manifest: &ClusterManifest) -> Result<CommandReport> {
        let started_at = Utc::now();
        self.provisioner.runtime().ping().await?;
        ServiceRouter::check_manifest(manifest)?;
        self.observe(manifest).await?;
        let before = self.state.clone();

        self.transition(ClusterPhase::Initializing);
        let outcomes = self
            .run_batch(manifest.applications(), Operation::Ensure, true)
            .await?;
        self.observe(manifest).await?;

        if self.interrupt.is_triggered() {
            // Unwind only what this invocation started.
            let started: Vec<ApplicationSpec> = outcomes
                .iter()
                .rev()
                .filter(|o| o.status == NodeStatus::Running && before.get(&o.application) != NodeStatus::Running)
                .filter_map(|o| manifest.get(&o.application).cloned())
                .collect();

            self.transition(ClusterPhase::Stopping);
            for outcome in self.run_batch(&started, Operation::Stop, false).await? {
                if let Some(e) = outcome.error {
                    tracing::warn!("Failed to stop {} after interrupt: {}", outcome.application, e);
                }
            }
            self.observe(manifest).await?;
            self.transition(ClusterPhase::Down);

            // Report where each node ended up, not where the batch left it.
            let outcomes = outcomes
                .into_iter()
                .map(|mut outcome| {
                    outcome.status = self.state.get(&outcome.application);
                    outcome
                })
                .collect();

            return Ok(self.report(Command::Up, outcomes, Vec::new(), true, started_at));
        }

        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        let phase = ClusterPhase::after_up(outcomes.len() - failed, failed);
        self.transition(phase);

        for outcome in outcomes.iter().filter(|o| o.is_failure()) {
            if let Some(e) = &outcome.error {
                tracing::warn!("Application {} failed: {}", outcome.application, e);
            }
        }

        let (endpoints, conflict) = match phase {
            ClusterPhase::Up | ClusterPhase::PartiallyUp => self.endpoints(manifest),
            _ => (Vec::new(), None),
        };

        let mut report = self.report(Command::Up, outcomes, endpoints, false, started_at);
        report.conflict = conflict;
        Ok(report)
    }

    /// Stop every application, last declared first
    pub async fn down(&mut self, manifest: &ClusterManifest) -> Result<CommandReport> {
        let started_at = Utc::now();
        self.provisioner.runtime().ping().await?;
        self.observe(manifest).await?;

        let reversed: Vec<ApplicationSpec> = manifest.applications().iter().rev().cloned().collect();

        if self.state.is_quiescent(manifest) {
            tracing::info!("Cluster is already down");
            self.phase = ClusterPhase::Down;
            let outcomes = reversed
                .iter()
                .map(|spec| ApplicationOutcome {
                    application: spec.name.clone(),
                    status: self.state.get(&spec.name),
                    error: None,
                })
                .collect();
            return Ok(self.report(Command::Down, outcomes, Vec::new(), false, started_at));
        }

        self.transition(ClusterPhase::Stopping);
        let outcomes = self.run_batch(&reversed, Operation::Stop, false).await?;
        for outcome in outcomes.iter().filter(|o| o.is_failure()) {
            if let Some(e) = &outcome.error {
                tracing::warn!("Failed to stop {}: {}", outcome.application, e);
            }
        }

        self.observe(manifest).await?;
        self.transition(ClusterPhase::Down);
        Ok(self.report(Command::Down, outcomes, Vec::new(), false, started_at))
    }

    /// Stop, then remove every node regardless of how stopping went
    pub async fn clean(&mut self, manifest: &ClusterManifest) -> Result<CommandReport> {
        let started_at = Utc::now();
        self.provisioner.runtime().ping().await?;
        self.observe(manifest).await?;

        let reversed: Vec<ApplicationSpec> = manifest.applications().iter().rev().cloned().collect();

        self.transition(ClusterPhase::Cleaning);
        for outcome in self.run_batch(&reversed, Operation::Stop, false).await? {
            if let Some(e) = outcome.error {
                tracing::warn!("Failed to stop {} (removing anyway): {}", outcome.application, e);
            }
        }

        let outcomes = self.run_batch(&reversed, Operation::Remove, false).await?;
        for outcome in outcomes.iter().filter(|o| o.is_failure()) {
            if let Some(e) = &outcome.error {
                tracing::warn!("Failed to remove {}: {}", outcome.application, e);
            }
        }

        self.observe(manifest).await?;
        self.transition(ClusterPhase::Down);
        Ok(self.report(Command::Clean, outcomes, Vec::new(), false, started_at))
    }

    /// Report what is running without changing anything
    pub async fn status(&mut self, manifest: &ClusterManifest) -> Result<CommandReport> {
        let started_at = Utc::now();
        self.provisioner.runtime().ping().await?;
        self.observe(manifest).await?;
        self.phase = self.state.phase(manifest);

        let outcomes = manifest
            .applications()
            .iter()
            .map(|spec| ApplicationOutcome {
                application: spec.name.clone(),
                status: self.state.get(&spec.name),
                error: None,
            })
            .collect();
        let (endpoints, conflict) = self.endpoints(manifest);

        let mut report = self.report(Command::Status, outcomes, endpoints, false, started_at);
        report.conflict = conflict;
        Ok(report)
    }

    /// Rebuild the cluster state from the runtime
    async fn observe(&mut self, manifest: &ClusterManifest) -> Result<()> {
        let records = self.provisioner.runtime().list_managed().await?;
        let mut by_id: HashMap<String, _> = records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut state = ClusterState::new();
        self.host_ports.clear();
        for spec in manifest.applications() {
            let id = NodeId::for_application(spec);
            match by_id.remove(id.as_str()) {
                Some(record) => {
                    state.set(&spec.name, record.status);
                    if let Some(port) = record.host_port {
                        self.host_ports.insert(spec.name.clone(), port);
                    }
                }
                None => state.set(&spec.name, NodeStatus::Absent),
            }
        }

        for orphan in by_id.keys() {
            tracing::debug!("Node {} is not part of this manifest", orphan);
        }

        self.state = state;
        Ok(())
    }

    /// Endpoints of every running node, in manifest order
    ///
    /// Running nodes that publish the same host port make every endpoint
    /// ambiguous; the conflict is returned instead.
    fn endpoints(&self, manifest: &ClusterManifest) -> (Vec<ServiceEndpoint>, Option<PortConflictError>) {
        let running: Vec<RunningNode> = manifest
            .applications()
            .iter()
            .filter(|spec| self.state.get(&spec.name) == NodeStatus::Running)
            .map(|spec| {
                let port = self.host_ports.get(&spec.name).copied().unwrap_or(spec.host_port);
                RunningNode::new(spec, port)
            })
            .collect();

        match ServiceRouter::resolve(&running) {
            Ok(endpoints) => (endpoints, None),
            Err(conflict) => {
                tracing::warn!("{}", conflict);
                (Vec::new(), Some(conflict))
            }
        }
    }

    /// Run `op` for every spec and collect the outcomes in the given order
    ///
    /// No failure cancels another application's operation. A fatal runtime
    /// error stops queued work from starting and is returned once every
    /// in-flight operation has settled.
    async fn run_batch(
        &self,
        specs: &[ApplicationSpec],
        op: Operation,
        interruptible: bool,
    ) -> Result<Vec<ApplicationOutcome>> {
        let results = if self.parallelism == 1 {
            self.run_sequential(specs, op, interruptible).await
        } else {
            self.run_parallel(specs, op, interruptible).await
        };

        if let Some(fatal) = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .find(|e| e.is_fatal())
        {
            return Err(fatal.clone().into());
        }

        Ok(specs
            .iter()
            .zip(results)
            .map(|(spec, result)| match result {
                Ok(status) => {
                    tracing::debug!("{} is {}", spec.name, status);
                    ApplicationOutcome {
                        application: spec.name.clone(),
                        status,
                        error: None,
                    }
                }
                Err(e) => ApplicationOutcome {
                    application: spec.name.clone(),
                    status: self.state.get(&spec.name),
                    error: Some(e),
                },
            })
            .collect())
    }

    /// One application at a time, strictly in the given order
    async fn run_sequential(
        &self,
        specs: &[ApplicationSpec],
        op: Operation,
        interruptible: bool,
    ) -> Vec<RuntimeResult<NodeStatus>> {
        let mut results = Vec::with_capacity(specs.len());
        let mut aborted = false;

        for spec in specs {
            if aborted || (interruptible && self.interrupt.is_triggered()) {
                results.push(Err(ProvisionError::Interrupted(spec.name.clone())));
                continue;
            }
            let result = op.run(&self.provisioner, spec).await;
            aborted = matches!(&result, Err(e) if e.is_fatal());
            results.push(result);
        }

        results
    }

    /// A worker pool of `parallelism` slots over the whole batch
    async fn run_parallel(
        &self,
        specs: &[ApplicationSpec],
        op: Operation,
        interruptible: bool,
    ) -> Vec<RuntimeResult<NodeStatus>> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for (idx, spec) in specs.iter().cloned().enumerate() {
            let provisioner = Arc::clone(&self.provisioner);
            let semaphore = Arc::clone(&semaphore);
            let aborted = Arc::clone(&aborted);
            let interrupt = interruptible.then(|| self.interrupt.clone());

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let interrupted = interrupt.map(|i| i.is_triggered()).unwrap_or(false);
                if interrupted || aborted.load(Ordering::SeqCst) {
                    return (idx, Err(ProvisionError::Interrupted(spec.name.clone())));
                }

                let result = op.run(&provisioner, &spec).await;
                if matches!(&result, Err(e) if e.is_fatal()) {
                    aborted.store(true, Ordering::SeqCst);
                }
                (idx, result)
            });
        }

        let mut slots: Vec<Option<RuntimeResult<NodeStatus>>> = (0..specs.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => tracing::error!("Node operation task failed: {}", e),
            }
        }

        specs
            .iter()
            .zip(slots)
            .map(|(spec, slot)| {
                slot.unwrap_or_else(|| {
                    Err(ProvisionError::Command {
                        node: NodeId::for_application(spec).to_string(),
                        action: "provision".to_string(),
                        message: "worker task panicked".to_string(),
                    })
                })
            })
            .collect()
    }

    fn transition(&mut self, next: ClusterPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::error!("Unexpected cluster transition {} -> {}", self.phase, next);
        }
        tracing::info!("Cluster {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn report(
        &self,
        command: Command,
        outcomes: Vec<ApplicationOutcome>,
        endpoints: Vec<ServiceEndpoint>,
        interrupted: bool,
        started_at: chrono::DateTime<Utc>,
    ) -> CommandReport {
        CommandReport {
            command,
            phase: self.phase,
            outcomes,
            endpoints,
            conflict: None,
            state: self.state.clone(),
            interrupted,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
