use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};

use stratus_common::{
    ClusterHealthReport, ClusterTopology, ControlConfig, ControlError, HealthWarning,
    LayerSelection, LifecycleAction, ObservedLayerState, ServiceLayer, TransitionError,
};
use stratus_exec::RemoteExecutor;

use crate::lock::ControlLock;
use crate::prober::{ProbeRequest, Prober};
use crate::report::{diagnose, ensure_masters_probed, ReportMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionResult {
    Converged { polls: u32, elapsed: Duration },
    /// The layer was already in the target state; no command was issued.
    AlreadyInState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub layer: ServiceLayer,
    pub action: LifecycleAction,
    pub result: TransitionResult,
}

impl TransitionOutcome {
    pub fn was_noop(&self) -> bool {
        self.result == TransitionResult::AlreadyInState
    }
}

/// Starts, stops and verifies the cluster's service layers.
pub struct LifecycleController<'a> {
    config: &'a ControlConfig,
    topology: &'a ClusterTopology,
    exec: &'a dyn RemoteExecutor,
}

impl<'a> LifecycleController<'a> {
    pub fn new(
        config: &'a ControlConfig,
        topology: &'a ClusterTopology,
        exec: &'a dyn RemoteExecutor,
    ) -> Self {
        Self {
            config,
            topology,
            exec,
        }
    }

    pub async fn start(&self, layers: LayerSelection) -> Result<Vec<TransitionOutcome>, ControlError> {
        let _lock = ControlLock::acquire(self.config, "start")?;
        self.run(layers.start_order(), LifecycleAction::Start).await
    }

    pub async fn stop(&self, layers: LayerSelection) -> Result<Vec<TransitionOutcome>, ControlError> {
        let _lock = ControlLock::acquire(self.config, "stop")?;
        self.run(layers.stop_order(), LifecycleAction::Stop).await
    }

    /// Full stop of the selection followed by a full start.
    pub async fn restart(&self, layers: LayerSelection) -> Result<Vec<TransitionOutcome>, ControlError> {
        let _lock = ControlLock::acquire(self.config, "restart")?;
        let mut outcomes = self.run(layers.stop_order(), LifecycleAction::Stop).await?;
        outcomes.extend(self.run(layers.start_order(), LifecycleAction::Start).await?);
        Ok(outcomes)
    }

    /// Read-only; never takes the cluster lock.
    pub async fn status(&self, mode: &ReportMode) -> Result<ClusterHealthReport, ControlError> {
        diagnose(self.config, self.topology, self.exec, mode).await
    }

    async fn run(
        &self,
        layers: Vec<ServiceLayer>,
        action: LifecycleAction,
    ) -> Result<Vec<TransitionOutcome>, ControlError> {
        let mut outcomes = Vec::with_capacity(layers.len());
        for layer in layers {
            outcomes.push(self.transition(layer, action).await?);
        }
        Ok(outcomes)
    }

    async fn transition(
        &self,
        layer: ServiceLayer,
        action: LifecycleAction,
    ) -> Result<TransitionOutcome, ControlError> {
        let before = self.observe(layer).await?;
        let state = before.layer_state(layer);
        // Never mutate a layer whose current state cannot be read.
        if state == ObservedLayerState::Unknown {
            ensure_masters_probed(&before)?;
        }

        if state == action.target() {
            tracing::warn!(%layer, %action, %state, "layer already in target state, nothing to do");
            for warning in before.warnings() {
                if matches!(warning, HealthWarning::StrayWorkers { .. }) {
                    tracing::warn!(%layer, "{}", warning);
                }
            }
            return Ok(TransitionOutcome {
                layer,
                action,
                result: TransitionResult::AlreadyInState,
            });
        }

        let script = match action {
            LifecycleAction::Start => layer.start_script(),
            LifecycleAction::Stop => layer.stop_script(),
        };
        let command = self.config.sbin(script).to_string_lossy().into_owned();
        tracing::info!(%layer, %action, from = %state, %command, "issuing control script");

        let out = self
            .exec
            .run_script(self.topology.coordinator(), &command)
            .await?;
        if !out.success() {
            tracing::warn!(
                %layer,
                status = out.status,
                stderr = %out.stderr_summary(),
                "control script exited non-zero, verifying state anyway"
            );
        }

        let result = self.await_convergence(layer, action).await?;
        tracing::info!(%layer, %action, ?result, "transition complete");
        Ok(TransitionOutcome {
            layer,
            action,
            result,
        })
    }

    /// Roles-depth probe of one layer. Fails when state cannot be trusted.
    async fn observe(&self, layer: ServiceLayer) -> Result<ClusterHealthReport, ControlError> {
        let report = Prober::new(self.config, self.topology, self.exec)
            .probe(&ProbeRequest::roles(layer.into()))
            .await?;

        if !report.coordinator_reachable() {
            return Err(ControlError::UnreachableNode {
                node: self.topology.coordinator().clone(),
            });
        }
        if let Some(node) = report.per_node.iter().find(|r| r.reachable && !r.ssh_trusted) {
            return Err(ControlError::SshTrust {
                node: node.node.clone(),
                detail: node
                    .errors
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "authentication rejected".to_string()),
            });
        }
        for node in report.per_node.iter().filter(|r| !r.reachable) {
            tracing::warn!(node = %node.node, %layer, "worker unreachable");
        }
        Ok(report)
    }

    /// Poll until `layer` reaches the action's target state. Sleeps follow the
    /// configured backoff and never overshoot the deadline.
    async fn await_convergence(
        &self,
        layer: ServiceLayer,
        action: LifecycleAction,
    ) -> Result<TransitionResult, ControlError> {
        let policy = self.config.convergence;
        let expected = action.target();
        let started = Instant::now();
        let deadline = started + policy.timeout;
        let mut polls: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(policy.backoff(polls).min(remaining)).await;
            polls += 1;

            let observed = self.observe(layer).await?.layer_state(layer);
            if observed == expected {
                return Ok(TransitionResult::Converged {
                    polls,
                    elapsed: started.elapsed(),
                });
            }
            if observed == ObservedLayerState::Unknown {
                return Err(TransitionError::Mismatch {
                    layer,
                    action,
                    expected,
                    observed,
                }
                .into());
            }
            tracing::debug!(%layer, %observed, polls, "waiting for convergence");

            if Instant::now() >= deadline {
                return Err(TransitionError::Timeout {
                    layer,
                    action,
                    expected,
                    last_observed: observed,
                    waited: started.elapsed(),
                }
                .into());
            }
        }
    }
}
