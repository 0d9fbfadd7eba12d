pub mod args;
pub mod gate;
pub mod lifecycle;
pub mod lock;
pub mod native;
pub mod prober;
pub mod report;
pub mod topology;

pub use args::CommonArgs;
pub use gate::{GateInputs, GateSettings, PreconditionGate, Tuning};
pub use lifecycle::{LifecycleController, TransitionOutcome, TransitionResult};
pub use lock::{ControlLock, LeaseRecord};
pub use prober::{ProbeRequest, Prober};
pub use report::{diagnose, ensure_masters_probed, render, ReportMode};
pub use topology::{parse_worker_list, resolve_topology};

use stratus_common::{ClusterTopology, ControlConfig, ControlError};

/// Run the precondition gate against the real process and resolve the
/// topology it points at. Nothing touches the network before this returns.
pub async fn prepare(settings: GateSettings) -> Result<(ControlConfig, ClusterTopology), ControlError> {
    let config = PreconditionGate::new(settings).check(&GateInputs::from_process())?;
    let topology = resolve_topology(&config).await?;
    tracing::info!(
        coordinator = %topology.coordinator(),
        workers = topology.worker_count(),
        replication = topology.configured_replication(),
        "cluster topology resolved"
    );
    Ok((config, topology))
}
