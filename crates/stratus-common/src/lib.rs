pub mod config;
pub mod error;
pub mod health;
pub mod node;
pub mod role;
pub mod state;
pub mod topology;

pub use config::{ControlConfig, ConvergencePolicy, ProbeTimeouts, WebPorts};
pub use error::{ControlError, ExecError, PreconditionError, TopologyError, TransitionError};
pub use health::{
    ClusterHealthReport, DiskUsage, FsckClass, FsckReport, HealthWarning, LayerHealth,
    LoadAverage, LogExcerpt, MemoryUsage, NodeHealthReport, ProbeDepth, ResourceSummary,
    SafemodeState, StorageSummary, WebEndpoint, WorkerEvidence,
};
pub use node::NodeId;
pub use role::{LayerSelection, Placement, ServiceLayer, ServiceRole};
pub use state::{LifecycleAction, ObservedLayerState};
pub use topology::ClusterTopology;

pub mod telemetry;
