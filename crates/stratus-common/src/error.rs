use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::{LifecycleAction, NodeId, ObservedLayerState, ServiceLayer};

/// Invocation environment is not fit to run; raised before any network action.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("must be run as '{expected}', invoked as '{actual}'")]
    WrongOperator { expected: String, actual: String },

    #[error("installation root {} does not exist or is not a directory", .path.display())]
    MissingInstallation { path: PathBuf },

    #[error("cannot resolve {var}: {reason}")]
    UnresolvedRuntime { var: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("worker list {} not found", .path.display())]
    Missing { path: PathBuf },

    #[error("failed to read worker list {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker list {} contains no workers", .path.display())]
    Empty { path: PathBuf },

    #[error("node '{node}' is not part of the cluster topology")]
    UnknownNode { node: NodeId },
}

/// Transport-level failure reported by a remote executor.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("node {node} is unreachable")]
    Unreachable { node: NodeId },

    #[error("node {node} rejected the ssh credential: {detail}")]
    AuthRejected { node: NodeId, detail: String },

    #[error("command on {node} timed out after {after:?}: {command}")]
    Timeout {
        node: NodeId,
        command: String,
        after: Duration,
    },

    #[error("failed to launch command for {node}: {source}")]
    Spawn {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },
}

/// Post-action verification did not observe the target state.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error(
        "{layer} {action} did not converge to {expected} within {waited:?} (last observed {last_observed})"
    )]
    Timeout {
        layer: ServiceLayer,
        action: LifecycleAction,
        expected: ObservedLayerState,
        last_observed: ObservedLayerState,
        waited: Duration,
    },

    #[error("{layer} {action} expected {expected} but observed {observed}")]
    Mismatch {
        layer: ServiceLayer,
        action: LifecycleAction,
        expected: ObservedLayerState,
        observed: ObservedLayerState,
    },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("coordinator {node} is unreachable")]
    UnreachableNode { node: NodeId },

    #[error("cannot determine {layer} master state on {node}: {detail}")]
    UnprobedMaster {
        layer: ServiceLayer,
        node: NodeId,
        detail: String,
    },

    #[error("ssh trust check failed for {node}: {detail}")]
    SshTrust { node: NodeId, detail: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("another control operation holds the cluster lock: {holder}")]
    Locked { holder: String },

    #[error("cluster lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ControlError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ControlError::Precondition(_) => 2,
            ControlError::Topology(_) => 3,
            ControlError::UnreachableNode { .. } | ControlError::UnprobedMaster { .. } => 4,
            ControlError::SshTrust { .. } => 5,
            ControlError::Transition(_) => 6,
            ControlError::Locked { .. } | ControlError::Lock { .. } => 7,
            ControlError::Exec(ExecError::Unreachable { .. }) => 4,
            ControlError::Exec(ExecError::AuthRejected { .. }) => 5,
            ControlError::Exec(_) => 1,
        }
    }
}
