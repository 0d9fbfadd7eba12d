use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stratus_common::{ExecError, NodeId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Last non-empty stderr line, for compact log messages.
    pub fn stderr_summary(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// Capability to run commands on cluster nodes. The transport is pluggable:
/// ssh in production, an in-memory simulation in tests.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Bounded-timeout network-layer probe.
    async fn is_reachable(&self, node: &NodeId) -> bool;

    /// Run `command` through the node's shell. A non-zero exit status is an
    /// `Ok` output; `Err` means the transport itself failed.
    async fn run_command(&self, node: &NodeId, command: &str) -> Result<CommandOutput, ExecError>;

    /// Run a layer control script. Scripts fan out to every worker themselves,
    /// so transports may allow them longer than an ordinary command.
    async fn run_script(&self, node: &NodeId, command: &str) -> Result<CommandOutput, ExecError> {
        self.run_command(node, command).await
    }

    /// Non-interactive authentication check.
    async fn check_trust(&self, node: &NodeId) -> Result<(), ExecError> {
        self.run_command(node, "true").await.map(|_| ())
    }
}
