use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{NodeId, ServiceLayer};

pub const INSTALL_ROOT_VAR: &str = "HADOOP_HOME";
pub const RUNTIME_HOME_VAR: &str = "JAVA_HOME";

/// Per-call bounds for node probes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub reachability: Duration,
    pub ssh_connect: Duration,
    pub command: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            reachability: Duration::from_secs(3),
            ssh_connect: Duration::from_secs(5),
            command: Duration::from_secs(60),
        }
    }
}

/// Poll schedule used to confirm a lifecycle transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvergencePolicy {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ConvergencePolicy {
    /// Delay before poll `attempt` (0-based): doubles from `initial_backoff`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebPorts {
    pub storage_master: u16,
    pub resource_master: u16,
    /// Contact the master web UIs during deep probes instead of only listing them.
    pub check: bool,
}

impl WebPorts {
    pub fn port(&self, layer: ServiceLayer) -> u16 {
        match layer {
            ServiceLayer::Storage => self.storage_master,
            ServiceLayer::Resource => self.resource_master,
        }
    }
}

impl Default for WebPorts {
    fn default() -> Self {
        Self {
            storage_master: 9870,
            resource_master: 8088,
            check: false,
        }
    }
}

/// Everything an invocation needs to know about its environment. Built once by
/// the precondition gate and passed by reference; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    pub operator: String,
    pub install_root: PathBuf,
    pub runtime_home: PathBuf,
    pub coordinator: NodeId,
    pub timeouts: ProbeTimeouts,
    pub probe_concurrency: usize,
    pub convergence: ConvergencePolicy,
    pub ssh_port: u16,
    pub ssh_user: Option<String>,
    pub web: WebPorts,
    pub log_tail_lines: usize,
    pub lock_path: PathBuf,
    pub lock_ttl: Duration,
}

impl ControlConfig {
    pub fn new(
        operator: impl Into<String>,
        install_root: impl Into<PathBuf>,
        runtime_home: impl Into<PathBuf>,
        coordinator: NodeId,
    ) -> Self {
        let install_root = install_root.into();
        let lock_path = install_root.join("run").join("stratus-control.lock");
        Self {
            operator: operator.into(),
            install_root,
            runtime_home: runtime_home.into(),
            coordinator,
            timeouts: ProbeTimeouts::default(),
            probe_concurrency: 8,
            convergence: ConvergencePolicy::default(),
            ssh_port: 22,
            ssh_user: None,
            web: WebPorts::default(),
            log_tail_lines: 20,
            lock_path,
            lock_ttl: Duration::from_secs(30 * 60),
        }
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.install_root.join("etc").join("hadoop")
    }

    /// Newline-delimited worker hostnames.
    pub fn worker_file(&self) -> PathBuf {
        self.conf_dir().join("workers")
    }

    pub fn storage_site_file(&self) -> PathBuf {
        self.conf_dir().join("hdfs-site.xml")
    }

    pub fn sbin(&self, script: &str) -> PathBuf {
        self.install_root.join("sbin").join(script)
    }

    pub fn bin(&self, tool: &str) -> PathBuf {
        self.install_root.join("bin").join(tool)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.install_root.join("logs")
    }

    /// Variables exported into every locally executed command.
    pub fn command_env(&self) -> Vec<(String, String)> {
        vec![
            (INSTALL_ROOT_VAR.to_string(), path_str(&self.install_root)),
            (RUNTIME_HOME_VAR.to_string(), path_str(&self.runtime_home)),
        ]
    }
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}
