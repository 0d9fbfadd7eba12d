use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use stratus_common::{ConvergencePolicy, LayerSelection};
use stratus_control::{CommonArgs, GateSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Start,
    Restart,
    Stop,
    Status,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Restart => "restart",
            Action::Stop => "stop",
            Action::Status => "status",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Parser)]
#[command(name = "stratus-service")]
#[command(about = "Start, stop, restart or inspect the cluster's service layers", long_about = None)]
pub struct Args {
    /// Layers to act on: all, storage or resource.
    #[arg(long, default_value = "all")]
    pub layer: LayerSelection,

    #[arg(long, value_enum, default_value_t = Action::Start)]
    pub action: Action,

    /// Print the status report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Give up waiting for a layer to settle after this long.
    #[arg(long, env = "STRATUS_CONVERGE_TIMEOUT_SECS", default_value_t = 120)]
    pub converge_timeout_secs: u64,

    #[arg(long, default_value_t = 2_000)]
    pub initial_backoff_ms: u64,

    #[arg(long, default_value_t = 15_000)]
    pub max_backoff_ms: u64,

    /// Lease file guarding mutating actions. Defaults to <install-root>/run/stratus-control.lock.
    #[arg(long, env = "STRATUS_LOCK_PATH")]
    pub lock_path: Option<PathBuf>,

    /// Age after which another invocation's lease is considered abandoned.
    #[arg(long, default_value_t = 1_800)]
    pub lock_ttl_secs: u64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Args {
    pub fn gate_settings(&self) -> GateSettings {
        let mut settings = self.common.gate_settings();
        settings.tuning.convergence = ConvergencePolicy {
            timeout: Duration::from_secs(self.converge_timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        };
        settings.tuning.lock_path = self.lock_path.clone();
        settings.tuning.lock_ttl = Duration::from_secs(self.lock_ttl_secs);
        settings
    }
}
