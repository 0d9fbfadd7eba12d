use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use stratus_common::{NodeId, ProbeTimeouts, WebPorts};

use crate::gate::{GateSettings, Tuning};

/// Options shared by every stratus command line tool.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Account the cluster services run as.
    #[arg(long, env = "STRATUS_OPERATOR", default_value = "hadoop")]
    pub operator: String,

    /// Skip the operator identity check. Meant for throwaway test clusters.
    #[arg(long, default_value_t = false)]
    pub allow_any_operator: bool,

    /// Installation root; `HADOOP_HOME` takes precedence when set.
    #[arg(long)]
    pub install_root: Option<PathBuf>,

    /// Runtime home; `JAVA_HOME` takes precedence when set.
    #[arg(long)]
    pub runtime_home: Option<PathBuf>,

    /// Host running the masters. Defaults to this machine's hostname.
    #[arg(long, env = "STRATUS_COORDINATOR")]
    pub coordinator: Option<String>,

    #[arg(long, env = "STRATUS_SSH_USER")]
    pub ssh_user: Option<String>,

    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,

    #[arg(long, default_value_t = 3)]
    pub reachability_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub ssh_connect_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub command_timeout_secs: u64,

    /// Maximum number of nodes probed at once.
    #[arg(long, env = "STRATUS_PROBE_CONCURRENCY", default_value_t = 8)]
    pub probe_concurrency: usize,

    #[arg(long, default_value_t = 20)]
    pub log_tail_lines: usize,

    #[arg(long, default_value_t = 9870)]
    pub storage_web_port: u16,

    #[arg(long, default_value_t = 8088)]
    pub resource_web_port: u16,

    /// Only list the master web UIs instead of contacting them.
    #[arg(long, default_value_t = false)]
    pub skip_web_check: bool,

    /// OTLP/HTTP traces endpoint, e.g. http://127.0.0.1:4318/v1/traces.
    #[arg(long, env = "STRATUS_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "STRATUS_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}

impl CommonArgs {
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            operator: self.operator.clone(),
            allow_any_operator: self.allow_any_operator,
            install_root: self.install_root.clone(),
            runtime_home: self.runtime_home.clone(),
            coordinator: self.coordinator.as_deref().map(NodeId::new),
            tuning: Tuning {
                timeouts: ProbeTimeouts {
                    reachability: Duration::from_secs(self.reachability_timeout_secs),
                    ssh_connect: Duration::from_secs(self.ssh_connect_timeout_secs),
                    command: Duration::from_secs(self.command_timeout_secs),
                },
                probe_concurrency: self.probe_concurrency,
                ssh_port: self.ssh_port,
                ssh_user: self.ssh_user.clone(),
                web: WebPorts {
                    storage_master: self.storage_web_port,
                    resource_master: self.resource_web_port,
                    check: !self.skip_web_check,
                },
                log_tail_lines: self.log_tail_lines,
                ..Default::default()
            },
        }
    }
}
