use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NodeId, ObservedLayerState, ServiceLayer, ServiceRole};

/// How much work a probe performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeDepth {
    /// Coordinator only; worker counts come from the masters' own reports.
    Summary,
    /// Coordinator plus reachability, trust and role presence on every worker.
    Roles,
    /// `Roles` plus resource snapshots, log tails and native layer reports.
    Deep,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskUsage {
    pub mount: String,
    pub size_kb: u64,
    pub used_kb: u64,
    pub used_percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_mb: u64,
    pub used_mb: u64,
    pub available_mb: u64,
}

impl MemoryUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total_mb == 0 {
            return 0.0;
        }
        self.used_mb as f64 * 100.0 / self.total_mb as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogExcerpt {
    pub role: ServiceRole,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeHealthReport {
    pub node: NodeId,
    pub reachable: bool,
    pub ssh_trusted: bool,
    pub roles_present: BTreeMap<ServiceRole, bool>,

    #[serde(default)]
    pub disk: Option<DiskUsage>,
    #[serde(default)]
    pub memory: Option<MemoryUsage>,
    #[serde(default)]
    pub load: Option<LoadAverage>,
    #[serde(default)]
    pub log_tail: Vec<LogExcerpt>,

    /// Every failure hit while probing this node.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl NodeHealthReport {
    /// A report for a node that answered, with every expected role not yet seen.
    pub fn new(node: NodeId, roles: &[ServiceRole]) -> Self {
        Self {
            node,
            reachable: true,
            ssh_trusted: true,
            roles_present: roles.iter().map(|r| (*r, false)).collect(),
            disk: None,
            memory: None,
            load: None,
            log_tail: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn unreachable(node: NodeId, roles: &[ServiceRole]) -> Self {
        let mut report = Self::new(node, roles);
        report.reachable = false;
        report.ssh_trusted = false;
        report
    }

    pub fn untrusted(node: NodeId, roles: &[ServiceRole]) -> Self {
        let mut report = Self::new(node, roles);
        report.ssh_trusted = false;
        report
    }

    pub fn has_role(&self, role: ServiceRole) -> bool {
        self.roles_present.get(&role).copied().unwrap_or(false)
    }
}

/// Where a layer's live worker count came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEvidence {
    FanOut,
    MasterReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerHealth {
    pub layer: ServiceLayer,
    pub state: ObservedLayerState,
    pub master_present: Option<bool>,
    pub live_workers: usize,
    pub total_workers: usize,
    pub evidence: WorkerEvidence,
}

impl LayerHealth {
    /// Clamps `live_workers` to `total_workers` so the deficit stays in range.
    pub fn new(
        layer: ServiceLayer,
        master_present: Option<bool>,
        live_workers: usize,
        total_workers: usize,
        evidence: WorkerEvidence,
    ) -> Self {
        let live_workers = live_workers.min(total_workers);
        Self {
            layer,
            state: ObservedLayerState::classify(master_present, live_workers, total_workers),
            master_present,
            live_workers,
            total_workers,
            evidence,
        }
    }

    pub fn deficit(&self) -> usize {
        self.total_workers.saturating_sub(self.live_workers)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SafemodeState {
    On,
    Off,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FsckClass {
    Healthy,
    UnderReplicated,
    Corrupt,
    Unknown,
}

impl fmt::Display for FsckClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsckClass::Healthy => f.write_str("HEALTHY"),
            FsckClass::UnderReplicated => f.write_str("UNDER-REPLICATED"),
            FsckClass::Corrupt => f.write_str("CORRUPT"),
            FsckClass::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsckReport {
    pub class: FsckClass,
    pub under_replicated_blocks: Option<u64>,
    pub missing_blocks: Option<u64>,
}

/// Figures reported by the storage master itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSummary {
    pub live_datanodes: Option<usize>,
    pub dead_datanodes: Option<usize>,
    pub configured_capacity: Option<String>,
    pub dfs_used_percent: Option<f64>,
    pub safemode: SafemodeState,
    #[serde(default)]
    pub fsck: Option<FsckReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSummary {
    pub active_node_managers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebEndpoint {
    pub layer: ServiceLayer,
    pub url: String,
    /// `None` when the endpoint was only listed, not contacted.
    pub responding: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterHealthReport {
    pub generated_at: DateTime<Utc>,
    pub depth: ProbeDepth,
    pub coordinator: NodeHealthReport,
    /// Worker reports in topology order. Empty for summary probes.
    pub per_node: Vec<NodeHealthReport>,
    pub layers: BTreeMap<ServiceLayer, LayerHealth>,
    pub live_worker_count: usize,
    pub total_worker_count: usize,
    pub configured_replication: u32,
    #[serde(default)]
    pub storage: Option<StorageSummary>,
    #[serde(default)]
    pub resource: Option<ResourceSummary>,
    #[serde(default)]
    pub endpoints: Vec<WebEndpoint>,
}

impl ClusterHealthReport {
    pub fn deficit(&self) -> usize {
        self.total_worker_count.saturating_sub(self.live_worker_count)
    }

    pub fn layer_state(&self, layer: ServiceLayer) -> ObservedLayerState {
        self.layers
            .get(&layer)
            .map(|l| l.state)
            .unwrap_or(ObservedLayerState::Unknown)
    }

    pub fn node(&self, node: &NodeId) -> Option<&NodeHealthReport> {
        if &self.coordinator.node == node {
            return Some(&self.coordinator);
        }
        self.per_node.iter().find(|r| &r.node == node)
    }

    pub fn coordinator_reachable(&self) -> bool {
        self.coordinator.reachable
    }

    /// Degradations worth surfacing to the operator. None of these are fatal.
    pub fn warnings(&self) -> Vec<HealthWarning> {
        let mut out = Vec::new();

        for health in self.layers.values() {
            match health.state {
                ObservedLayerState::PartiallyRunning => out.push(HealthWarning::PartialCluster {
                    layer: health.layer,
                    live: health.live_workers,
                    total: health.total_workers,
                }),
                ObservedLayerState::Stopped if health.evidence == WorkerEvidence::FanOut => {
                    let stray = self
                        .per_node
                        .iter()
                        .filter(|r| r.has_role(health.layer.worker()))
                        .count();
                    if stray > 0 {
                        out.push(HealthWarning::StrayWorkers {
                            layer: health.layer,
                            nodes: stray,
                        });
                    }
                }
                _ => {}
            }
        }

        for report in std::iter::once(&self.coordinator).chain(self.per_node.iter()) {
            if !report.reachable {
                out.push(HealthWarning::UnreachableNode {
                    node: report.node.clone(),
                });
            } else if !report.ssh_trusted {
                out.push(HealthWarning::UntrustedNode {
                    node: report.node.clone(),
                });
            } else if !report.errors.is_empty() {
                out.push(HealthWarning::NodeErrors {
                    node: report.node.clone(),
                    count: report.errors.len(),
                });
            }
        }

        if let Some(storage) = &self.storage {
            if storage.safemode == SafemodeState::On {
                out.push(HealthWarning::Safemode);
            }
            if let Some(fsck) = &storage.fsck {
                if matches!(fsck.class, FsckClass::UnderReplicated | FsckClass::Corrupt) {
                    out.push(HealthWarning::FsckNotHealthy { class: fsck.class });
                }
            }
        }

        if let Some(storage) = self.layers.get(&ServiceLayer::Storage) {
            let replication = self.configured_replication as usize;
            if storage.state != ObservedLayerState::Stopped
                && storage.state != ObservedLayerState::Unknown
                && storage.live_workers < replication
            {
                out.push(HealthWarning::BelowReplication {
                    live: storage.live_workers,
                    replication: self.configured_replication,
                });
            }
        }

        for ep in &self.endpoints {
            if ep.responding == Some(false) {
                out.push(HealthWarning::EndpointDown {
                    url: ep.url.clone(),
                });
            }
        }

        out
    }
}

/// Non-fatal degradation found by a probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthWarning {
    PartialCluster {
        layer: ServiceLayer,
        live: usize,
        total: usize,
    },
    StrayWorkers {
        layer: ServiceLayer,
        nodes: usize,
    },
    UnreachableNode {
        node: NodeId,
    },
    UntrustedNode {
        node: NodeId,
    },
    NodeErrors {
        node: NodeId,
        count: usize,
    },
    Safemode,
    FsckNotHealthy {
        class: FsckClass,
    },
    BelowReplication {
        live: usize,
        replication: u32,
    },
    EndpointDown {
        url: String,
    },
}

impl fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthWarning::PartialCluster { layer, live, total } => write!(
                f,
                "{} layer partially running: {}/{} workers live (deficit {})",
                layer,
                live,
                total,
                total.saturating_sub(*live)
            ),
            HealthWarning::StrayWorkers { layer, nodes } => write!(
                f,
                "{} master is down but {} worker(s) still run the {} daemon",
                layer,
                nodes,
                layer.worker()
            ),
            HealthWarning::UnreachableNode { node } => write!(f, "node {} is unreachable", node),
            HealthWarning::UntrustedNode { node } => {
                write!(f, "node {} does not accept the ssh credential", node)
            }
            HealthWarning::NodeErrors { node, count } => {
                write!(f, "node {} reported {} probe error(s)", node, count)
            }
            HealthWarning::Safemode => f.write_str("storage layer is in safemode (read-only)"),
            HealthWarning::FsckNotHealthy { class } => {
                write!(f, "filesystem check reports {}", class)
            }
            HealthWarning::BelowReplication { live, replication } => write!(
                f,
                "only {} live storage worker(s) for replication factor {}",
                live, replication
            ),
            HealthWarning::EndpointDown { url } => write!(f, "web endpoint {} not responding", url),
        }
    }
}
