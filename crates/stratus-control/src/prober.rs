use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};

use stratus_common::{
    ClusterHealthReport, ClusterTopology, ControlConfig, ControlError, ExecError, LayerHealth,
    LayerSelection, LogExcerpt, NodeHealthReport, NodeId, ProbeDepth, ResourceSummary,
    SafemodeState, ServiceLayer, ServiceRole, StorageSummary, TopologyError, WebEndpoint,
    WorkerEvidence,
};
use stratus_exec::RemoteExecutor;

use crate::native::{self, NativeCommands};

const WEB_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub depth: ProbeDepth,
    pub layers: LayerSelection,
    /// Restrict the probe to one node of the topology.
    pub node: Option<NodeId>,
}

impl ProbeRequest {
    pub fn summary() -> Self {
        Self {
            depth: ProbeDepth::Summary,
            layers: LayerSelection::All,
            node: None,
        }
    }

    pub fn roles(layers: LayerSelection) -> Self {
        Self {
            depth: ProbeDepth::Roles,
            layers,
            node: None,
        }
    }

    pub fn deep(layers: LayerSelection) -> Self {
        Self {
            depth: ProbeDepth::Deep,
            layers,
            node: None,
        }
    }

    pub fn node(node: NodeId) -> Self {
        Self {
            depth: ProbeDepth::Deep,
            layers: LayerSelection::All,
            node: Some(node),
        }
    }

    fn fans_out(&self) -> bool {
        self.depth != ProbeDepth::Summary && self.node.is_none()
    }
}

struct NodeProbe {
    report: NodeHealthReport,
    /// Whether the process listing succeeded, i.e. role flags are facts.
    listed: bool,
}

/// Observes cluster state without changing it.
pub struct Prober<'a> {
    config: &'a ControlConfig,
    topology: &'a ClusterTopology,
    exec: &'a dyn RemoteExecutor,
}

impl<'a> Prober<'a> {
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

    pub async fn probe(&self, req: &ProbeRequest) -> Result<ClusterHealthReport, ControlError> {
        if let Some(target) = &req.node {
            if !self.topology.contains(target) {
                return Err(TopologyError::UnknownNode {
                    node: target.clone(),
                }
                .into());
            }
        }

        let layers = req.layers.start_order();
        let coordinator = self.topology.coordinator();
        let deep = req.depth == ProbeDepth::Deep;

        let mut coord_roles: Vec<ServiceRole> = layers.iter().map(|l| l.master()).collect();
        if self.topology.is_worker(coordinator) {
            coord_roles.extend(layers.iter().map(|l| l.worker()));
        }
        let coord_deep = deep && req.node.as_ref().map_or(true, |n| n == coordinator);
        let coord = self.probe_node(coordinator, &coord_roles, coord_deep).await;

        let worker_roles: Vec<ServiceRole> = layers.iter().map(|l| l.worker()).collect();
        let targets: Vec<(usize, &NodeId)> = match &req.node {
            Some(n) if n != coordinator => vec![(0, n)],
            Some(_) => Vec::new(),
            None if req.depth == ProbeDepth::Summary => Vec::new(),
            None => self
                .topology
                .workers()
                .iter()
                .filter(|w| *w != coordinator)
                .enumerate()
                .collect(),
        };
        let per_node = self.fan_out(targets, &worker_roles, deep).await;

        let master_present = |layer: ServiceLayer| -> Option<bool> {
            if coord.listed {
                Some(coord.report.has_role(layer.master()))
            } else {
                None
            }
        };

        let mut coord_report = coord.report.clone();
        let mut storage = None;
        let mut resource = None;
        if req.depth != ProbeDepth::Roles {
            for layer in &layers {
                if master_present(*layer) != Some(true) {
                    continue;
                }
                match layer {
                    ServiceLayer::Storage => {
                        let with_fsck = deep && req.node.is_none();
                        storage = Some(self.storage_summary(with_fsck, &mut coord_report).await);
                    }
                    ServiceLayer::Resource => {
                        resource = Some(self.resource_summary(&mut coord_report).await);
                    }
                }
            }
        }

        let total = self.topology.worker_count();
        let mut layer_health = BTreeMap::new();
        for layer in &layers {
            let health = if req.fans_out() {
                let live = self.workers_with(&coord_report, &per_node, &[layer.worker()]);
                LayerHealth::new(*layer, master_present(*layer), live, total, WorkerEvidence::FanOut)
            } else {
                let live = match layer {
                    ServiceLayer::Storage => storage.as_ref().and_then(|s| s.live_datanodes),
                    ServiceLayer::Resource => resource.as_ref().and_then(|r| r.active_node_managers),
                }
                .unwrap_or(0);
                LayerHealth::new(*layer, master_present(*layer), live, total, WorkerEvidence::MasterReport)
            };
            layer_health.insert(*layer, health);
        }

        let live_worker_count = if req.fans_out() {
            self.workers_with(&coord_report, &per_node, &worker_roles)
        } else {
            layer_health
                .values()
                .map(|h| h.live_workers)
                .min()
                .unwrap_or(0)
        };

        let endpoints = if req.depth == ProbeDepth::Roles {
            Vec::new()
        } else {
            self.endpoints(&layers, deep).await
        };

        Ok(ClusterHealthReport {
            generated_at: Utc::now(),
            depth: req.depth,
            coordinator: coord_report,
            per_node,
            layers: layer_health,
            live_worker_count: live_worker_count.min(total),
            total_worker_count: total,
            configured_replication: self.topology.configured_replication(),
            storage,
            resource,
            endpoints,
        })
    }

    async fn fan_out(
        &self,
        targets: Vec<(usize, &NodeId)>,
        roles: &[ServiceRole],
        deep: bool,
    ) -> Vec<NodeHealthReport> {
        let mut results: Vec<(usize, NodeHealthReport)> = stream::iter(targets)
            .map(|(idx, node)| async move { (idx, self.probe_node(node, roles, deep).await.report) })
            .buffer_unordered(self.config.probe_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, report)| report).collect()
    }

    /// Workers (the coordinator included when it is also listed as one) running
    /// every role in `roles`.
    fn workers_with(
        &self,
        coordinator: &NodeHealthReport,
        per_node: &[NodeHealthReport],
        roles: &[ServiceRole],
    ) -> usize {
        let coord_counts = self.topology.is_worker(&coordinator.node)
            && roles.iter().all(|r| coordinator.has_role(*r));
        let workers = per_node
            .iter()
            .filter(|r| roles.iter().all(|role| r.has_role(*role)))
            .count();
        workers + usize::from(coord_counts)
    }

    async fn probe_node(&self, node: &NodeId, roles: &[ServiceRole], deep: bool) -> NodeProbe {
        if !self.exec.is_reachable(node).await {
            tracing::warn!(%node, "node unreachable");
            let mut report = NodeHealthReport::unreachable(node.clone(), roles);
            report.errors.push(format!("{} is unreachable", node));
            return NodeProbe {
                report,
                listed: false,
            };
        }

        if node != self.topology.coordinator() {
            if let Err(e) = self.exec.check_trust(node).await {
                tracing::warn!(%node, error = %e, "ssh trust check failed");
                let mut report = match e {
                    ExecError::Unreachable { .. } => NodeHealthReport::unreachable(node.clone(), roles),
                    _ => NodeHealthReport::untrusted(node.clone(), roles),
                };
                report.errors.push(e.to_string());
                return NodeProbe {
                    report,
                    listed: false,
                };
            }
        }

        let mut report = NodeHealthReport::new(node.clone(), roles);
        let mut listed = false;
        match self.exec.run_command(node, native::PROCESS_LISTING).await {
            Ok(out) if out.success() => {
                for role in roles {
                    report.roles_present.insert(*role, role.present_in(&out.stdout));
                }
                listed = true;
            }
            Ok(out) => report.errors.push(format!(
                "process listing exited {}: {}",
                out.status,
                out.stderr_summary()
            )),
            Err(e) => report.errors.push(e.to_string()),
        }
        tracing::debug!(%node, roles = ?report.roles_present, "roles probed");

        if deep {
            self.snapshot(node, roles, &mut report).await;
        }
        NodeProbe { report, listed }
    }

    /// Disk, memory, load and log tails. Failures land in `report.errors`.
    async fn snapshot(&self, node: &NodeId, roles: &[ServiceRole], report: &mut NodeHealthReport) {
        let cmds = NativeCommands::new(self.config);

        if let Some(out) = self.run_recorded(node, &cmds.disk(), report).await {
            report.disk = native::parse_df(&out);
            if report.disk.is_none() {
                report.errors.push("unparsable disk usage".to_string());
            }
        }
        if let Some(out) = self.run_recorded(node, native::MEMORY, report).await {
            report.memory = native::parse_free(&out);
            if report.memory.is_none() {
                report.errors.push("unparsable memory usage".to_string());
            }
        }
        if let Some(out) = self.run_recorded(node, native::LOAD, report).await {
            report.load = native::parse_loadavg(&out);
        }

        for role in roles {
            match self.exec.run_command(node, &cmds.log_tail(*role)).await {
                Ok(out) if out.success() => report.log_tail.push(LogExcerpt {
                    role: *role,
                    lines: out.stdout.lines().map(str::to_string).collect(),
                }),
                // No log for a daemon that is not running is expected.
                Ok(_) if !report.has_role(*role) => {}
                Ok(out) => report
                    .errors
                    .push(format!("no {} log: {}", role, out.stderr_summary())),
                Err(e) => report.errors.push(e.to_string()),
            }
        }
    }

    /// Stdout of a successful command, or `None` with the failure recorded.
    async fn run_recorded(
        &self,
        node: &NodeId,
        command: &str,
        report: &mut NodeHealthReport,
    ) -> Option<String> {
        match self.exec.run_command(node, command).await {
            Ok(out) if out.success() => Some(out.stdout),
            Ok(out) => {
                report.errors.push(format!(
                    "`{}` exited {}: {}",
                    command,
                    out.status,
                    out.stderr_summary()
                ));
                None
            }
            Err(e) => {
                report.errors.push(e.to_string());
                None
            }
        }
    }

    async fn storage_summary(&self, with_fsck: bool, coord: &mut NodeHealthReport) -> StorageSummary {
        let cmds = NativeCommands::new(self.config);
        let node = self.topology.coordinator();

        let report = self
            .run_recorded(node, &cmds.storage_report(), coord)
            .await
            .map(|out| native::parse_storage_report(&out))
            .unwrap_or_default();
        let safemode = self
            .run_recorded(node, &cmds.safemode(), coord)
            .await
            .map(|out| native::parse_safemode(&out))
            .unwrap_or(SafemodeState::Unknown);
        let fsck = if with_fsck {
            // fsck exits non-zero on a corrupt filesystem but still prints the verdict.
            match self.exec.run_command(node, &cmds.fsck()).await {
                Ok(out) => Some(native::parse_fsck(&out.stdout)),
                Err(e) => {
                    coord.errors.push(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        StorageSummary {
            live_datanodes: report.live_datanodes,
            dead_datanodes: report.dead_datanodes,
            configured_capacity: report.configured_capacity,
            dfs_used_percent: report.dfs_used_percent,
            safemode,
            fsck,
        }
    }

    async fn resource_summary(&self, coord: &mut NodeHealthReport) -> ResourceSummary {
        let cmds = NativeCommands::new(self.config);
        let active_node_managers = self
            .run_recorded(self.topology.coordinator(), &cmds.node_list(), coord)
            .await
            .and_then(|out| native::parse_node_list(&out));
        ResourceSummary {
            active_node_managers,
        }
    }

    async fn endpoints(&self, layers: &[ServiceLayer], deep: bool) -> Vec<WebEndpoint> {
        let check = deep && self.config.web.check;
        let http = if check {
            match reqwest::Client::builder()
                .connect_timeout(WEB_CHECK_TIMEOUT)
                .timeout(WEB_CHECK_TIMEOUT)
                .build()
            {
                Ok(http) => Some(http),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot build http client, skipping web checks");
                    None
                }
            }
        } else {
            None
        };

        let mut out = Vec::new();
        for layer in layers {
            let url = format!(
                "http://{}:{}",
                self.topology.coordinator(),
                self.config.web.port(*layer)
            );
            let responding = match &http {
                Some(http) => Some(match http.get(&url).send().await {
                    Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
                    Err(e) => {
                        tracing::debug!(%url, error = %e, "web endpoint not responding");
                        false
                    }
                }),
                None => None,
            };
            out.push(WebEndpoint {
                layer: *layer,
                url,
                responding,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::ObservedLayerState;
    use stratus_exec::MemoryExecutor;

    fn make_cluster(workers: &[&str]) -> (ControlConfig, ClusterTopology, MemoryExecutor) {
        let cfg = ControlConfig::new("hadoop", "/opt/hadoop", "/opt/java", "nn".into());
        let topo = ClusterTopology::new(
            "nn".into(),
            workers.iter().map(|w| NodeId::from(*w)).collect(),
            2,
        );
        let exec = MemoryExecutor::from_topology(&topo);
        (cfg, topo, exec)
    }

    #[tokio::test]
    async fn test_roles_probe_fans_out_in_topology_order() {
        let (mut cfg, topo, exec) = make_cluster(&["w3", "w1", "w2"]);
        cfg.probe_concurrency = 2;
        exec.run_layer(ServiceLayer::Storage);

        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&ProbeRequest::roles(LayerSelection::Storage))
            .await
            .unwrap();
        let order: Vec<&str> = report.per_node.iter().map(|r| r.node.as_str()).collect();
        assert_eq!(order, vec!["w3", "w1", "w2"]);
        assert_eq!(report.layer_state(ServiceLayer::Storage), ObservedLayerState::Running);
        assert!(!report.layers.contains_key(&ServiceLayer::Resource));
        assert!(report.storage.is_none());
        assert!(exec.commands_matching("dfsadmin").is_empty());
    }

    #[tokio::test]
    async fn test_summary_uses_master_reports() {
        let (cfg, topo, exec) = make_cluster(&["w1", "w2"]);
        exec.run_layer(ServiceLayer::Storage);
        exec.run_layer(ServiceLayer::Resource);
        exec.set_role(&"w2".into(), ServiceRole::ResourceWorker, false);

        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&ProbeRequest::summary())
            .await
            .unwrap();
        assert!(report.per_node.is_empty());
        assert_eq!(report.layers[&ServiceLayer::Storage].evidence, WorkerEvidence::MasterReport);
        assert_eq!(report.layer_state(ServiceLayer::Resource), ObservedLayerState::PartiallyRunning);
        assert_eq!(report.live_worker_count, 1);
        assert_eq!(report.storage.as_ref().unwrap().safemode, SafemodeState::Off);
        assert!(report.endpoints.iter().all(|e| e.responding.is_none()));
        assert!(exec.history().iter().all(|c| c.node.as_str() == "nn"));
    }

    #[tokio::test]
    async fn test_untrusted_worker_is_recorded_not_fatal() {
        let (cfg, topo, exec) = make_cluster(&["w1", "w2"]);
        exec.run_layer(ServiceLayer::Storage);
        exec.set_trusted(&"w2".into(), false);

        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&ProbeRequest::roles(LayerSelection::Storage))
            .await
            .unwrap();
        let w2 = report.node(&"w2".into()).unwrap();
        assert!(w2.reachable);
        assert!(!w2.ssh_trusted);
        assert!(!w2.has_role(ServiceRole::StorageWorker));
        assert_eq!(w2.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_deep_probe_collects_snapshots() {
        let (cfg, topo, exec) = make_cluster(&["w1"]);
        exec.run_layer(ServiceLayer::Storage);
        exec.set_fsck_status("CORRUPT");

        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&ProbeRequest::deep(LayerSelection::Storage))
            .await
            .unwrap();
        let w1 = &report.per_node[0];
        assert_eq!(w1.disk.as_ref().map(|d| d.used_percent), Some(32));
        assert_eq!(w1.memory.as_ref().map(|m| m.total_mb), Some(7962));
        assert!(w1.load.is_some());
        assert_eq!(w1.log_tail.len(), 1);
        assert_eq!(
            report.storage.as_ref().and_then(|s| s.fsck.as_ref()).map(|f| f.class),
            Some(stratus_common::FsckClass::Corrupt)
        );
    }

    #[tokio::test]
    async fn test_single_node_probe() {
        let (cfg, topo, exec) = make_cluster(&["w1", "w2"]);
        exec.run_layer(ServiceLayer::Storage);
        exec.run_layer(ServiceLayer::Resource);

        let prober = Prober::new(&cfg, &topo, &exec);
        let report = prober.probe(&ProbeRequest::node("w2".into())).await.unwrap();
        assert_eq!(report.per_node.len(), 1);
        assert_eq!(report.per_node[0].node.as_str(), "w2");
        assert_eq!(report.layers[&ServiceLayer::Storage].evidence, WorkerEvidence::MasterReport);
        assert_eq!(report.layer_state(ServiceLayer::Storage), ObservedLayerState::Running);
        assert!(exec.commands_matching("fsck").is_empty());
        assert!(exec.history().iter().all(|c| c.node.as_str() != "w1"));

        let err = prober.probe(&ProbeRequest::node("w9".into())).await.unwrap_err();
        assert!(matches!(err, ControlError::Topology(TopologyError::UnknownNode { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_is_unknown() {
        let (cfg, topo, exec) = make_cluster(&["w1"]);
        exec.run_layer(ServiceLayer::Storage);
        exec.set_reachable(&"nn".into(), false);

        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&ProbeRequest::roles(LayerSelection::All))
            .await
            .unwrap();
        assert!(!report.coordinator_reachable());
        assert_eq!(report.layer_state(ServiceLayer::Storage), ObservedLayerState::Unknown);
    }
}
