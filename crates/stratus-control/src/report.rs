use std::fmt::{self, Write};
use std::str::FromStr;

use stratus_common::{
    ClusterHealthReport, ClusterTopology, ControlConfig, ControlError, LayerSelection,
    NodeHealthReport, NodeId, SafemodeState, ServiceLayer, ServiceRole, WorkerEvidence,
};
use stratus_exec::RemoteExecutor;

use crate::prober::{ProbeRequest, Prober};

/// What the diagnostic tool reports on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportMode {
    Basic,
    Full,
    Component(ServiceLayer),
    Node(NodeId),
}

impl ReportMode {
    pub fn probe_request(&self) -> ProbeRequest {
        match self {
            ReportMode::Basic => ProbeRequest::summary(),
            ReportMode::Full => ProbeRequest::deep(LayerSelection::All),
            ReportMode::Component(layer) => ProbeRequest::deep((*layer).into()),
            ReportMode::Node(node) => ProbeRequest::node(node.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReportMode::Basic => "basic",
            ReportMode::Full => "full",
            ReportMode::Component(_) => "component",
            ReportMode::Node(_) => "node",
        }
    }
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportMode::Component(layer) => write!(f, "component: {}", layer),
            ReportMode::Node(node) => write!(f, "node: {}", node),
            other => f.write_str(other.name()),
        }
    }
}

/// Mode names without their argument, as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Basic,
    Full,
    Component,
    Node,
}

impl FromStr for ModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(ModeKind::Basic),
            "full" => Ok(ModeKind::Full),
            "component" => Ok(ModeKind::Component),
            "node" => Ok(ModeKind::Node),
            other => Err(format!(
                "unknown mode '{}', available: basic, full, component, node",
                other
            )),
        }
    }
}

impl ModeKind {
    /// Attach the argument a mode needs.
    pub fn resolve(
        self,
        component: Option<ServiceLayer>,
        node: Option<NodeId>,
    ) -> Result<ReportMode, String> {
        match self {
            ModeKind::Basic => Ok(ReportMode::Basic),
            ModeKind::Full => Ok(ReportMode::Full),
            ModeKind::Component => component
                .map(ReportMode::Component)
                .ok_or_else(|| "--mode component requires --component <storage|resource>".to_string()),
            ModeKind::Node => node
                .map(ReportMode::Node)
                .ok_or_else(|| "--mode node requires --node <host>".to_string()),
        }
    }
}

/// Probe the cluster for `mode`.
///
/// Degraded workers only produce warnings in the returned report. The call
/// fails when a selected layer's master could not be observed, since nothing
/// in the report can then be trusted.
pub async fn diagnose(
    config: &ControlConfig,
    topology: &ClusterTopology,
    exec: &dyn RemoteExecutor,
    mode: &ReportMode,
) -> Result<ClusterHealthReport, ControlError> {
    let report = Prober::new(config, topology, exec)
        .probe(&mode.probe_request())
        .await?;
    ensure_masters_probed(&report)?;
    Ok(report)
}

/// Error out when any layer in `report` has no observed master state.
pub fn ensure_masters_probed(report: &ClusterHealthReport) -> Result<(), ControlError> {
    let coordinator = &report.coordinator;
    if !coordinator.reachable {
        return Err(ControlError::UnreachableNode {
            node: coordinator.node.clone(),
        });
    }
    match report.layers.values().find(|h| h.master_present.is_none()) {
        Some(health) => Err(ControlError::UnprobedMaster {
            layer: health.layer,
            node: coordinator.node.clone(),
            detail: coordinator
                .errors
                .last()
                .cloned()
                .unwrap_or_else(|| "no process listing".to_string()),
        }),
        None => Ok(()),
    }
}

/// Render `report` as operator-facing text.
pub fn render(report: &ClusterHealthReport, mode: &ReportMode) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, report, mode);
    out
}

fn write_report(out: &mut String, report: &ClusterHealthReport, mode: &ReportMode) -> fmt::Result {
    writeln!(out, "\n=== Stratus Cluster Health ({}) ===", mode)?;
    writeln!(
        out,
        "  Coordinator: {}   Workers: {}   Replication: {}   Generated: {}",
        report.coordinator.node,
        report.total_worker_count,
        report.configured_replication,
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;

    match mode {
        ReportMode::Node(node) => {
            write_layers(out, report)?;
            match report.node(node) {
                Some(r) => write_node_detail(out, r)?,
                None => writeln!(out, "\n  (node {} was not probed)", node)?,
            }
        }
        _ => {
            write_coordinator(out, report)?;
            write_layers(out, report)?;
            if *mode == ReportMode::Basic {
                write_storage_brief(out, report)?;
            } else {
                write_drilldown(out, report)?;
                write_node_table(out, report)?;
                write_logs(out, report)?;
            }
            write_endpoints(out, report)?;
        }
    }

    write_warnings(out, report)?;
    writeln!(out)
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

fn write_coordinator(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    writeln!(out, "\n[Coordinator Processes]")?;
    let coord = &report.coordinator;
    if !coord.reachable {
        return writeln!(out, "  (coordinator {} unreachable)", coord.node);
    }
    for (role, present) in &coord.roles_present {
        if role.is_master() {
            let status = if *present { "RUNNING" } else { "MISSING" };
            writeln!(out, "  {:<20} {:<10}", role.daemon_name(), status)?;
        }
    }
    Ok(())
}

fn write_layers(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    writeln!(out, "\n[Layers]")?;
    writeln!(
        out,
        "  {:<10} {:<10} {:<6} {:<6} {:<8} {:<14}",
        "Layer", "State", "Live", "Total", "Deficit", "Source"
    )?;
    for health in report.layers.values() {
        let source = match health.evidence {
            WorkerEvidence::FanOut => "node probes",
            WorkerEvidence::MasterReport => "master report",
        };
        writeln!(
            out,
            "  {:<10} {:<10} {:<6} {:<6} {:<8} {:<14}",
            health.layer,
            health.state,
            health.live_workers,
            health.total_workers,
            health.deficit(),
            source
        )?;
    }
    writeln!(
        out,
        "  Live workers: {}/{} (deficit {})",
        report.live_worker_count,
        report.total_worker_count,
        report.deficit()
    )
}

fn safemode_str(state: SafemodeState) -> &'static str {
    match state {
        SafemodeState::On => "ON",
        SafemodeState::Off => "OFF",
        SafemodeState::Unknown => "UNKNOWN",
    }
}

fn write_storage_brief(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    if let Some(storage) = &report.storage {
        writeln!(out, "\n[Storage]")?;
        writeln!(out, "  {:<20} {}", "Safemode", safemode_str(storage.safemode))?;
    }
    Ok(())
}

fn opt<T: fmt::Display>(v: &Option<T>) -> String {
    v.as_ref().map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

fn write_drilldown(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    if report.layers.contains_key(&ServiceLayer::Storage) {
        writeln!(out, "\n[Storage]")?;
        match &report.storage {
            Some(s) => {
                writeln!(out, "  {:<20} {}", "Safemode", safemode_str(s.safemode))?;
                writeln!(out, "  {:<20} {}", "Live datanodes", opt(&s.live_datanodes))?;
                writeln!(out, "  {:<20} {}", "Dead datanodes", opt(&s.dead_datanodes))?;
                writeln!(out, "  {:<20} {}", "Capacity", opt(&s.configured_capacity))?;
                let used = s.dfs_used_percent.map(|p| format!("{:.2}%", p));
                writeln!(out, "  {:<20} {}", "DFS used", opt(&used))?;
                if let Some(fsck) = &s.fsck {
                    writeln!(out, "  {:<20} {}", "Filesystem check", fsck.class)?;
                    writeln!(out, "  {:<20} {}", "Under-replicated", opt(&fsck.under_replicated_blocks))?;
                    writeln!(out, "  {:<20} {}", "Missing blocks", opt(&fsck.missing_blocks))?;
                }
            }
            None => writeln!(out, "  (storage master not running, no report)")?,
        }
        if let Some(h) = report.layers.get(&ServiceLayer::Storage) {
            writeln!(
                out,
                "  {:<20} {} live / {} configured",
                "Replication", h.live_workers, report.configured_replication
            )?;
        }
    }

    if report.layers.contains_key(&ServiceLayer::Resource) {
        writeln!(out, "\n[Resource]")?;
        match &report.resource {
            Some(r) => writeln!(out, "  {:<20} {}", "Active node managers", opt(&r.active_node_managers))?,
            None => writeln!(out, "  (resource master not running, no report)")?,
        }
    }
    Ok(())
}

fn worker_roles(report: &ClusterHealthReport) -> Vec<ServiceRole> {
    report.layers.keys().map(|l| l.worker()).collect()
}

fn snapshot_cells(r: &NodeHealthReport) -> (String, String, String) {
    let disk = r.disk.as_ref().map_or("-".to_string(), |d| format!("{}%", d.used_percent));
    let mem = r
        .memory
        .as_ref()
        .map_or("-".to_string(), |m| format!("{:.0}%", m.used_percent()));
    let load = r.load.as_ref().map_or("-".to_string(), |l| format!("{:.2}", l.one));
    (disk, mem, load)
}

fn write_node_table(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    writeln!(out, "\n[Nodes]")?;
    if report.per_node.is_empty() {
        return writeln!(out, "  (No workers probed)");
    }
    let roles = worker_roles(report);
    let mut header = format!("  {:<20} {:<6} {:<6}", "Node", "Reach", "SSH");
    for role in &roles {
        let _ = write!(header, " {:<12}", role.daemon_name());
    }
    let _ = write!(header, " {:<6} {:<6} {:<6} {:<6}", "Disk", "Mem", "Load", "Errors");
    writeln!(out, "{}", header)?;

    for r in &report.per_node {
        let (disk, mem, load) = snapshot_cells(r);
        write!(out, "  {:<20} {:<6} {:<6}", r.node, yes_no(r.reachable), yes_no(r.ssh_trusted))?;
        for role in &roles {
            write!(out, " {:<12}", yes_no(r.has_role(*role)))?;
        }
        writeln!(out, " {:<6} {:<6} {:<6} {:<6}", disk, mem, load, r.errors.len())?;
    }
    Ok(())
}

fn write_logs(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    let nodes = std::iter::once(&report.coordinator).chain(report.per_node.iter());
    let mut header_done = false;
    for r in nodes {
        for excerpt in &r.log_tail {
            if !header_done {
                writeln!(out, "\n[Recent Logs]")?;
                header_done = true;
            }
            writeln!(out, "  {} {}:", r.node, excerpt.role.daemon_name())?;
            for line in &excerpt.lines {
                writeln!(out, "    {}", line)?;
            }
        }
    }
    Ok(())
}

fn write_node_detail(out: &mut String, r: &NodeHealthReport) -> fmt::Result {
    writeln!(out, "\n[Node {}]", r.node)?;
    writeln!(out, "  {:<20} {}", "Reachable", yes_no(r.reachable))?;
    writeln!(out, "  {:<20} {}", "SSH trusted", yes_no(r.ssh_trusted))?;
    for (role, present) in &r.roles_present {
        let status = if *present { "RUNNING" } else { "MISSING" };
        writeln!(out, "  {:<20} {}", role.daemon_name(), status)?;
    }
    if let Some(d) = &r.disk {
        writeln!(
            out,
            "  {:<20} {}% of {} MB on {}",
            "Disk",
            d.used_percent,
            d.size_kb / 1024,
            d.mount
        )?;
    }
    if let Some(m) = &r.memory {
        writeln!(
            out,
            "  {:<20} {} / {} MB used, {} MB available",
            "Memory", m.used_mb, m.total_mb, m.available_mb
        )?;
    }
    if let Some(l) = &r.load {
        writeln!(out, "  {:<20} {:.2} {:.2} {:.2}", "Load", l.one, l.five, l.fifteen)?;
    }
    for excerpt in &r.log_tail {
        writeln!(out, "  Log ({}):", excerpt.role.daemon_name())?;
        for line in &excerpt.lines {
            writeln!(out, "    {}", line)?;
        }
    }
    if !r.errors.is_empty() {
        writeln!(out, "  Errors:")?;
        for e in &r.errors {
            writeln!(out, "    - {}", e)?;
        }
    }
    Ok(())
}

fn write_endpoints(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    if report.endpoints.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n[Web Endpoints]")?;
    for ep in &report.endpoints {
        let status = match ep.responding {
            Some(true) => "UP",
            Some(false) => "DOWN",
            None => "-",
        };
        writeln!(out, "  {:<10} {:<30} {}", ep.layer, ep.url, status)?;
    }
    Ok(())
}

fn write_warnings(out: &mut String, report: &ClusterHealthReport) -> fmt::Result {
    let warnings = report.warnings();
    if warnings.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n[Warnings]")?;
    for w in warnings {
        writeln!(out, "  ! {}", w)?;
    }
    Ok(())
}
