use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stratus_common::{ClusterTopology, ExecError, NodeId, ServiceLayer, ServiceRole};

use crate::types::{CommandOutput, RemoteExecutor};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub node: NodeId,
    pub command: String,
}

#[derive(Debug, Clone)]
struct SimNode {
    reachable: bool,
    trusted: bool,
    /// Ignores start scripts, e.g. a worker whose daemon crashes on boot.
    inert: bool,
    running: BTreeSet<ServiceRole>,
}

impl Default for SimNode {
    fn default() -> Self {
        Self {
            reachable: true,
            trusted: true,
            inert: false,
            running: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    coordinator: NodeId,
    workers: Vec<NodeId>,
    nodes: BTreeMap<NodeId, SimNode>,
    history: Vec<ExecutedCommand>,
    safemode: bool,
    fsck_status: String,
    /// Coordinator process listings a started layer takes to appear.
    settle_listings: usize,
    pending: Vec<(ServiceLayer, usize)>,
    /// Coordinator process listings always fail.
    listing_fails: bool,
    /// Coordinator process listings fail once any start script has run.
    listing_fails_after_start: bool,
    start_issued: bool,
}

impl Inner {
    fn node_mut(&mut self, node: &NodeId) -> &mut SimNode {
        self.nodes.entry(node.clone()).or_default()
    }

    fn apply_start(&mut self, layer: ServiceLayer) {
        let coordinator = self.coordinator.clone();
        let coord = self.node_mut(&coordinator);
        if coord.reachable && !coord.inert {
            coord.running.insert(layer.master());
        }
        for w in self.workers.clone() {
            let sim = self.node_mut(&w);
            if sim.reachable && sim.trusted && !sim.inert {
                sim.running.insert(layer.worker());
            }
        }
    }

    fn apply_stop(&mut self, layer: ServiceLayer) {
        self.pending.retain(|(l, _)| *l != layer);
        let coordinator = self.coordinator.clone();
        for (id, sim) in self.nodes.iter_mut() {
            if !sim.reachable {
                continue;
            }
            if id == &coordinator || sim.trusted {
                sim.running.remove(&layer.master());
                sim.running.remove(&layer.worker());
            }
        }
    }

    fn tick_pending(&mut self) {
        let mut ready = Vec::new();
        for (layer, remaining) in self.pending.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                ready.push(*layer);
            }
        }
        self.pending.retain(|(_, remaining)| *remaining > 0);
        for layer in ready {
            self.apply_start(layer);
        }
    }

    fn master_running(&self, layer: ServiceLayer) -> bool {
        self.nodes
            .get(&self.coordinator)
            .map(|n| n.running.contains(&layer.master()))
            .unwrap_or(false)
    }

    fn live_workers(&self, layer: ServiceLayer) -> Vec<NodeId> {
        self.workers
            .iter()
            .filter(|w| {
                self.nodes
                    .get(*w)
                    .map(|n| n.running.contains(&layer.worker()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn process_listing(&self, node: &NodeId) -> String {
        let mut out = String::from("/sbin/init\n/usr/sbin/sshd -D\n");
        if let Some(sim) = self.nodes.get(node) {
            for role in &sim.running {
                out.push_str(&format!(
                    "/usr/lib/jvm/java/bin/java {} -Xmx1000m org.apache.hadoop.{}\n",
                    role.process_signature(),
                    role.daemon_name()
                ));
            }
        }
        out
    }

    fn storage_report(&self) -> CommandOutput {
        if !self.master_running(ServiceLayer::Storage) {
            return CommandOutput::failed(
                1,
                format!(
                    "report: Call From {0} to {0}:9000 failed on connection exception: java.net.ConnectException: Connection refused",
                    self.coordinator
                ),
            );
        }
        let live = self.live_workers(ServiceLayer::Storage);
        let dead = self.workers.len() - live.len();
        let mut out = String::from(
            "Configured Capacity: 105689415680 (98.43 GB)\n\
             Present Capacity: 84913684480 (79.08 GB)\n\
             DFS Remaining: 84913618944 (79.08 GB)\n\
             DFS Used: 65536 (64 KB)\n\
             DFS Used%: 12.50%\n\
             -------------------------------------------------\n",
        );
        out.push_str(&format!("Live datanodes ({}):\n\n", live.len()));
        for w in &live {
            out.push_str(&format!("Name: {0}:9866 ({0})\nHostname: {0}\n\n", w));
        }
        out.push_str(&format!("Dead datanodes ({}):\n", dead));
        CommandOutput::ok(out)
    }

    fn resource_report(&self) -> CommandOutput {
        if !self.master_running(ServiceLayer::Resource) {
            return CommandOutput::failed(
                1,
                "INFO ipc.Client: Retrying connect to server: 0.0.0.0/0.0.0.0:8032",
            );
        }
        let live = self.live_workers(ServiceLayer::Resource);
        let mut out = format!(
            "INFO client.DefaultNoHARMFailoverProxyProvider: Connecting to ResourceManager at {}:8032\n\
             Total Nodes:{}\n\
             \x20        Node-Id\t     Node-State\tNode-Http-Address\tNumber-of-Running-Containers\n",
            self.coordinator,
            live.len()
        );
        for w in &live {
            out.push_str(&format!("{0}:41235\tRUNNING\t{0}:8042\t0\n", w));
        }
        CommandOutput::ok(out)
    }

    fn dispatch(&mut self, node: &NodeId, command: &str) -> CommandOutput {
        let is_coordinator = node == &self.coordinator;
        let cmd = command.trim();

        if cmd == "true" {
            return CommandOutput::ok("");
        }
        if cmd.starts_with("ps ") {
            let failing = self.listing_fails || (self.listing_fails_after_start && self.start_issued);
            if is_coordinator && failing {
                return CommandOutput::failed(1, "sh: fork: retry: Resource temporarily unavailable");
            }
            if is_coordinator {
                self.tick_pending();
            }
            return CommandOutput::ok(self.process_listing(node));
        }
        for layer in ServiceLayer::ALL {
            if cmd.ends_with(&format!("sbin/{}", layer.start_script())) {
                self.start_issued = true;
                if self.settle_listings == 0 {
                    self.apply_start(layer);
                } else {
                    self.pending.retain(|(l, _)| *l != layer);
                    self.pending.push((layer, self.settle_listings));
                }
                return CommandOutput::ok(format!("Starting {} daemons\n", layer));
            }
            if cmd.ends_with(&format!("sbin/{}", layer.stop_script())) {
                self.apply_stop(layer);
                return CommandOutput::ok(format!("Stopping {} daemons\n", layer));
            }
        }
        if cmd.contains("dfsadmin -report") {
            return self.storage_report();
        }
        if cmd.contains("dfsadmin -safemode get") {
            if !self.master_running(ServiceLayer::Storage) {
                return CommandOutput::failed(1, "safemode: Connection refused");
            }
            let state = if self.safemode { "ON" } else { "OFF" };
            return CommandOutput::ok(format!("Safe mode is {}\n", state));
        }
        if cmd.contains("fsck /") {
            if !self.master_running(ServiceLayer::Storage) {
                return CommandOutput::failed(1, "fsck: Connection refused");
            }
            let under = if self.fsck_status == "HEALTHY" { 0 } else { 4 };
            return CommandOutput::ok(format!(
                "Status: {0}\n Total size:\t1024 B\n Under-replicated blocks:\t{1} (0.0 %)\n \
                 Missing blocks:\t\t0\n\nThe filesystem under path '/' is {0}\n",
                self.fsck_status, under
            ));
        }
        if cmd.contains("node -list") {
            return self.resource_report();
        }
        if cmd.starts_with("df ") {
            return CommandOutput::ok(
                "Filesystem     1024-blocks     Used Available Capacity Mounted on\n\
                 /dev/sda1         41152736 13168876  27983860      32% /\n",
            );
        }
        if cmd.starts_with("free") {
            return CommandOutput::ok(
                "               total        used        free      shared  buff/cache   available\n\
                 Mem:            7962        2345        3000         100        2617        5300\n\
                 Swap:              0           0           0\n",
            );
        }
        if cmd.contains("/proc/loadavg") {
            return CommandOutput::ok("0.52 0.58 0.59 1/389 12345\n");
        }
        if cmd.starts_with("tail ") {
            return CommandOutput::ok(
                "2026-01-01 00:00:00,000 INFO org.apache.hadoop: STARTUP_MSG\n",
            );
        }
        CommandOutput::failed(127, format!("sh: {}: command not found", cmd))
    }
}

/// Simulated cluster implementing [`RemoteExecutor`] in memory. Understands the
/// control scripts, process listings, native layer reports and resource
/// snapshot commands, and records every command it receives.
#[derive(Debug, Clone)]
pub struct MemoryExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryExecutor {
    pub fn new(coordinator: NodeId, workers: Vec<NodeId>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(coordinator.clone(), SimNode::default());
        for w in &workers {
            nodes.insert(w.clone(), SimNode::default());
        }
        Self {
            inner: Arc::new(Mutex::new(Inner {
                coordinator,
                workers,
                nodes,
                history: Vec::new(),
                safemode: false,
                fsck_status: "HEALTHY".to_string(),
                settle_listings: 0,
                pending: Vec::new(),
                listing_fails: false,
                listing_fails_after_start: false,
                start_issued: false,
            })),
        }
    }

    pub fn from_topology(topology: &ClusterTopology) -> Self {
        Self::new(topology.coordinator().clone(), topology.workers().to_vec())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring a layer fully up without recording a command.
    pub fn run_layer(&self, layer: ServiceLayer) {
        self.lock().apply_start(layer);
    }

    pub fn set_reachable(&self, node: &NodeId, reachable: bool) {
        self.lock().node_mut(node).reachable = reachable;
    }

    pub fn set_trusted(&self, node: &NodeId, trusted: bool) {
        self.lock().node_mut(node).trusted = trusted;
    }

    pub fn set_inert(&self, node: &NodeId, inert: bool) {
        self.lock().node_mut(node).inert = inert;
    }

    pub fn set_role(&self, node: &NodeId, role: ServiceRole, running: bool) {
        let mut inner = self.lock();
        let sim = inner.node_mut(node);
        if running {
            sim.running.insert(role);
        } else {
            sim.running.remove(&role);
        }
    }

    /// Started layers appear only after this many coordinator process listings.
    pub fn set_settle_listings(&self, listings: usize) {
        self.lock().settle_listings = listings;
    }

    pub fn set_listing_fails(&self, fails: bool) {
        self.lock().listing_fails = fails;
    }

    pub fn set_listing_fails_after_start(&self, fails: bool) {
        self.lock().listing_fails_after_start = fails;
    }

    pub fn set_safemode(&self, on: bool) {
        self.lock().safemode = on;
    }

    pub fn set_fsck_status(&self, status: &str) {
        self.lock().fsck_status = status.to_string();
    }

    pub fn running_roles(&self, node: &NodeId) -> Vec<ServiceRole> {
        self.lock()
            .nodes
            .get(node)
            .map(|n| n.running.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn history(&self) -> Vec<ExecutedCommand> {
        self.lock().history.clone()
    }

    /// Commands containing `pattern`, in execution order.
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.lock()
            .history
            .iter()
            .filter(|c| c.command.contains(pattern))
            .map(|c| c.command.clone())
            .collect()
    }

    /// Index in the history of the first command containing `pattern`.
    pub fn position_of(&self, pattern: &str) -> Option<usize> {
        self.lock()
            .history
            .iter()
            .position(|c| c.command.contains(pattern))
    }
}

#[async_trait]
impl RemoteExecutor for MemoryExecutor {
    async fn is_reachable(&self, node: &NodeId) -> bool {
        self.lock()
            .nodes
            .get(node)
            .map(|n| n.reachable)
            .unwrap_or(false)
    }

    async fn run_command(&self, node: &NodeId, command: &str) -> Result<CommandOutput, ExecError> {
        let mut inner = self.lock();
        inner.history.push(ExecutedCommand {
            node: node.clone(),
            command: command.to_string(),
        });

        let sim = match inner.nodes.get(node) {
            Some(sim) if sim.reachable => sim.clone(),
            _ => return Err(ExecError::Unreachable { node: node.clone() }),
        };
        if node != &inner.coordinator && !sim.trusted {
            return Err(ExecError::AuthRejected {
                node: node.clone(),
                detail: "Permission denied (publickey).".to_string(),
            });
        }

        Ok(inner.dispatch(node, command))
    }
}
