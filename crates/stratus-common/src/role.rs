use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the two layered subsystems. Declaration order is dependency order:
/// the resource layer needs the storage layer to be up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLayer {
    Storage,
    Resource,
}

impl ServiceLayer {
    pub const ALL: [ServiceLayer; 2] = [ServiceLayer::Storage, ServiceLayer::Resource];

    pub fn master(self) -> ServiceRole {
        match self {
            ServiceLayer::Storage => ServiceRole::StorageMaster,
            ServiceLayer::Resource => ServiceRole::ResourceMaster,
        }
    }

    pub fn worker(self) -> ServiceRole {
        match self {
            ServiceLayer::Storage => ServiceRole::StorageWorker,
            ServiceLayer::Resource => ServiceRole::ResourceWorker,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServiceLayer::Storage => "storage",
            ServiceLayer::Resource => "resource",
        }
    }

    /// Control script under `<install_root>/sbin` that brings the layer up.
    pub fn start_script(self) -> &'static str {
        match self {
            ServiceLayer::Storage => "start-dfs.sh",
            ServiceLayer::Resource => "start-yarn.sh",
        }
    }

    pub fn stop_script(self) -> &'static str {
        match self {
            ServiceLayer::Storage => "stop-dfs.sh",
            ServiceLayer::Resource => "stop-yarn.sh",
        }
    }
}

impl fmt::Display for ServiceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for ServiceLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "storage" | "hdfs" | "dfs" => Ok(ServiceLayer::Storage),
            "resource" | "yarn" => Ok(ServiceLayer::Resource),
            other => Err(format!(
                "unknown layer '{}', available: storage, resource",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Coordinator,
    Worker,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    StorageMaster,
    StorageWorker,
    ResourceMaster,
    ResourceWorker,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 4] = [
        ServiceRole::StorageMaster,
        ServiceRole::StorageWorker,
        ServiceRole::ResourceMaster,
        ServiceRole::ResourceWorker,
    ];

    pub fn layer(self) -> ServiceLayer {
        match self {
            ServiceRole::StorageMaster | ServiceRole::StorageWorker => ServiceLayer::Storage,
            ServiceRole::ResourceMaster | ServiceRole::ResourceWorker => ServiceLayer::Resource,
        }
    }

    pub fn placement(self) -> Placement {
        match self {
            ServiceRole::StorageMaster | ServiceRole::ResourceMaster => Placement::Coordinator,
            ServiceRole::StorageWorker | ServiceRole::ResourceWorker => Placement::Worker,
        }
    }

    pub fn is_master(self) -> bool {
        self.placement() == Placement::Coordinator
    }

    /// Daemon identifier used in the JVM's `-Dproc_*` flag and in log file names.
    pub fn daemon_id(self) -> &'static str {
        match self {
            ServiceRole::StorageMaster => "namenode",
            ServiceRole::StorageWorker => "datanode",
            ServiceRole::ResourceMaster => "resourcemanager",
            ServiceRole::ResourceWorker => "nodemanager",
        }
    }

    pub fn daemon_name(self) -> &'static str {
        match self {
            ServiceRole::StorageMaster => "NameNode",
            ServiceRole::StorageWorker => "DataNode",
            ServiceRole::ResourceMaster => "ResourceManager",
            ServiceRole::ResourceWorker => "NodeManager",
        }
    }

    /// Substring that identifies the running daemon in a `ps -eo args=` listing.
    pub fn process_signature(self) -> String {
        format!("-Dproc_{}", self.daemon_id())
    }

    /// Whether a process listing contains this role. Matches the signature as a
    /// whole token so `-Dproc_namenode` never matches `-Dproc_namenodex`.
    pub fn present_in(self, listing: &str) -> bool {
        let signature = self.process_signature();
        listing.lines().any(|line| {
            line.split_whitespace()
                .any(|token| token == signature)
        })
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.daemon_name())
    }
}

/// Which layers a lifecycle or diagnostic invocation acts on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayerSelection {
    #[default]
    All,
    Storage,
    Resource,
}

impl LayerSelection {
    pub fn includes(self, layer: ServiceLayer) -> bool {
        match self {
            LayerSelection::All => true,
            LayerSelection::Storage => layer == ServiceLayer::Storage,
            LayerSelection::Resource => layer == ServiceLayer::Resource,
        }
    }

    /// Selected layers in dependency order: storage before resource.
    pub fn start_order(self) -> Vec<ServiceLayer> {
        ServiceLayer::ALL
            .into_iter()
            .filter(|l| self.includes(*l))
            .collect()
    }

    /// Selected layers in teardown order: resource before storage.
    pub fn stop_order(self) -> Vec<ServiceLayer> {
        let mut layers = self.start_order();
        layers.reverse();
        layers
    }
}

impl From<ServiceLayer> for LayerSelection {
    fn from(layer: ServiceLayer) -> Self {
        match layer {
            ServiceLayer::Storage => LayerSelection::Storage,
            ServiceLayer::Resource => LayerSelection::Resource,
        }
    }
}

impl fmt::Display for LayerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSelection::All => f.write_str("all"),
            LayerSelection::Storage => f.write_str("storage"),
            LayerSelection::Resource => f.write_str("resource"),
        }
    }
}

impl FromStr for LayerSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "both" => Ok(LayerSelection::All),
            "storage" | "storage-only" | "hdfs" | "dfs" => Ok(LayerSelection::Storage),
            "resource" | "resource-only" | "yarn" => Ok(LayerSelection::Resource),
            other => Err(format!(
                "unknown layer selection '{}', available: all, storage, resource",
                other
            )),
        }
    }
}
