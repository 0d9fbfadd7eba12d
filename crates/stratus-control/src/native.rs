//! Commands run on cluster nodes and parsers for their output.

use stratus_common::{
    ControlConfig, DiskUsage, FsckClass, FsckReport, LoadAverage, MemoryUsage, SafemodeState,
    ServiceRole,
};

pub const PROCESS_LISTING: &str = "ps -eo args=";
pub const MEMORY: &str = "free -m";
pub const LOAD: &str = "cat /proc/loadavg";

/// Command lines derived from the installation layout.
pub struct NativeCommands<'a> {
    config: &'a ControlConfig,
}

impl<'a> NativeCommands<'a> {
    pub fn new(config: &'a ControlConfig) -> Self {
        Self { config }
    }

    fn tool(&self, tool: &str, args: &str) -> String {
        format!("{} {}", self.config.bin(tool).display(), args)
    }

    pub fn storage_report(&self) -> String {
        self.tool("hdfs", "dfsadmin -report")
    }

    pub fn safemode(&self) -> String {
        self.tool("hdfs", "dfsadmin -safemode get")
    }

    pub fn fsck(&self) -> String {
        self.tool("hdfs", "fsck /")
    }

    pub fn node_list(&self) -> String {
        self.tool("yarn", "node -list")
    }

    pub fn disk(&self) -> String {
        format!("df -Pk {}", self.config.install_root.display())
    }

    pub fn log_tail(&self, role: ServiceRole) -> String {
        format!(
            "tail -q -n {} {}/*-{}-*.log",
            self.config.log_tail_lines,
            self.config.log_dir().display(),
            role.daemon_id()
        )
    }
}

/// Text after `label` on the first line containing it.
fn value_after<'t>(text: &'t str, label: &str) -> Option<&'t str> {
    text.lines().find_map(|line| {
        let idx = line.find(label)?;
        Some(line[idx + label.len()..].trim())
    })
}

fn leading_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    s.split_whitespace().next()?.parse().ok()
}

/// `Live datanodes (3):` -> 3
fn parenthesized_count(text: &str, label: &str) -> Option<usize> {
    let rest = value_after(text, label)?;
    let inner = rest.strip_prefix('(')?;
    inner.split(')').next()?.trim().parse().ok()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageReport {
    pub live_datanodes: Option<usize>,
    pub dead_datanodes: Option<usize>,
    pub configured_capacity: Option<String>,
    pub dfs_used_percent: Option<f64>,
}

/// Cluster-wide figures from `hdfs dfsadmin -report`. Only the first occurrence
/// of each label counts; later ones belong to per-datanode sections.
pub fn parse_storage_report(text: &str) -> StorageReport {
    let configured_capacity = value_after(text, "Configured Capacity:").map(|v| {
        match (v.find('('), v.rfind(')')) {
            (Some(open), Some(close)) if open < close => v[open + 1..close].trim().to_string(),
            _ => v.to_string(),
        }
    });
    let dfs_used_percent =
        value_after(text, "DFS Used%:").and_then(|v| v.trim_end_matches('%').trim().parse().ok());
    StorageReport {
        live_datanodes: parenthesized_count(text, "Live datanodes"),
        dead_datanodes: parenthesized_count(text, "Dead datanodes"),
        configured_capacity,
        dfs_used_percent,
    }
}

pub fn parse_safemode(text: &str) -> SafemodeState {
    match value_after(text, "Safe mode is") {
        Some(v) if v.starts_with("ON") => SafemodeState::On,
        Some(v) if v.starts_with("OFF") => SafemodeState::Off,
        _ => SafemodeState::Unknown,
    }
}

pub fn parse_fsck(text: &str) -> FsckReport {
    let under_replicated_blocks =
        value_after(text, "Under-replicated blocks:").and_then(leading_number::<u64>);
    let missing_blocks = value_after(text, "Missing blocks:").and_then(leading_number::<u64>);

    let verdict = value_after(text, "The filesystem under path")
        .and_then(|v| v.rsplit(" is ").next())
        .map(|v| v.trim().to_ascii_uppercase());

    let class = match verdict.as_deref() {
        Some("CORRUPT") => FsckClass::Corrupt,
        Some("HEALTHY") if missing_blocks.unwrap_or(0) > 0 => FsckClass::Corrupt,
        Some("HEALTHY") if under_replicated_blocks.unwrap_or(0) > 0 => FsckClass::UnderReplicated,
        Some("HEALTHY") => FsckClass::Healthy,
        _ => FsckClass::Unknown,
    };
    FsckReport {
        class,
        under_replicated_blocks,
        missing_blocks,
    }
}

/// `Total Nodes:3` from `yarn node -list`.
pub fn parse_node_list(text: &str) -> Option<usize> {
    value_after(text, "Total Nodes:").and_then(leading_number)
}

/// POSIX `df -Pk` output for a single path.
pub fn parse_df(text: &str) -> Option<DiskUsage> {
    let line = text.lines().skip(1).find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    Some(DiskUsage {
        mount: fields[5..].join(" "),
        size_kb: fields[1].parse().ok()?,
        used_kb: fields[2].parse().ok()?,
        used_percent: fields[4].trim_end_matches('%').parse().ok()?,
    })
}

/// `Mem:` row of `free -m`. Falls back to the `free` column on systems that do
/// not print `available`.
pub fn parse_free(text: &str) -> Option<MemoryUsage> {
    let line = text.lines().find(|l| l.trim_start().starts_with("Mem:"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse())
        .collect::<Result<_, _>>()
        .ok()?;
    let total_mb = *fields.first()?;
    let used_mb = *fields.get(1)?;
    let available_mb = fields.get(5).or_else(|| fields.get(2)).copied()?;
    Some(MemoryUsage {
        total_mb,
        used_mb,
        available_mb,
    })
}

pub fn parse_loadavg(text: &str) -> Option<LoadAverage> {
    let mut it = text.split_whitespace();
    Some(LoadAverage {
        one: it.next()?.parse().ok()?,
        five: it.next()?.parse().ok()?,
        fifteen: it.next()?.parse().ok()?,
    })
}
