use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use stratus_common::topology::DEFAULT_REPLICATION;
use stratus_common::{ClusterTopology, ControlConfig, NodeId, TopologyError};

/// Hostnames from a worker-list file, in file order. Blank lines and comments
/// are skipped; duplicates are left for [`ClusterTopology::new`] to drop.
pub fn parse_worker_list(text: &str) -> Vec<NodeId> {
    text.lines()
        .filter_map(|line| {
            let host = line.split('#').next().unwrap_or("").trim();
            if host.is_empty() {
                None
            } else {
                Some(NodeId::new(host))
            }
        })
        .collect()
}

/// Value of a `<property>` in a site XML file. A small line-agnostic scan that
/// only understands the flat `<name>`/`<value>` layout these files use.
pub fn site_property(xml: &str, name: &str) -> Option<String> {
    for block in xml.split("<property>").skip(1) {
        let block = block.split("</property>").next().unwrap_or(block);
        if tag_text(block, "name").as_deref() == Some(name) {
            return tag_text(block, "value");
        }
    }
    None
}

fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(block[start..end].trim().to_string())
}

async fn read_replication(path: &Path) -> u32 {
    let xml = match fs::read_to_string(path).await {
        Ok(xml) => xml,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "storage site file not readable, using default replication");
            return DEFAULT_REPLICATION;
        }
    };
    match site_property(&xml, "dfs.replication") {
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) if v > 0 => v,
            _ => {
                tracing::warn!(value = %raw, "invalid dfs.replication, using default {}", DEFAULT_REPLICATION);
                DEFAULT_REPLICATION
            }
        },
        None => DEFAULT_REPLICATION,
    }
}

/// Read the worker list and replication factor named by `config`. Local file
/// access only.
pub async fn resolve_topology(config: &ControlConfig) -> Result<ClusterTopology, TopologyError> {
    let path = config.worker_file();
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(TopologyError::Missing { path });
        }
        Err(source) => return Err(TopologyError::Unreadable { path, source }),
    };

    let workers = parse_worker_list(&text);
    if workers.is_empty() {
        return Err(TopologyError::Empty { path });
    }

    let replication = read_replication(&config.storage_site_file()).await;
    Ok(ClusterTopology::new(config.coordinator.clone(), workers, replication))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_install(workers: &str, site: Option<&str>) -> (tempfile::TempDir, ControlConfig) {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("etc").join("hadoop");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(conf.join("workers"), workers).unwrap();
        if let Some(site) = site {
            std::fs::write(conf.join("hdfs-site.xml"), site).unwrap();
        }
        let cfg = ControlConfig::new("hadoop", dir.path(), "/opt/java", "nn".into());
        (dir, cfg)
    }

    #[test]
    fn test_parse_worker_list() {
        let text = "# workers\nw1\n\n  w2  \nw3 # rack 2\nw1\n";
        let hosts = parse_worker_list(text);
        let names: Vec<&str> = hosts.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["w1", "w2", "w3", "w1"]);
    }

    #[test]
    fn test_site_property() {
        let xml = r#"<?xml version="1.0"?>
<configuration>
  <property>
    <name>dfs.namenode.name.dir</name>
    <value>/data/nn</value>
  </property>
  <property>
    <value> 2 </value>
    <name>dfs.replication</name>
  </property>
</configuration>"#;
        assert_eq!(site_property(xml, "dfs.replication").as_deref(), Some("2"));
        assert_eq!(site_property(xml, "dfs.namenode.name.dir").as_deref(), Some("/data/nn"));
        assert_eq!(site_property(xml, "dfs.blocksize"), None);
    }

    #[tokio::test]
    async fn test_resolve_dedups_and_reads_replication() {
        let site = "<configuration><property><name>dfs.replication</name><value>2</value></property></configuration>";
        let (_dir, cfg) = make_install("w1\nw2\nw1\n", Some(site));
        let topo = resolve_topology(&cfg).await.unwrap();
        assert_eq!(topo.worker_count(), 2);
        assert_eq!(topo.configured_replication(), 2);
        assert_eq!(topo.coordinator().as_str(), "nn");
    }

    #[tokio::test]
    async fn test_resolve_defaults_replication() {
        let (_dir, cfg) = make_install("w1\n", None);
        let topo = resolve_topology(&cfg).await.unwrap();
        assert_eq!(topo.configured_replication(), DEFAULT_REPLICATION);

        let bad = "<property><name>dfs.replication</name><value>three</value></property>";
        let (_dir, cfg) = make_install("w1\n", Some(bad));
        let topo = resolve_topology(&cfg).await.unwrap();
        assert_eq!(topo.configured_replication(), DEFAULT_REPLICATION);
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let (_dir, cfg) = make_install("# nobody yet\n\n", None);
        assert!(matches!(
            resolve_topology(&cfg).await,
            Err(TopologyError::Empty { .. })
        ));

        let cfg = ControlConfig::new("hadoop", "/nonexistent/stratus", "/opt/java", "nn".into());
        assert!(matches!(
            resolve_topology(&cfg).await,
            Err(TopologyError::Missing { .. })
        ));
    }
}
