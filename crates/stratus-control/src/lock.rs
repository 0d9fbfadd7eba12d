use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stratus_common::{ControlConfig, ControlError};

/// Contents of the lease file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseRecord {
    pub owner: Uuid,
    pub pid: u32,
    pub operator: String,
    pub action: String,
    pub acquired_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn describe(&self) -> String {
        format!(
            "{} by {} (pid {}) since {}",
            self.action,
            self.operator,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Advisory cluster-wide lease held for the duration of a mutating action.
/// Released on drop.
#[derive(Debug)]
pub struct ControlLock {
    path: PathBuf,
    owner: Uuid,
}

impl ControlLock {
    pub fn acquire(config: &ControlConfig, action: &str) -> Result<Self, ControlError> {
        let path = config.lock_path.clone();
        let lock_err = |source: io::Error| ControlError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }

        let record = LeaseRecord {
            owner: Uuid::new_v4(),
            pid: std::process::id(),
            operator: config.operator.clone(),
            action: action.to_string(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record).map_err(|e| lock_err(io::Error::other(e)))?;

        // Second pass only after removing a stale lease.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_lease(&path, file, &body).map_err(lock_err)?;
                    tracing::debug!(path = %path.display(), owner = %record.owner, "cluster lock acquired");
                    return Ok(Self {
                        path: path.clone(),
                        owner: record.owner,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let existing = read_lease(&path);
                    if !is_stale(&path, existing.as_ref(), config.lock_ttl) {
                        let holder = existing
                            .map(|r| r.describe())
                            .unwrap_or_else(|| format!("unreadable lease at {}", path.display()));
                        return Err(ControlError::Locked { holder });
                    }
                    tracing::warn!(
                        path = %path.display(),
                        holder = ?existing.as_ref().map(|r| r.describe()),
                        "replacing stale cluster lock"
                    );
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(lock_err(e)),
                    }
                }
                Err(e) => return Err(lock_err(e)),
            }
        }

        Err(ControlError::Locked {
            holder: format!("lease at {} is contended", path.display()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ControlLock {
    fn drop(&mut self) {
        // Leave the file alone if a stale-lease takeover replaced it.
        if read_lease(&self.path).is_some_and(|r| r.owner != self.owner) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to release cluster lock");
            }
        }
    }
}

/// Write a freshly created lease. On failure the partial file is removed so it
/// cannot block later invocations until the TTL runs out.
fn write_lease(path: &Path, mut file: impl Write, body: &[u8]) -> io::Result<()> {
    let written = file.write_all(body).and_then(|()| file.flush());
    if let Err(e) = written {
        drop(file);
        if let Err(rm) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %rm, "failed to remove partial cluster lock");
        }
        return Err(e);
    }
    Ok(())
}

fn read_lease(path: &Path) -> Option<LeaseRecord> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// A lease older than `ttl` is stale. Unparsable leases are judged by file age
/// since the holder may still be writing one.
fn is_stale(path: &Path, record: Option<&LeaseRecord>, ttl: Duration) -> bool {
    match record {
        Some(r) => {
            let age = Utc::now().signed_duration_since(r.acquired_at);
            age.to_std().map(|a| a > ttl).unwrap_or(false)
        }
        None => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .map(|age| age > ttl)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(dir: &Path) -> ControlConfig {
        let mut cfg = ControlConfig::new("hadoop", dir, "/opt/java", "nn".into());
        cfg.lock_path = dir.join("run").join("control.lock");
        cfg
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path());

        let held = ControlLock::acquire(&cfg, "start").unwrap();
        let err = ControlLock::acquire(&cfg, "stop").unwrap_err();
        match err {
            ControlError::Locked { holder } => assert!(holder.contains("start by hadoop")),
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(held);
        assert!(!cfg.lock_path.exists());
        assert!(ControlLock::acquire(&cfg, "stop").is_ok());
    }

    #[test]
    fn test_stale_lease_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path());
        std::fs::create_dir_all(cfg.lock_path.parent().unwrap()).unwrap();

        let stale = LeaseRecord {
            owner: Uuid::new_v4(),
            pid: 1,
            operator: "hadoop".into(),
            action: "restart".into(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(&cfg.lock_path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let lock = ControlLock::acquire(&cfg, "start").unwrap();
        let current = read_lease(lock.path()).unwrap();
        assert_eq!(current.action, "start");
        assert_ne!(current.owner, stale.owner);
    }

    #[test]
    fn test_fresh_unreadable_lease_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path());
        std::fs::create_dir_all(cfg.lock_path.parent().unwrap()).unwrap();
        std::fs::write(&cfg.lock_path, b"").unwrap();

        assert!(matches!(
            ControlLock::acquire(&cfg, "start"),
            Err(ControlError::Locked { .. })
        ));
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_leaves_no_lease() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path());
        std::fs::create_dir_all(cfg.lock_path.parent().unwrap()).unwrap();
        std::fs::write(&cfg.lock_path, b"").unwrap();

        assert!(write_lease(&cfg.lock_path, FullDisk, b"{}").is_err());
        assert!(!cfg.lock_path.exists());
        assert!(ControlLock::acquire(&cfg, "start").is_ok());
    }
}
