use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stratus_common::config::{INSTALL_ROOT_VAR, RUNTIME_HOME_VAR};
use stratus_common::{
    ControlConfig, ConvergencePolicy, NodeId, PreconditionError, ProbeTimeouts, WebPorts,
};

/// Installation root assumed when nothing else points at one.
pub const FALLBACK_INSTALL_ROOT: &str = "/usr/local/hadoop";

/// Facts about the invoking process. Gathered once so the gate itself stays
/// a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct GateInputs {
    pub user: Option<String>,
    pub env: HashMap<String, String>,
    /// `hadoop` on PATH, symlinks resolved.
    pub hadoop_binary: Option<PathBuf>,
    /// `java` on PATH, symlinks resolved.
    pub java_binary: Option<PathBuf>,
    pub hostname: String,
}

impl GateInputs {
    pub fn from_process() -> Self {
        let user = nix::unistd::User::from_uid(nix::unistd::geteuid())
            .ok()
            .flatten()
            .map(|u| u.name);
        Self {
            user,
            env: std::env::vars().collect(),
            hadoop_binary: locate("hadoop"),
            java_binary: locate("java"),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }

    fn var(&self, name: &str) -> Option<PathBuf> {
        self.env
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

fn locate(binary: &str) -> Option<PathBuf> {
    let found = which::which(binary).ok()?;
    Some(std::fs::canonicalize(&found).unwrap_or(found))
}

/// Operational knobs copied verbatim into the resulting [`ControlConfig`].
#[derive(Debug, Clone)]
pub struct Tuning {
    pub timeouts: ProbeTimeouts,
    pub probe_concurrency: usize,
    pub convergence: ConvergencePolicy,
    pub ssh_port: u16,
    pub ssh_user: Option<String>,
    pub web: WebPorts,
    pub log_tail_lines: usize,
    /// Overrides `<install_root>/run/stratus-control.lock`.
    pub lock_path: Option<PathBuf>,
    pub lock_ttl: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            timeouts: ProbeTimeouts::default(),
            probe_concurrency: 8,
            convergence: ConvergencePolicy::default(),
            ssh_port: 22,
            ssh_user: None,
            web: WebPorts::default(),
            log_tail_lines: 20,
            lock_path: None,
            lock_ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub operator: String,
    pub allow_any_operator: bool,
    pub install_root: Option<PathBuf>,
    pub runtime_home: Option<PathBuf>,
    pub coordinator: Option<NodeId>,
    pub tuning: Tuning,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            operator: "hadoop".to_string(),
            allow_any_operator: false,
            install_root: None,
            runtime_home: None,
            coordinator: None,
            tuning: Tuning::default(),
        }
    }
}

/// Validates the invocation environment and produces the one configuration
/// value every later component reads.
#[derive(Debug, Clone)]
pub struct PreconditionGate {
    settings: GateSettings,
}

impl PreconditionGate {
    pub fn new(settings: GateSettings) -> Self {
        Self { settings }
    }

    pub fn check(&self, inputs: &GateInputs) -> Result<ControlConfig, PreconditionError> {
        self.check_operator(inputs)?;
        let install_root = self.install_root(inputs)?;
        let runtime_home = self.runtime_home(inputs)?;

        let coordinator = self
            .settings
            .coordinator
            .clone()
            .unwrap_or_else(|| NodeId::new(inputs.hostname.clone()));

        let mut config = ControlConfig::new(
            self.settings.operator.clone(),
            install_root,
            runtime_home,
            coordinator,
        );
        let t = &self.settings.tuning;
        config.timeouts = t.timeouts;
        config.probe_concurrency = t.probe_concurrency.max(1);
        config.convergence = t.convergence;
        config.ssh_port = t.ssh_port;
        config.ssh_user = t.ssh_user.clone();
        config.web = t.web;
        config.log_tail_lines = t.log_tail_lines;
        config.lock_ttl = t.lock_ttl;
        if let Some(lock_path) = &t.lock_path {
            config.lock_path = lock_path.clone();
        }

        tracing::debug!(
            install_root = %config.install_root.display(),
            runtime_home = %config.runtime_home.display(),
            coordinator = %config.coordinator,
            "preconditions satisfied"
        );
        Ok(config)
    }

    fn check_operator(&self, inputs: &GateInputs) -> Result<(), PreconditionError> {
        let actual = inputs.user.as_deref().unwrap_or("<unknown>");
        if actual == self.settings.operator {
            return Ok(());
        }
        if self.settings.allow_any_operator {
            tracing::warn!(
                expected = %self.settings.operator,
                actual,
                "operator check skipped"
            );
            return Ok(());
        }
        Err(PreconditionError::WrongOperator {
            expected: self.settings.operator.clone(),
            actual: actual.to_string(),
        })
    }

    fn install_root(&self, inputs: &GateInputs) -> Result<PathBuf, PreconditionError> {
        let path = inputs
            .var(INSTALL_ROOT_VAR)
            .or_else(|| self.settings.install_root.clone())
            .or_else(|| {
                inputs
                    .hadoop_binary
                    .as_deref()
                    .and_then(strip_bin_suffix)
            })
            .unwrap_or_else(|| PathBuf::from(FALLBACK_INSTALL_ROOT));

        if !path.is_dir() {
            return Err(PreconditionError::MissingInstallation { path });
        }
        Ok(path)
    }

    fn runtime_home(&self, inputs: &GateInputs) -> Result<PathBuf, PreconditionError> {
        if let Some(home) = inputs
            .var(RUNTIME_HOME_VAR)
            .or_else(|| self.settings.runtime_home.clone())
        {
            if home.is_dir() {
                return Ok(home);
            }
            tracing::warn!(path = %home.display(), "{} does not exist, deriving from PATH", RUNTIME_HOME_VAR);
        }

        let java = inputs
            .java_binary
            .as_deref()
            .ok_or_else(|| PreconditionError::UnresolvedRuntime {
                var: RUNTIME_HOME_VAR,
                reason: "unset and no java binary on PATH".to_string(),
            })?;
        let home = derive_runtime_home(java).ok_or_else(|| PreconditionError::UnresolvedRuntime {
            var: RUNTIME_HOME_VAR,
            reason: format!("cannot derive a home from {}", java.display()),
        })?;
        if !home.is_dir() {
            return Err(PreconditionError::UnresolvedRuntime {
                var: RUNTIME_HOME_VAR,
                reason: format!("derived {} does not exist", home.display()),
            });
        }
        tracing::info!(path = %home.display(), "derived {}", RUNTIME_HOME_VAR);
        Ok(home)
    }
}

/// `<root>/bin/<tool>` -> `<root>`.
fn strip_bin_suffix(binary: &Path) -> Option<PathBuf> {
    let bin = binary.parent()?;
    if bin.file_name()? != "bin" {
        return None;
    }
    bin.parent().map(Path::to_path_buf)
}

/// `<home>/bin/java` or `<home>/jre/bin/java` -> `<home>`.
pub fn derive_runtime_home(java: &Path) -> Option<PathBuf> {
    let home = strip_bin_suffix(java)?;
    if home.file_name().is_some_and(|n| n == "jre") {
        return home.parent().map(Path::to_path_buf);
    }
    Some(home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_inputs(user: &str) -> GateInputs {
        GateInputs {
            user: Some(user.to_string()),
            hostname: "nn".to_string(),
            ..Default::default()
        }
    }

    fn make_dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hadoop");
        let java = dir.path().join("jdk");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::create_dir_all(java.join("jre").join("bin")).unwrap();
        (dir, root, java)
    }

    #[test]
    fn test_wrong_operator_fails_first() {
        let gate = PreconditionGate::new(GateSettings {
            install_root: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        });
        let err = gate.check(&make_inputs("root")).unwrap_err();
        assert!(matches!(err, PreconditionError::WrongOperator { ref actual, .. } if actual == "root"));
    }

    #[test]
    fn test_missing_installation() {
        let gate = PreconditionGate::new(GateSettings {
            install_root: Some(PathBuf::from("/nonexistent/hadoop")),
            ..Default::default()
        });
        let err = gate.check(&make_inputs("hadoop")).unwrap_err();
        assert!(matches!(err, PreconditionError::MissingInstallation { .. }));
    }

    #[test]
    fn test_env_wins_and_runtime_is_derived() {
        let (_dir, root, java) = make_dirs();
        let mut inputs = make_inputs("hadoop");
        inputs
            .env
            .insert(INSTALL_ROOT_VAR.to_string(), root.to_string_lossy().into_owned());
        inputs.java_binary = Some(java.join("jre").join("bin").join("java"));

        let gate = PreconditionGate::new(GateSettings {
            install_root: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        });
        let cfg = gate.check(&inputs).unwrap();
        assert_eq!(cfg.install_root, root);
        assert_eq!(cfg.runtime_home, java);
        assert_eq!(cfg.coordinator.as_str(), "nn");
        assert!(cfg
            .command_env()
            .contains(&(RUNTIME_HOME_VAR.to_string(), java.to_string_lossy().into_owned())));
    }

    #[test]
    fn test_install_root_from_binary() {
        let (_dir, root, java) = make_dirs();
        let mut inputs = make_inputs("hadoop");
        inputs.hadoop_binary = Some(root.join("bin").join("hadoop"));
        inputs.java_binary = Some(java.join("bin").join("java"));

        let cfg = PreconditionGate::new(GateSettings::default())
            .check(&inputs)
            .unwrap();
        assert_eq!(cfg.install_root, root);
    }

    #[test]
    fn test_unresolved_runtime() {
        let (_dir, root, _java) = make_dirs();
        let gate = PreconditionGate::new(GateSettings {
            install_root: Some(root),
            ..Default::default()
        });
        let err = gate.check(&make_inputs("hadoop")).unwrap_err();
        assert!(matches!(err, PreconditionError::UnresolvedRuntime { var: "JAVA_HOME", .. }));
    }

    #[test]
    fn test_allow_any_operator_and_tuning() {
        let (_dir, root, java) = make_dirs();
        let mut tuning = Tuning {
            probe_concurrency: 0,
            lock_path: Some(PathBuf::from("/tmp/stratus.lock")),
            ..Default::default()
        };
        tuning.ssh_port = 2222;
        let gate = PreconditionGate::new(GateSettings {
            allow_any_operator: true,
            install_root: Some(root),
            runtime_home: Some(java.clone()),
            coordinator: Some("master-1".into()),
            tuning,
            ..Default::default()
        });
        let cfg = gate.check(&make_inputs("root")).unwrap();
        assert_eq!(cfg.runtime_home, java);
        assert_eq!(cfg.coordinator.as_str(), "master-1");
        assert_eq!(cfg.probe_concurrency, 1);
        assert_eq!(cfg.ssh_port, 2222);
        assert_eq!(cfg.lock_path, PathBuf::from("/tmp/stratus.lock"));
    }

    #[test]
    fn test_derive_runtime_home() {
        assert_eq!(
            derive_runtime_home(Path::new("/usr/lib/jvm/java-8/jre/bin/java")),
            Some(PathBuf::from("/usr/lib/jvm/java-8"))
        );
        assert_eq!(
            derive_runtime_home(Path::new("/usr/lib/jvm/java-17/bin/java")),
            Some(PathBuf::from("/usr/lib/jvm/java-17"))
        );
        assert_eq!(derive_runtime_home(Path::new("/java")), None);
    }
}
