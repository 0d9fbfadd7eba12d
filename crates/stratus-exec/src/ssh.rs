use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

use stratus_common::{ControlConfig, ExecError, NodeId};

use crate::types::{CommandOutput, RemoteExecutor};

/// Exit status ssh itself uses for connection and authentication failures.
const SSH_FAILURE_STATUS: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: u16,
    pub user: Option<String>,
    pub connect_timeout: Duration,
    pub reachability_timeout: Duration,
    pub command_timeout: Duration,
    /// Bound for layer control scripts.
    pub script_timeout: Duration,
}

impl SshOptions {
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            port: config.ssh_port,
            user: config.ssh_user.clone(),
            connect_timeout: config.timeouts.ssh_connect,
            reachability_timeout: config.timeouts.reachability,
            command_timeout: config.timeouts.command,
            script_timeout: config.convergence.timeout.max(config.timeouts.command),
        }
    }
}

/// Runs coordinator commands locally and everything else over password-less ssh.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    local: NodeId,
    opts: SshOptions,
    env: Vec<(String, String)>,
}

impl SshExecutor {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            local: config.coordinator.clone(),
            opts: SshOptions::from_config(config),
            env: config.command_env(),
        }
    }

    fn is_local(&self, node: &NodeId) -> bool {
        node == &self.local || node.is_loopback()
    }

    /// Arguments passed to the `ssh` binary for a remote command.
    fn ssh_args(&self, node: &NodeId, command: &str) -> Vec<String> {
        let connect_secs = self.opts.connect_timeout.as_secs().max(1);
        let target = match &self.opts.user {
            Some(user) => format!("{}@{}", user, node),
            None => node.to_string(),
        };
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.opts.port.to_string(),
            target,
            command.to_string(),
        ]
    }

    fn build_command(&self, node: &NodeId, command: &str) -> Command {
        let mut cmd = if self.is_local(node) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.ssh_args(node, command));
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_bounded(
        &self,
        node: &NodeId,
        command: &str,
        limit: Duration,
    ) -> Result<CommandOutput, ExecError> {
        tracing::debug!(%node, %command, ?limit, "running command");
        let mut cmd = self.build_command(node, command);

        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExecError::Spawn {
                    node: node.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ExecError::Timeout {
                    node: node.clone(),
                    command: command.to_string(),
                    after: limit,
                })
            }
        };

        let out = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.is_local(node) && out.status == SSH_FAILURE_STATUS {
            return Err(classify_ssh_failure(node, &out.stderr));
        }
        Ok(out)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn is_reachable(&self, node: &NodeId) -> bool {
        if self.is_local(node) {
            return true;
        }
        let addr = (node.as_str(), self.opts.port);
        match timeout(self.opts.reachability_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(%node, error=%e, "reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(%node, "reachability probe timed out");
                false
            }
        }
    }

    async fn run_command(&self, node: &NodeId, command: &str) -> Result<CommandOutput, ExecError> {
        self.run_bounded(node, command, self.opts.command_timeout).await
    }

    async fn run_script(&self, node: &NodeId, command: &str) -> Result<CommandOutput, ExecError> {
        self.run_bounded(node, command, self.opts.script_timeout).await
    }
}

/// Map an ssh failure (exit 255) to a transport error from its stderr.
fn classify_ssh_failure(node: &NodeId, stderr: &str) -> ExecError {
    let lower = stderr.to_ascii_lowercase();
    let auth_markers = [
        "permission denied",
        "host key verification failed",
        "no supported authentication",
        "too many authentication failures",
    ];
    if auth_markers.iter().any(|m| lower.contains(m)) {
        let detail = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("authentication failed")
            .to_string();
        return ExecError::AuthRejected {
            node: node.clone(),
            detail,
        };
    }
    ExecError::Unreachable { node: node.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_executor(user: Option<&str>) -> SshExecutor {
        let mut cfg = ControlConfig::new("hadoop", "/opt/hadoop", "/opt/java", "nn".into());
        cfg.ssh_user = user.map(str::to_string);
        cfg.ssh_port = 2222;
        SshExecutor::new(&cfg)
    }

    #[test]
    fn test_ssh_args() {
        let exec = make_executor(Some("hadoop"));
        let args = exec.ssh_args(&"w1".into(), "ps -eo args=");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert_eq!(args[args.len() - 2], "hadoop@w1");
        assert_eq!(args[args.len() - 1], "ps -eo args=");
    }

    #[test]
    fn test_local_detection() {
        let exec = make_executor(None);
        assert!(exec.is_local(&"nn".into()));
        assert!(exec.is_local(&"localhost".into()));
        assert!(!exec.is_local(&"w1".into()));
    }

    #[test]
    fn test_classify_ssh_failure() {
        let node: NodeId = "w1".into();
        let auth = classify_ssh_failure(&node, "hadoop@w1: Permission denied (publickey).\n");
        assert!(matches!(auth, ExecError::AuthRejected { .. }));
        let down = classify_ssh_failure(&node, "ssh: connect to host w1 port 22: No route to host");
        assert!(matches!(down, ExecError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_local_command_runs_with_env() {
        let exec = make_executor(None);
        let out = exec
            .run_command(&"nn".into(), "echo $HADOOP_HOME")
            .await
            .expect("local sh should run");
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "/opt/hadoop");
    }

    #[tokio::test]
    async fn test_scripts_outlive_command_timeout() {
        let mut cfg = ControlConfig::new("hadoop", "/opt/hadoop", "/opt/java", "nn".into());
        cfg.timeouts.command = Duration::from_millis(50);
        cfg.convergence.timeout = Duration::from_secs(10);
        let exec = SshExecutor::new(&cfg);
        let node: NodeId = "nn".into();

        let err = exec.run_command(&node, "sleep 0.3").await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));

        let out = exec.run_script(&node, "sleep 0.3; echo started").await.unwrap();
        assert_eq!(out.stdout.trim(), "started");
    }
}
