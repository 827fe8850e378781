//! External process execution

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A process to run on the workspace host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Split a command line into program and arguments
    pub fn from_command(command: &[String], cwd: impl Into<PathBuf>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// The command line as one string, for messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a launched process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Captured standard error
    #[serde(default)]
    pub stderr: String,
}

impl LaunchOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Run the process to completion.
    ///
    /// A non-zero exit is reported through the outcome; errors mean the
    /// process could not be started at all.
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<LaunchOutcome>;
}

/// Launches real processes with `tokio::process`.
///
/// There is no timeout: a hanging tool hangs the step.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<LaunchOutcome> {
        info!(command = %spec.display(), cwd = %spec.cwd.display(), "running");

        let output = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .output()
            .await?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(program = %spec.program, "{line}");
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        for line in stderr.lines() {
            warn!(program = %spec.program, "{line}");
        }

        Ok(LaunchOutcome {
            exit_code: output.status.code(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command() {
        let command = vec!["zipalign".to_string(), "-f".to_string(), "4".to_string()];
        let spec = LaunchSpec::from_command(&command, "/ws").unwrap();
        assert_eq!(spec.program, "zipalign");
        assert_eq!(spec.args, vec!["-f", "4"]);
        assert_eq!(spec.display(), "zipalign -f 4");
        assert!(LaunchSpec::from_command(&[], "/ws").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_launcher_reports_exit_code() {
        let temp = tempfile::TempDir::new().unwrap();
        let ok = LaunchSpec::from_command(&["true".to_string()], temp.path()).unwrap();
        assert!(SystemLauncher.launch(&ok).await.unwrap().is_success());

        let fail = LaunchSpec::from_command(
            &["sh".to_string(), "-c".to_string(), "echo broken >&2; exit 3".to_string()],
            temp.path(),
        )
        .unwrap();
        let outcome = SystemLauncher.launch(&fail).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr.contains("broken"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let spec = LaunchSpec::from_command(
            &["apksmith-no-such-program".to_string()],
            temp.path(),
        )
        .unwrap();
        assert!(SystemLauncher.launch(&spec).await.is_err());
    }
}
