//! Docker/Podman container environments.

use crate::command::{CommandSpec, ExecMode, ExecOutput};
use crate::config::EnvironmentConfig;
use crate::environment::Environment;
use crate::error::{ExecError, ExecResult};
use crate::process;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A named, already-running container reached through `docker exec` or
/// `podman exec`.
pub struct ContainerEnvironment {
    config: EnvironmentConfig,
    runtime: &'static str,
    name: String,
}

impl ContainerEnvironment {
    /// Creates a container handle. Nothing is contacted until first use.
    #[must_use]
    pub fn new(config: EnvironmentConfig) -> Self {
        let runtime = config.kind.runtime_binary().unwrap_or("docker");
        let name = config.display_name();
        Self { config, runtime, name }
    }

    /// Arguments for the liveness query.
    fn inspect_args(&self) -> Vec<String> {
        vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            self.config.container.clone(),
        ]
    }

    /// Arguments that run `command` inside the container.
    fn exec_args(&self, command: &CommandSpec, mode: ExecMode) -> Vec<String> {
        let mut args = vec!["exec".to_string()];

        // Interactive-style exec for long-running stages.
        if mode == ExecMode::Stream {
            args.push("-i".to_string());
        }

        if let Some(ref dir) = self.config.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }

        for (key, value) in &self.config.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend(self.config.custom_flags.iter().cloned());
        args.push(self.config.container.clone());
        args.push(command.program.clone());
        args.extend(command.args.iter().cloned());
        args
    }
}

#[async_trait]
impl Environment for ContainerEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_running(&self) -> ExecResult<bool> {
        let mut cmd = Command::new(self.runtime);
        cmd.args(self.inspect_args());

        let output = match process::run(cmd, ExecMode::Capture, self.runtime).await {
            Ok(output) => output,
            Err(ExecError::Launch { reason, .. }) => {
                return Err(ExecError::RuntimeNotFound { runtime: self.runtime.to_string(), reason });
            }
            Err(e) => return Err(e),
        };

        if !output.success {
            debug!(container = %self.config.container, stderr = %output.stderr.trim(), "inspect failed");
            return Ok(false);
        }
        Ok(output.stdout.trim() == "true")
    }

    async fn execute(&self, command: &CommandSpec, mode: ExecMode) -> ExecResult<ExecOutput> {
        let args = self.exec_args(command, mode);
        debug!(container = %self.config.container, command = %command, "container exec");

        let mut cmd = Command::new(self.runtime);
        cmd.args(&args);
        match process::run(cmd, mode, self.runtime).await {
            Err(ExecError::Launch { reason, .. }) => {
                Err(ExecError::RuntimeNotFound { runtime: self.runtime.to_string(), reason })
            }
            other => other,
        }
    }
}
