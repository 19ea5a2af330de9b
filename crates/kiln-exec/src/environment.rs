//! Execution environment trait and factory.

use crate::command::{CommandSpec, ExecMode, ExecOutput};
use crate::config::{EnvironmentConfig, EnvironmentKind};
use crate::container::ContainerEnvironment;
use crate::error::ExecResult;
use crate::process;
use async_trait::async_trait;
use tokio::process::Command;

/// An already-running place where invocations execute.
///
/// Implementations never create or destroy the environment; they only
/// check that it is up and run commands inside it.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Reports whether the environment is up and accepting invocations.
    ///
    /// # Errors
    /// Returns error if the environment could not be queried at all
    /// (for example, the container runtime is not installed).
    async fn is_running(&self) -> ExecResult<bool>;

    /// Runs one command to completion.
    ///
    /// A non-zero exit is reported through [`ExecOutput::success`], not as
    /// an error.
    ///
    /// # Errors
    /// Returns error if the process could not be launched.
    async fn execute(&self, command: &CommandSpec, mode: ExecMode) -> ExecResult<ExecOutput>;
}

/// Factory for environment handles.
pub struct EnvironmentFactory;

impl EnvironmentFactory {
    /// Creates the environment described by `config`.
    #[must_use]
    pub fn create(config: &EnvironmentConfig) -> Box<dyn Environment> {
        match config.kind {
            EnvironmentKind::Local => Box::new(LocalEnvironment::new(config.clone())),
            EnvironmentKind::Docker | EnvironmentKind::Podman => {
                Box::new(ContainerEnvironment::new(config.clone()))
            }
        }
    }
}

/// Runs invocations directly on the host.
pub struct LocalEnvironment {
    config: EnvironmentConfig,
    name: String,
}

impl LocalEnvironment {
    #[must_use]
    pub fn new(config: EnvironmentConfig) -> Self {
        let name = config.display_name();
        Self { config, name }
    }
}

impl Default for LocalEnvironment {
    fn default() -> Self {
        Self::new(EnvironmentConfig::local())
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_running(&self) -> ExecResult<bool> {
        Ok(true)
    }

    async fn execute(&self, command: &CommandSpec, mode: ExecMode) -> ExecResult<ExecOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.config.env);

        process::run(cmd, mode, &command.program).await
    }
}
