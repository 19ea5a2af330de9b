//! Staged pipeline execution.
//!
//! `Init -> Training -> LocatingCheckpoint -> Merging -> Converting ->
//! Quantizing -> WritingDescriptors -> Done`, with `Failed` reachable from
//! every non-terminal state. Each state issues at most one external call per
//! artifact and advances only on success. Nothing is retried or rolled back.

use crate::commands::{CommandBuilder, DescriptorFile};
use crate::config::{PipelineConfig, Toolchain};
use crate::error::{PipelineError, PipelineResult};
use crate::invocation::{Invocation, Stage};
use crate::locator::CheckpointRef;
use crate::progress::{ProgressEvent, ProgressSink};
use chrono::{DateTime, Utc};
use kiln_exec::{Environment, ExecOutput};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type SignalFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Produces a future that resolves when the operator asks to stop. Called
/// once per stage.
pub type InterruptSignal<'a> = Box<dyn Fn() -> SignalFuture<'a> + Send + Sync + 'a>;

/// Identifier for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// First eight characters, for log prefixes.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Training,
    LocatingCheckpoint,
    Merging,
    Converting,
    Quantizing,
    WritingDescriptors,
    Done,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_dir: String,
    pub checkpoint: CheckpointRef,
    pub merged_model: String,
    pub converted_file: String,
    pub quantized_file: Option<String>,
    pub descriptors: Vec<DescriptorFile>,
    pub transitions: Vec<PipelineState>,
}

/// One pipeline run against one execution environment.
pub struct Pipeline<'a> {
    env: &'a dyn Environment,
    builder: CommandBuilder,
    progress: &'a dyn ProgressSink,
    run_id: RunId,
    state: PipelineState,
    transitions: Vec<PipelineState>,
    interrupt: Option<InterruptSignal<'a>>,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        env: &'a dyn Environment,
        config: PipelineConfig,
        toolchain: Toolchain,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            env,
            builder: CommandBuilder::new(config, toolchain),
            progress,
            run_id: RunId::new(),
            state: PipelineState::Init,
            transitions: vec![PipelineState::Init],
            interrupt: Some(ctrl_c_signal()),
        }
    }

    /// Whether Ctrl-C aborts the in-flight stage. Enabled by default.
    #[must_use]
    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.interrupt = if enabled { Some(ctrl_c_signal()) } else { None };
        self
    }

    /// Replaces Ctrl-C with another interrupt source.
    #[must_use]
    pub fn with_interrupt_signal<F, Fut>(mut self, signal: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = ()> + Send + 'a,
    {
        self.interrupt = Some(Box::new(move || -> SignalFuture<'a> { Box::pin(signal()) }));
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, starting with `Init`.
    #[must_use]
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    #[must_use]
    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    /// Runs every stage in order, stopping at the first failure.
    pub async fn run(&mut self) -> PipelineResult<PipelineReport> {
        if self.state != PipelineState::Init {
            return Err(PipelineError::Config(format!(
                "pipeline run {} already finished in state {:?}",
                self.run_id, self.state
            )));
        }

        let started_at = Utc::now();
        match self.run_stages(started_at).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(run_id = %self.run_id, stage = ?e.stage(), error = %e, "pipeline failed");
                self.enter(PipelineState::Failed);
                self.progress.on_event(ProgressEvent::Failed {
                    run_id: self.run_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self, started_at: DateTime<Utc>) -> PipelineResult<PipelineReport> {
        self.validate()?;
        self.ensure_environment().await?;
        self.progress.on_event(ProgressEvent::Started {
            run_id: self.run_id.clone(),
            environment: self.env.name().to_string(),
        });

        self.enter(PipelineState::Training);
        let training = self.builder.training();
        self.execute(&training).await?;

        self.enter(PipelineState::LocatingCheckpoint);
        let locator = self.builder.locator();
        let listing = self.execute(&locator.query()).await?;
        let checkpoint = locator.resolve(&listing)?;
        info!(run_id = %self.run_id, checkpoint = %checkpoint, "located checkpoint");
        self.progress.on_event(ProgressEvent::Message {
            run_id: self.run_id.clone(),
            message: format!("using checkpoint {checkpoint}"),
        });

        self.enter(PipelineState::Merging);
        let merge = self.builder.merge(&checkpoint);
        self.execute(&merge).await?;

        self.enter(PipelineState::Converting);
        let conversion = self.builder.conversion();
        self.execute(&conversion).await?;

        self.enter(PipelineState::Quantizing);
        let quantized_file = if let Some(quantization) = self.builder.quantization() {
            self.execute(&quantization).await?;
            Some(self.builder.layout().quantized_file(&self.builder.config().quantization))
        } else {
            self.progress.on_event(ProgressEvent::StageSkipped {
                run_id: self.run_id.clone(),
                stage: Stage::Quantization,
                reason: "no quantization scheme".to_string(),
            });
            None
        };

        self.enter(PipelineState::WritingDescriptors);
        let descriptors = self.builder.descriptor_files();
        for descriptor in &descriptors {
            self.write_descriptor(descriptor).await?;
        }

        self.enter(PipelineState::Done);
        self.progress.on_event(ProgressEvent::Finished { run_id: self.run_id.clone() });

        let layout = self.builder.layout();
        Ok(PipelineReport {
            run_id: self.run_id.clone(),
            environment: self.env.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            output_dir: layout.root().to_string(),
            checkpoint,
            merged_model: layout.merged_model_dir(),
            converted_file: layout.converted_file(),
            quantized_file,
            descriptors,
            transitions: self.transitions.clone(),
        })
    }

    fn validate(&self) -> PipelineResult<()> {
        self.builder.config().validate()?;
        if self.builder.toolchain().format_extension.trim().is_empty() {
            return Err(PipelineError::Config("toolchain.format_extension must not be empty".to_string()));
        }
        Ok(())
    }

    async fn ensure_environment(&self) -> PipelineResult<()> {
        let name = self.env.name().to_string();
        match self.env.is_running().await {
            Ok(true) => {
                debug!(environment = %name, "environment is running");
                Ok(())
            }
            Ok(false) => Err(PipelineError::EnvironmentUnavailable { name, reason: "not running".to_string() }),
            Err(e) => Err(PipelineError::EnvironmentUnavailable { name, reason: e.to_string() }),
        }
    }

    async fn write_descriptor(&self, descriptor: &DescriptorFile) -> PipelineResult<()> {
        let write = self.builder.descriptor_write(descriptor);
        match self.execute(&write).await {
            Ok(_) => {
                info!(run_id = %self.run_id, file = %descriptor.path, "wrote descriptor");
                Ok(())
            }
            Err(PipelineError::StageFailed { stderr, .. }) => {
                Err(PipelineError::DescriptorWrite { file: descriptor.path.clone(), reason: stderr })
            }
            Err(PipelineError::Launch { source, .. }) => {
                Err(PipelineError::DescriptorWrite { file: descriptor.path.clone(), reason: source.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    /// Runs one invocation and fails unless it exits zero.
    async fn execute(&self, invocation: &Invocation) -> PipelineResult<ExecOutput> {
        let stage = invocation.stage;
        let command = invocation.command.to_shell_string();
        info!(run_id = %self.run_id, stage = %stage, "running stage");
        debug!(stage = %stage, command = %command, "invocation");
        self.progress.on_event(ProgressEvent::StageStarted {
            run_id: self.run_id.clone(),
            stage,
            command,
        });

        let call = self.env.execute(&invocation.command, invocation.mode());
        let result = if let Some(signal) = &self.interrupt {
            tokio::select! {
                result = call => result,
                () = signal() => {
                    warn!(stage = %stage, "interrupted");
                    return Err(PipelineError::Interrupted { stage });
                }
            }
        } else {
            call.await
        };

        let output = result.map_err(|source| PipelineError::Launch { stage, source })?;
        if !output.success {
            warn!(stage = %stage, exit_code = ?output.exit_code, stderr = %output.stderr.trim(), "stage failed");
            return Err(PipelineError::StageFailed {
                stage,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        self.progress.on_event(ProgressEvent::StageFinished { run_id: self.run_id.clone(), stage });
        Ok(output)
    }

    fn enter(&mut self, state: PipelineState) {
        debug!(run_id = %self.run_id, from = ?self.state, to = ?state, "transition");
        self.state = state;
        self.transitions.push(state);
    }
}

fn ctrl_c_signal<'a>() -> InterruptSignal<'a> {
    Box::new(|| -> SignalFuture<'a> { Box::pin(ctrl_c()) })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_display_is_short() {
        let id = RunId::new();
        assert_eq!(id.0.len(), 36);
        assert_eq!(id.to_string().len(), 8);
        assert!(id.0.starts_with(&id.to_string()));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Quantizing.is_terminal());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineState::WritingDescriptors).unwrap();
        assert_eq!(json, "\"writing_descriptors\"");
    }
}
