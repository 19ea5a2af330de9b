use crate::invocation::Stage;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("execution environment '{name}' is not available: {reason}")]
    EnvironmentUnavailable { name: String, reason: String },

    #[error("{stage} stage failed (exit code {}): {}", display_code(.exit_code), display_stderr(.stderr))]
    StageFailed { stage: Stage, exit_code: Option<i32>, stderr: String },

    #[error("{stage} stage could not be launched: {source}")]
    Launch {
        stage: Stage,
        #[source]
        source: kiln_exec::ExecError,
    },

    #[error("no checkpoint found under {dir} (expected epoch_<N> directories)")]
    NoCheckpoint { dir: String },

    #[error("failed to write descriptor {file}: {}", display_stderr(.reason))]
    DescriptorWrite { file: String, reason: String },

    #[error("{stage} stage interrupted by operator")]
    Interrupted { stage: Stage },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Provider(#[from] crate::generate::ProviderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Stage the error is attributed to, when it came from one.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. }
            | Self::Launch { stage, .. }
            | Self::Interrupted { stage } => Some(*stage),
            Self::NoCheckpoint { .. } => Some(Stage::LocateCheckpoint),
            Self::DescriptorWrite { .. } => Some(Stage::Descriptor),
            _ => None,
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

fn display_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() { "<no stderr>".to_string() } else { trimmed.to_string() }
}
