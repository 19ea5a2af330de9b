//! Kiln Pipeline
//!
//! Fine-tune, merge, convert and quantize a language model inside a remote
//! execution environment:
//! - Configuration with defaults and layered config files (`PipelineConfig`)
//! - Pure command construction for every stage (`CommandBuilder`)
//! - Checkpoint discovery (`ArtifactLocator`)
//! - The staged, fail-fast orchestrator (`Pipeline`)
//! - Question/answer generation with LLM providers (`generate`)
//! - Question/answer dataset assembly (`dataset`)

pub mod commands;
pub mod config;
pub mod dataset;
pub mod error;
pub mod generate;
pub mod invocation;
pub mod layout;
pub mod locator;
pub mod orchestrator;
pub mod progress;

pub use commands::{CommandBuilder, DescriptorFile, PLACEHOLDER_CHECKPOINT};
pub use config::{ConfigFile, PipelineConfig, PipelineOverrides, QuantizationScheme, Toolchain};
pub use dataset::{pair_directory, write_jsonl, DatasetId, DatasetSummary, GroupStats, PairingOutcome};
pub use error::{PipelineError, PipelineResult};
pub use generate::{GenerationConfig, GenerationOptions, GenerationReport, QaGenerator, QaLayout};
pub use invocation::{Invocation, Stage};
pub use layout::OutputLayout;
pub use locator::{select_latest, ArtifactLocator, CheckpointRef, LISTING_SCRIPT_NAME};
pub use orchestrator::{InterruptSignal, Pipeline, PipelineReport, PipelineState, RunId};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, RecordingProgressSink, StdoutProgressSink};
