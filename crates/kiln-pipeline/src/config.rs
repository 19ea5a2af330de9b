//! Pipeline configuration: sparse overrides, the fully-defaulted model, and
//! config-file loading.

use crate::error::{PipelineError, PipelineResult};
use kiln_exec::EnvironmentConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_EPOCHS: u32 = 1;
pub const DEFAULT_BATCH_SIZE: u32 = 2;
pub const DEFAULT_LORA_RANK: u32 = 32;
pub const DEFAULT_LORA_ALPHA: u32 = 32;
pub const DEFAULT_WARMUP_STEPS: u32 = 100;
pub const DEFAULT_WEIGHT_DECAY: f64 = 0.01;
pub const DEFAULT_SCHEDULER: &str = "cosine";
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";
pub const DEFAULT_QUANTIZATION: &str = "Q4_K_M";
pub const DEFAULT_DATA_PATH: &str = "./data.json";

/// Caller-supplied overrides. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineOverrides {
    pub epochs: Option<u32>,
    pub batch_size: Option<u32>,
    pub learning_rate: Option<f64>,
    pub lora_rank: Option<u32>,
    pub lora_alpha: Option<u32>,
    pub lora_dropout: Option<f64>,
    pub max_seq_length: Option<u32>,
    pub warmup_steps: Option<u32>,
    pub weight_decay: Option<f64>,
    pub seed: Option<u64>,
    pub scheduler: Option<String>,
    pub resume_from_checkpoint: Option<bool>,
    pub data_path: Option<String>,
    pub output_dir: Option<String>,
    /// Empty string disables quantization.
    pub quantization: Option<String>,
    pub base_model: Option<String>,
    pub chat_template: Option<String>,
}

macro_rules! merge_fields {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(ref value) = $src.$field {
                $dst.$field = Some(value.clone());
            }
        )+
    };
}

impl PipelineOverrides {
    /// Merge another set of overrides into this one.
    ///
    /// Values present in `other` win.
    pub fn merge(&mut self, other: &Self) {
        merge_fields!(self, other;
            epochs, batch_size, learning_rate, lora_rank, lora_alpha, lora_dropout,
            max_seq_length, warmup_steps, weight_decay, seed, scheduler,
            resume_from_checkpoint, data_path, output_dir, quantization,
            base_model, chat_template,
        );
    }
}

/// Quantization scheme identifier, kept in the caller's casing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuantizationScheme(String);

impl QuantizationScheme {
    #[must_use]
    pub fn new(scheme: impl Into<String>) -> Self {
        Self(scheme.into().trim().to_string())
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.0.is_empty()
    }

    /// Token used in file names (caller's casing).
    #[must_use]
    pub fn file_token(&self) -> &str {
        &self.0
    }

    /// Rejects schemes that would escape the output directory once used in
    /// a file name.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.0.contains(['/', '\\']) || self.0.contains("..") {
            return Err(PipelineError::Config(format!(
                "quantization scheme '{}' must not contain path separators or '..'",
                self.0
            )));
        }
        Ok(())
    }

    /// Scheme name passed to the quantize tool.
    #[must_use]
    pub fn tool_argument(&self) -> String {
        self.0.to_uppercase()
    }
}

impl std::fmt::Display for QuantizationScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully-defaulted configuration for one pipeline run. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: Option<f64>,
    pub lora_rank: u32,
    pub lora_alpha: u32,
    pub lora_dropout: Option<f64>,
    pub max_seq_length: Option<u32>,
    pub warmup_steps: u32,
    pub weight_decay: f64,
    pub seed: Option<u64>,
    pub scheduler: String,
    pub resume_from_checkpoint: bool,
    pub data_path: String,
    pub output_dir: String,
    pub quantization: QuantizationScheme,
    /// Accepted for compatibility; has no effect on any invocation.
    pub base_model: Option<String>,
    /// Accepted for compatibility; has no effect on any invocation.
    pub chat_template: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_overrides(PipelineOverrides::default())
    }
}

impl PipelineConfig {
    /// Checks values that end up in paths inside the execution environment.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.output_dir.trim().is_empty() {
            return Err(PipelineError::Config("output_dir must not be empty".to_string()));
        }
        self.quantization.validate()
    }

    /// Apply defaults to every unset field that has one.
    #[must_use]
    pub fn from_overrides(overrides: PipelineOverrides) -> Self {
        Self {
            epochs: overrides.epochs.unwrap_or(DEFAULT_EPOCHS),
            batch_size: overrides.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            learning_rate: overrides.learning_rate,
            lora_rank: overrides.lora_rank.unwrap_or(DEFAULT_LORA_RANK),
            lora_alpha: overrides.lora_alpha.unwrap_or(DEFAULT_LORA_ALPHA),
            lora_dropout: overrides.lora_dropout,
            max_seq_length: overrides.max_seq_length,
            warmup_steps: overrides.warmup_steps.unwrap_or(DEFAULT_WARMUP_STEPS),
            weight_decay: overrides.weight_decay.unwrap_or(DEFAULT_WEIGHT_DECAY),
            seed: overrides.seed,
            scheduler: overrides.scheduler.unwrap_or_else(|| DEFAULT_SCHEDULER.to_string()),
            resume_from_checkpoint: overrides.resume_from_checkpoint.unwrap_or(false),
            data_path: overrides.data_path.unwrap_or_else(|| DEFAULT_DATA_PATH.to_string()),
            output_dir: overrides.output_dir.unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            quantization: QuantizationScheme::new(
                overrides.quantization.unwrap_or_else(|| DEFAULT_QUANTIZATION.to_string()),
            ),
            base_model: overrides.base_model,
            chat_template: overrides.chat_template,
        }
    }
}

/// External programs and fixed locations inside the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Toolchain {
    /// Training launcher.
    pub tune: String,
    /// Fine-tuning recipe name.
    pub recipe: String,
    /// Base-model recipe configuration.
    pub recipe_config: String,
    pub python: String,
    pub merge_script: String,
    pub convert_script: String,
    pub quantize: String,
    /// Directory under which `output_dir` is resolved.
    pub data_root: String,
    /// Extension of the converted binary format.
    pub format_extension: String,
    /// Shell used for descriptor writes.
    pub shell: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            tune: "tune".to_string(),
            recipe: "lora_finetune_single_device".to_string(),
            recipe_config: "/app/torchtune/configs/llama3_1/8B_qlora_single_device.yaml".to_string(),
            python: "python".to_string(),
            merge_script: "/app/merge_lora.py".to_string(),
            convert_script: "/app/llama.cpp/convert_hf_to_gguf.py".to_string(),
            quantize: "/app/llama.cpp/llama-quantize".to_string(),
            data_root: "/var/kolo_data/torchtune".to_string(),
            format_extension: "gguf".to_string(),
            shell: "sh".to_string(),
        }
    }
}

/// On-disk configuration file (`kiln.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineOverrides,
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    #[serde(default)]
    pub toolchain: Option<Toolchain>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".kiln")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("kiln.toml")
    }

    /// Discover and load configuration files.
    ///
    /// Loads `~/.kiln/config.toml`, then `./kiln.toml`, then `explicit` if
    /// given. Missing discovered files are skipped; a missing or invalid
    /// explicit file is an error.
    pub fn discover_and_load(explicit: Option<&Path>) -> PipelineResult<Self> {
        let mut config = Self::default();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(found),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file"),
            }
        }

        if let Some(path) = explicit {
            config.merge(Self::load_from_file(path)?);
        }

        Ok(config)
    }

    /// Merge another file into this one. `[pipeline]` merges per field;
    /// `[environment]` and `[toolchain]` replace when present.
    pub fn merge(&mut self, other: Self) {
        self.pipeline.merge(&other.pipeline);
        if other.environment.is_some() {
            self.environment = other.environment;
        }
        if other.toolchain.is_some() {
            self.toolchain = other.toolchain;
        }
    }
}
