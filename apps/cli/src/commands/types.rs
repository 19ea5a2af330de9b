//! Command type definitions shared between main.rs and tests.

use clap::{Args, Subcommand};
use kiln_exec::EnvironmentKind;
use kiln_pipeline::PipelineOverrides;
use std::path::PathBuf;

/// Where the pipeline runs and which config file to read.
#[derive(Args, Debug, Clone, Default)]
pub struct EnvironmentArgs {
    /// Explicit config file, applied after ~/.kiln/config.toml and ./kiln.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container name of the execution environment
    #[arg(long)]
    pub container: Option<String>,

    /// Container runtime (docker, podman, local)
    #[arg(long)]
    pub runtime: Option<EnvironmentKind>,
}

/// One flag per pipeline configuration field.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Number of training epochs [default: 1]
    #[arg(long)]
    pub epochs: Option<u32>,

    /// Training batch size [default: 2]
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Optimizer learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// LoRA rank [default: 32]
    #[arg(long)]
    pub lora_rank: Option<u32>,

    /// LoRA alpha [default: 32]
    #[arg(long)]
    pub lora_alpha: Option<u32>,

    /// LoRA dropout
    #[arg(long)]
    pub lora_dropout: Option<f64>,

    /// Tokenizer maximum sequence length
    #[arg(long)]
    pub max_seq_length: Option<u32>,

    /// Scheduler warmup steps [default: 100]
    #[arg(long)]
    pub warmup_steps: Option<u32>,

    /// Optimizer weight decay [default: 0.01]
    #[arg(long)]
    pub weight_decay: Option<f64>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Learning-rate scheduler kind [default: cosine]
    #[arg(long)]
    pub scheduler: Option<String>,

    /// Resume training from the last checkpoint
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    pub resume_from_checkpoint: Option<bool>,

    /// Training data file inside the environment [default: ./data.json]
    #[arg(long)]
    pub data_path: Option<String>,

    /// Output directory name under the data root [default: outputs]
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Quantization scheme, empty to disable [default: Q4_K_M]
    #[arg(long, value_name = "SCHEME", conflicts_with = "no_quantize")]
    pub quantization: Option<String>,

    /// Skip quantization
    #[arg(long)]
    pub no_quantize: bool,

    /// Base model identifier (accepted, currently unused)
    #[arg(long)]
    pub base_model: Option<String>,

    /// Chat template identifier (accepted, currently unused)
    #[arg(long)]
    pub chat_template: Option<String>,
}

impl OverrideArgs {
    pub fn into_overrides(self) -> PipelineOverrides {
        let quantization = if self.no_quantize { Some(String::new()) } else { self.quantization };
        PipelineOverrides {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            lora_rank: self.lora_rank,
            lora_alpha: self.lora_alpha,
            lora_dropout: self.lora_dropout,
            max_seq_length: self.max_seq_length,
            warmup_steps: self.warmup_steps,
            weight_decay: self.weight_decay,
            seed: self.seed,
            scheduler: self.scheduler,
            resume_from_checkpoint: self.resume_from_checkpoint,
            data_path: self.data_path,
            output_dir: self.output_dir,
            quantization,
            base_model: self.base_model,
            chat_template: self.chat_template,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub environment: EnvironmentArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Print the invocation plan without contacting the environment
    #[arg(long)]
    pub dry_run: bool,

    /// Output the plan or run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DatasetCommand {
    /// Pair generated questions with their answers into a JSONL file
    Pair {
        /// Directory containing questions_<group>.txt files
        #[arg(long)]
        questions: PathBuf,

        /// Directory containing answer_<group>_<N>.txt files
        #[arg(long)]
        answers: PathBuf,

        /// Output JSONL file
        #[arg(short, long, default_value = "data.jsonl")]
        output: PathBuf,

        /// Output summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate questions and answers from source files with an LLM provider
    Generate {
        /// Generation config (YAML)
        #[arg(short, long, default_value = "generate_qa_config.yaml")]
        config: PathBuf,

        /// Maximum provider calls in flight
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u16).range(1..))]
        threads: u16,

        /// Keep the configured file order in prompts
        #[arg(long)]
        no_shuffle: bool,

        /// Output report as JSON
        #[arg(long)]
        json: bool,
    },
}
