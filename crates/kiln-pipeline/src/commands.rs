//! Pure translation from configuration to stage invocations.
//!
//! Nothing here performs I/O. Every builder returns a structured argument
//! vector; the executor decides how to deliver it.

use crate::config::{PipelineConfig, Toolchain};
use crate::invocation::{Invocation, Stage};
use crate::layout::OutputLayout;
use crate::locator::{ArtifactLocator, CheckpointRef};
use kiln_exec::CommandSpec;
use serde::{Deserialize, Serialize};

/// Flags the training stage always receives, before the configurable ones.
const FIXED_TRAINING_FLAGS: &[&str] = &[
    "dataset.packed=False",
    "compile=True",
    "loss._component_=torchtune.modules.loss.CEWithChunkedOutputLoss",
    "enable_activation_checkpointing=True",
    "enable_activation_offloading=True",
    "optimizer._component_=torch.optim.AdamW",
    "tokenizer.max_seq_len=2048",
    "gradient_accumulation_steps=1",
];

/// Dataset shape the training stage always receives.
const DATASET_FLAGS: &[&str] = &[
    "dataset._component_=torchtune.datasets.chat_dataset",
    "dataset.source=json",
    "dataset.conversation_column=messages",
    "dataset.conversation_style=openai",
    "dataset.split=train",
];

const SCHEDULER_TEMPLATE: &str = "torchtune.training.lr_schedulers.get_{kind}_schedule_with_warmup";

/// Conversion output precision.
const CONVERSION_OUTTYPE: &str = "f16";

/// Placeholder used when a plan is rendered before training has run.
pub const PLACEHOLDER_CHECKPOINT: &str = "<latest epoch_N checkpoint>";

/// A one-line descriptor file referencing a converted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorFile {
    /// File name inside the output directory.
    pub name: String,
    /// Full path inside the execution environment.
    pub path: String,
    /// The single line written, without the trailing newline.
    pub line: String,
}

/// Builds every stage invocation for one run.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    config: PipelineConfig,
    toolchain: Toolchain,
    layout: OutputLayout,
}

impl CommandBuilder {
    #[must_use]
    pub fn new(config: PipelineConfig, toolchain: Toolchain) -> Self {
        let layout = OutputLayout::new(&toolchain.data_root, &config.output_dir, &toolchain.format_extension);
        Self { config, toolchain, layout }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Checkpoint discovery for this run's output directory.
    #[must_use]
    pub fn locator(&self) -> ArtifactLocator {
        ArtifactLocator::new(self.layout.clone(), &self.toolchain.shell)
    }

    /// Scheduler component identifier for a scheduler kind. Unknown kinds
    /// pass through unchecked.
    #[must_use]
    pub fn scheduler_component(kind: &str) -> String {
        SCHEDULER_TEMPLATE.replace("{kind}", kind)
    }

    /// Configurable training overrides, in a stable order. Fields without a
    /// default appear only when set.
    #[must_use]
    pub fn training_overrides(&self) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            format!("epochs={}", c.epochs),
            format!("batch_size={}", c.batch_size),
        ];
        if let Some(lr) = c.learning_rate {
            args.push(format!("optimizer.lr={lr}"));
        }
        args.push(format!("model.lora_rank={}", c.lora_rank));
        args.push(format!("model.lora_alpha={}", c.lora_alpha));
        if let Some(dropout) = c.lora_dropout {
            args.push(format!("model.lora_dropout={dropout}"));
        }
        if let Some(max_len) = c.max_seq_length {
            args.push(format!("tokenizer.max_seq_len={max_len}"));
        }
        args.push(format!("lr_scheduler.num_warmup_steps={}", c.warmup_steps));
        args.push(format!("optimizer.weight_decay={}", c.weight_decay));
        if let Some(seed) = c.seed {
            args.push(format!("seed={seed}"));
        }
        args.push(format!("lr_scheduler._component_={}", Self::scheduler_component(&c.scheduler)));
        args.push(format!("resume_from_checkpoint={}", py_bool(c.resume_from_checkpoint)));
        args
    }

    /// `tune run <recipe> --config <cfg> <fixed> <dynamic> <dataset> output_dir=<dir>`
    #[must_use]
    pub fn training(&self) -> Invocation {
        let command = CommandSpec::new(&self.toolchain.tune)
            .args(["run", self.toolchain.recipe.as_str(), "--config", self.toolchain.recipe_config.as_str()])
            .args(FIXED_TRAINING_FLAGS.iter().copied())
            .args(self.training_overrides())
            .args(DATASET_FLAGS.iter().copied())
            .arg(format!("dataset.data_files={}", self.config.data_path))
            .arg(format!("output_dir={}", self.layout.root()));
        Invocation::new(Stage::Training, command)
    }

    /// Merge the adapter checkpoint into the base model.
    #[must_use]
    pub fn merge(&self, checkpoint: &CheckpointRef) -> Invocation {
        let command = CommandSpec::new(&self.toolchain.python)
            .arg(&self.toolchain.merge_script)
            .arg("--lora_model")
            .arg(checkpoint.as_str())
            .arg("--merged_model")
            .arg(self.layout.merged_model_dir());
        Invocation::new(Stage::Merge, command)
    }

    /// Convert the merged model into the portable binary format.
    #[must_use]
    pub fn conversion(&self) -> Invocation {
        let command = CommandSpec::new(&self.toolchain.python)
            .arg(&self.toolchain.convert_script)
            .arg("--outtype")
            .arg(CONVERSION_OUTTYPE)
            .arg("--outfile")
            .arg(self.layout.converted_file())
            .arg(self.layout.merged_model_dir());
        Invocation::new(Stage::Conversion, command)
    }

    /// Quantize the converted file, or `None` when quantization is disabled.
    #[must_use]
    pub fn quantization(&self) -> Option<Invocation> {
        let scheme = &self.config.quantization;
        if !scheme.is_enabled() {
            return None;
        }
        let command = CommandSpec::new(&self.toolchain.quantize)
            .arg(self.layout.converted_file())
            .arg(self.layout.quantized_file(scheme))
            .arg(scheme.tool_argument());
        Some(Invocation::new(Stage::Quantization, command))
    }

    /// Descriptor files for this run: always the unquantized one, plus the
    /// quantized one when quantization is enabled.
    #[must_use]
    pub fn descriptor_files(&self) -> Vec<DescriptorFile> {
        let mut files = vec![DescriptorFile {
            name: "Modelfile".to_string(),
            path: self.layout.descriptor_file(),
            line: format!("FROM {}", self.layout.converted_file_name()),
        }];

        let scheme = &self.config.quantization;
        if scheme.is_enabled() {
            files.push(DescriptorFile {
                name: format!("Modelfile{}", scheme.file_token()),
                path: self.layout.quantized_descriptor_file(scheme),
                line: format!("FROM {}", self.layout.quantized_file_name(scheme)),
            });
        }
        files
    }

    /// Writes `descriptor.line` plus a newline to `descriptor.path`.
    ///
    /// Content and target travel as positional parameters, so neither is
    /// re-parsed by the shell.
    #[must_use]
    pub fn descriptor_write(&self, descriptor: &DescriptorFile) -> Invocation {
        let command = CommandSpec::new(&self.toolchain.shell)
            .arg("-c")
            .arg(r#"printf '%s\n' "$1" > "$2""#)
            .arg("kiln-descriptor")
            .arg(&descriptor.line)
            .arg(&descriptor.path);
        Invocation::new(Stage::Descriptor, command)
    }

    /// Every invocation of a run in order, with `checkpoint` standing in for
    /// the locator's result. Used for dry runs.
    #[must_use]
    pub fn plan(&self, checkpoint: &CheckpointRef) -> Vec<Invocation> {
        let mut plan = vec![self.training(), self.merge(checkpoint), self.conversion()];
        plan.extend(self.quantization());
        plan.extend(self.descriptor_files().iter().map(|d| self.descriptor_write(d)));
        plan
    }
}

fn py_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOverrides;

    fn builder(overrides: PipelineOverrides) -> CommandBuilder {
        CommandBuilder::new(PipelineConfig::from_overrides(overrides), Toolchain::default())
    }

    #[test]
    fn test_training_defaults_always_emitted() {
        let training = builder(PipelineOverrides::default()).training();

        assert_eq!(training.stage, Stage::Training);
        assert_eq!(training.override_value("epochs"), Some("1"));
        assert_eq!(training.override_value("batch_size"), Some("2"));
        assert_eq!(training.override_value("model.lora_rank"), Some("32"));
        assert_eq!(training.override_value("model.lora_alpha"), Some("32"));
        assert_eq!(training.override_value("lr_scheduler.num_warmup_steps"), Some("100"));
        assert_eq!(training.override_value("optimizer.weight_decay"), Some("0.01"));
        assert_eq!(
            training.override_value("lr_scheduler._component_"),
            Some("torchtune.training.lr_schedulers.get_cosine_schedule_with_warmup")
        );
        assert_eq!(training.override_value("resume_from_checkpoint"), Some("False"));
        assert_eq!(training.override_value("dataset.data_files"), Some("./data.json"));
        assert_eq!(training.override_value("output_dir"), Some("/var/kolo_data/torchtune/outputs"));
    }

    #[test]
    fn test_training_omits_unset_optional_fields() {
        let training = builder(PipelineOverrides::default()).training();

        assert_eq!(training.override_value("optimizer.lr"), None);
        assert_eq!(training.override_value("model.lora_dropout"), None);
        assert_eq!(training.override_value("seed"), None);
        // Only the fixed baseline remains.
        let max_len: Vec<_> = training
            .command
            .args
            .iter()
            .filter(|a| a.starts_with("tokenizer.max_seq_len="))
            .collect();
        assert_eq!(max_len, vec!["tokenizer.max_seq_len=2048"]);
        assert!(!training.command.args.iter().any(|a| a.contains("None")));
    }

    #[test]
    fn test_training_emits_optional_fields_when_set() {
        let training = builder(PipelineOverrides {
            learning_rate: Some(0.0001),
            lora_dropout: Some(0.05),
            max_seq_length: Some(4096),
            seed: Some(42),
            resume_from_checkpoint: Some(true),
            ..Default::default()
        })
        .training();

        assert_eq!(training.override_value("optimizer.lr"), Some("0.0001"));
        assert_eq!(training.override_value("model.lora_dropout"), Some("0.05"));
        assert_eq!(training.override_value("tokenizer.max_seq_len"), Some("4096"));
        assert_eq!(training.override_value("seed"), Some("42"));
        assert_eq!(training.override_value("resume_from_checkpoint"), Some("True"));
    }

    #[test]
    fn test_training_argument_order() {
        let training = builder(PipelineOverrides::default()).training();
        let args = &training.command.args;

        assert_eq!(training.command.program, "tune");
        assert_eq!(&args[..4], ["run", "lora_finetune_single_device", "--config", Toolchain::default().recipe_config.as_str()]);

        let pos = |needle: &str| args.iter().position(|a| a.starts_with(needle)).unwrap();
        assert!(pos("dataset.packed=") < pos("gradient_accumulation_steps="));
        assert!(pos("gradient_accumulation_steps=") < pos("epochs="));
        assert!(pos("resume_from_checkpoint=") < pos("dataset._component_="));
        assert!(pos("dataset._component_=") < pos("dataset.data_files="));
        assert_eq!(args.last().unwrap(), "output_dir=/var/kolo_data/torchtune/outputs");
    }

    #[test]
    fn test_unknown_scheduler_passes_through() {
        let training = builder(PipelineOverrides {
            scheduler: Some("warmup_stable_decay".to_string()),
            ..Default::default()
        })
        .training();
        assert_eq!(
            training.override_value("lr_scheduler._component_"),
            Some("torchtune.training.lr_schedulers.get_warmup_stable_decay_schedule_with_warmup")
        );
    }

    #[test]
    fn test_ignored_identity_fields_have_no_effect() {
        let plain = builder(PipelineOverrides::default());
        let with_identity = builder(PipelineOverrides {
            base_model: Some("Meta-Llama-3.1-8B-Instruct".to_string()),
            chat_template: Some("llama3".to_string()),
            ..Default::default()
        });
        let checkpoint = CheckpointRef::new("/x/epoch_0");
        assert_eq!(plain.plan(&checkpoint), with_identity.plan(&checkpoint));
    }

    #[test]
    fn test_merge_and_conversion() {
        let b = builder(PipelineOverrides { output_dir: Some("run-a".to_string()), ..Default::default() });
        let merge = b.merge(&CheckpointRef::new("/var/kolo_data/torchtune/run-a/epoch_2"));
        assert_eq!(
            merge.command.args,
            vec![
                "/app/merge_lora.py",
                "--lora_model",
                "/var/kolo_data/torchtune/run-a/epoch_2",
                "--merged_model",
                "/var/kolo_data/torchtune/run-a/merged_model",
            ]
        );

        let conversion = b.conversion();
        assert_eq!(
            conversion.command.args,
            vec![
                "/app/llama.cpp/convert_hf_to_gguf.py",
                "--outtype",
                "f16",
                "--outfile",
                "/var/kolo_data/torchtune/run-a/Merged.gguf",
                "/var/kolo_data/torchtune/run-a/merged_model",
            ]
        );
    }

    #[test]
    fn test_quantization_casing() {
        let b = builder(PipelineOverrides { quantization: Some("q4_k_m".to_string()), ..Default::default() });
        let quant = b.quantization().unwrap();
        assert_eq!(
            quant.command.args,
            vec![
                "/var/kolo_data/torchtune/outputs/Merged.gguf",
                "/var/kolo_data/torchtune/outputs/Mergedq4_k_m.gguf",
                "Q4_K_M",
            ]
        );

        let names: Vec<_> = b.descriptor_files().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Modelfile", "Modelfileq4_k_m"]);
    }

    #[test]
    fn test_empty_scheme_skips_quantization_and_its_descriptor() {
        let b = builder(PipelineOverrides { quantization: Some(String::new()), ..Default::default() });
        assert!(b.quantization().is_none());

        let descriptors = b.descriptor_files();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].line, "FROM Merged.gguf");

        let plan = b.plan(&CheckpointRef::new(PLACEHOLDER_CHECKPOINT));
        assert!(plan.iter().all(|i| i.stage != Stage::Quantization));
    }

    #[test]
    fn test_default_descriptors() {
        let descriptors = builder(PipelineOverrides::default()).descriptor_files();
        assert_eq!(descriptors[0].path, "/var/kolo_data/torchtune/outputs/Modelfile");
        assert_eq!(descriptors[0].line, "FROM Merged.gguf");
        assert_eq!(descriptors[1].path, "/var/kolo_data/torchtune/outputs/ModelfileQ4_K_M");
        assert_eq!(descriptors[1].line, "FROM MergedQ4_K_M.gguf");
    }

    #[test]
    fn test_descriptor_write_passes_content_positionally() {
        let b = builder(PipelineOverrides::default());
        let descriptor = &b.descriptor_files()[0];
        let write = b.descriptor_write(descriptor);

        assert_eq!(write.stage, Stage::Descriptor);
        assert_eq!(write.command.program, "sh");
        assert_eq!(write.command.args[3], "FROM Merged.gguf");
        assert_eq!(write.command.args[4], "/var/kolo_data/torchtune/outputs/Modelfile");
    }

    #[test]
    fn test_plan_order() {
        let stages: Vec<_> = builder(PipelineOverrides::default())
            .plan(&CheckpointRef::new(PLACEHOLDER_CHECKPOINT))
            .into_iter()
            .map(|i| i.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::Training,
                Stage::Merge,
                Stage::Conversion,
                Stage::Quantization,
                Stage::Descriptor,
                Stage::Descriptor,
            ]
        );
    }
}
