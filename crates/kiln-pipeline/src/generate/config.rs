//! Generation config (`generate_qa_config.yaml`).

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_BASE_PATH: &str = "/var/kolo_data";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Directory under `output_base_path` that receives every generated file.
pub const OUTPUT_DIR_NAME: &str = "qa_generation_output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub global: GlobalSettings,
    pub providers: Providers,
    #[serde(default)]
    pub personas: Personas,
    #[serde(default)]
    pub file_groups: BTreeMap<String, FileGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Source directory, relative to `output_base_path`.
    pub base_dir: String,
    pub output_base_path: PathBuf,
    /// Full Ollama generate endpoint.
    pub ollama_url: String,
    /// OpenAI API base; `/chat/completions` is appended.
    pub openai_url: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            output_base_path: PathBuf::from(DEFAULT_OUTPUT_BASE_PATH),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            openai_url: DEFAULT_OPENAI_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Providers {
    pub question: ProviderSpec,
    pub answer: ProviderSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: ProviderKind,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "OpenAI")]
    Openai,
    #[serde(alias = "Ollama")]
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Openai => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Personas {
    pub question_personas: Vec<String>,
}

/// Source files that are prompted together, `iterations` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileGroup {
    pub iterations: u32,
    pub files: Vec<String>,
    pub prompts: GroupPrompts,
}

impl Default for FileGroup {
    fn default() -> Self {
        Self { iterations: 1, files: Vec::new(), prompts: GroupPrompts::default() }
    }
}

/// Prompt templates. Placeholders: `{file_name}`, `{files_content}` and
/// `{question}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupPrompts {
    /// One question set is generated per header and persona.
    pub question_prompt_headers: Vec<String>,
    pub question_prompt_footer: String,
    pub question_file_prompt_header: String,
    pub question_context_prompt: String,
    pub answer_file_prompt_header: String,
    pub answer_context_prompt: String,
    pub answer_question_prompt: String,
}

impl Default for GroupPrompts {
    fn default() -> Self {
        Self {
            question_prompt_headers: Vec::new(),
            question_prompt_footer: String::new(),
            question_file_prompt_header: "File: {file_name}".to_string(),
            question_context_prompt: "{files_content}".to_string(),
            answer_file_prompt_header: "File: {file_name}".to_string(),
            answer_context_prompt: "{files_content}".to_string(),
            answer_question_prompt:
                "Based on the file content provided, answer the following question in detail: {question}"
                    .to_string(),
        }
    }
}

impl GenerationConfig {
    pub fn load_from_file(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content).map_err(|e| match e {
            PipelineError::Config(reason) => PipelineError::Config(format!("{}: {}", path.display(), reason)),
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> PipelineResult<Self> {
        serde_yaml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Directory the group file lists are resolved against.
    #[must_use]
    pub fn source_dir(&self) -> PathBuf {
        self.global.output_base_path.join(&self.global.base_dir)
    }

    #[must_use]
    pub fn output_root(&self) -> PathBuf {
        self.global.output_base_path.join(OUTPUT_DIR_NAME)
    }

    /// Every group repeated per iteration, named `<group>_<i>` (1-based).
    #[must_use]
    pub fn expanded_groups(&self) -> Vec<(String, &FileGroup)> {
        self.file_groups
            .iter()
            .flat_map(|(name, group)| (1..=group.iterations).map(move |i| (format!("{name}_{i}"), group)))
            .collect()
    }
}
