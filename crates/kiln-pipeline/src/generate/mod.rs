//! Question/answer generation from source files.
//!
//! For every file group (repeated per iteration), every question prompt
//! header and every persona, the question provider writes a numbered
//! question list. The answer provider then answers each parsed question
//! with the group's files as context. Output lands in
//! `<output_base_path>/qa_generation_output/{questions,answers,debug}` using
//! the names [`pair_directory`](crate::dataset::pair_directory) reads:
//! `questions_<set>.txt` and `answer_<set>_<N>.txt`, where `<set>` is
//! `<group>_<iteration>_h<H>_p<P>`.
//!
//! Existing question lists are reused. Answers are regenerated only when
//! missing or stale (see [`cache`]). Provider failures are logged and
//! counted; they do not stop the run.

pub mod cache;
pub mod config;
pub mod prompt;
pub mod provider;

pub use cache::{AnswerState, answer_state, question_hash};
pub use config::{FileGroup, GenerationConfig, GlobalSettings, GroupPrompts, ProviderKind, ProviderSpec};
pub use prompt::parse_questions;
pub use provider::{
    OllamaProvider, OpenAiProvider, ProviderError, RetryPolicy, TextProvider, build_provider, generate_with_retry,
};

use crate::error::{PipelineError, PipelineResult};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Provider calls in flight at once, across every group.
    pub concurrency: usize,
    /// Shuffle file order per prompt.
    pub shuffle_files: bool,
    pub retry: RetryPolicy,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { concurrency: DEFAULT_CONCURRENCY, shuffle_files: true, retry: RetryPolicy::default() }
    }
}

/// Where generated files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaLayout {
    pub questions_dir: PathBuf,
    pub answers_dir: PathBuf,
    pub debug_dir: PathBuf,
}

impl QaLayout {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            questions_dir: root.join("questions"),
            answers_dir: root.join("answers"),
            debug_dir: root.join("debug"),
        }
    }

    #[must_use]
    pub fn questions_file(&self, set: &SetKey) -> PathBuf {
        self.questions_dir.join(format!("questions_{set}.txt"))
    }

    #[must_use]
    pub fn question_debug_file(&self, set: &SetKey) -> PathBuf {
        self.debug_dir.join(format!("debug_{set}_questions.txt"))
    }

    #[must_use]
    pub fn answer_file(&self, set: &SetKey, index: usize) -> PathBuf {
        self.answers_dir.join(format!("answer_{set}_{index}.txt"))
    }

    #[must_use]
    pub fn answer_meta_file(&self, set: &SetKey, index: usize) -> PathBuf {
        self.answers_dir.join(format!("answer_{set}_{index}.meta"))
    }

    #[must_use]
    pub fn answer_debug_file(&self, set: &SetKey, index: usize) -> PathBuf {
        self.debug_dir.join(format!("debug_{}_answer_h{}_p{}_{index}.txt", set.group, set.header, set.persona))
    }
}

/// One question set: a group iteration, a prompt header and a persona
/// (both 1-based). Displays as `<group>_h<H>_p<P>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKey {
    pub group: String,
    pub header: usize,
    pub persona: usize,
}

impl std::fmt::Display for SetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_h{}_p{}", self.group, self.header, self.persona)
    }
}

/// Counts for one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub groups: usize,
    pub question_sets_generated: usize,
    pub question_sets_reused: usize,
    pub question_sets_failed: usize,
    pub questions: usize,
    pub answers_generated: usize,
    pub answers_cached: usize,
    pub answers_failed: usize,
}

impl GenerationReport {
    fn absorb(&mut self, other: &Self) {
        self.groups += other.groups;
        self.question_sets_generated += other.question_sets_generated;
        self.question_sets_reused += other.question_sets_reused;
        self.question_sets_failed += other.question_sets_failed;
        self.questions += other.questions;
        self.answers_generated += other.answers_generated;
        self.answers_cached += other.answers_cached;
        self.answers_failed += other.answers_failed;
    }
}

enum QuestionSet {
    Generated(String),
    Reused(String),
    Failed,
}

enum AnswerOutcome {
    Generated,
    Cached,
    Failed,
}

pub struct QaGenerator {
    config: GenerationConfig,
    questions: Arc<dyn TextProvider>,
    answers: Arc<dyn TextProvider>,
    options: GenerationOptions,
    layout: QaLayout,
    permits: Semaphore,
}

impl QaGenerator {
    #[must_use]
    pub fn new(
        config: GenerationConfig,
        questions: Arc<dyn TextProvider>,
        answers: Arc<dyn TextProvider>,
        options: GenerationOptions,
    ) -> Self {
        let layout = QaLayout::new(&config.output_root());
        let permits = Semaphore::new(options.concurrency.max(1));
        Self { config, questions, answers, options, layout, permits }
    }

    /// Builds both providers from the config's `providers` section.
    pub fn from_config(config: GenerationConfig, options: GenerationOptions) -> PipelineResult<Self> {
        let questions = build_provider(&config.providers.question, &config.global)?;
        let answers = build_provider(&config.providers.answer, &config.global)?;
        Ok(Self::new(config, questions, answers, options))
    }

    #[must_use]
    pub fn layout(&self) -> &QaLayout {
        &self.layout
    }

    pub async fn run(&self) -> PipelineResult<GenerationReport> {
        for dir in [&self.layout.questions_dir, &self.layout.answers_dir, &self.layout.debug_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let groups = self.config.expanded_groups();
        info!(groups = groups.len(), "starting question/answer generation");

        let results = join_all(groups.iter().map(|(name, group)| self.process_group(name, group))).await;

        let mut report = GenerationReport::default();
        for result in results {
            report.absorb(&result?);
        }
        info!(
            questions = report.questions,
            answers_generated = report.answers_generated,
            answers_cached = report.answers_cached,
            failures = report.question_sets_failed + report.answers_failed,
            "generation finished"
        );
        Ok(report)
    }

    async fn process_group(&self, name: &str, group: &FileGroup) -> PipelineResult<GenerationReport> {
        let prompts = &group.prompts;
        let files_content =
            prompt::render_files(&self.file_order(&group.files), &self.config.source_dir(), &prompts.question_file_prompt_header);

        let headers = non_empty_or_blank(&prompts.question_prompt_headers);
        let personas = non_empty_or_blank(&self.config.personas.question_personas);

        let mut sets = Vec::new();
        for (h, header) in headers.iter().enumerate() {
            for (p, persona) in personas.iter().enumerate() {
                let key = SetKey { group: name.to_string(), header: h + 1, persona: p + 1 };
                let prompt = prompt::question_prompt(prompts, &files_content, header, persona);
                sets.push((key, prompt));
            }
        }

        let outcomes = join_all(sets.iter().map(|(key, prompt)| self.question_set(key, prompt))).await;

        let mut report = GenerationReport { groups: 1, ..Default::default() };
        let mut pending = Vec::new();
        for ((key, _), outcome) in sets.iter().zip(outcomes) {
            let text = match outcome? {
                QuestionSet::Generated(text) => {
                    report.question_sets_generated += 1;
                    text
                }
                QuestionSet::Reused(text) => {
                    report.question_sets_reused += 1;
                    text
                }
                QuestionSet::Failed => {
                    report.question_sets_failed += 1;
                    continue;
                }
            };

            let questions = parse_questions(&text);
            if questions.is_empty() {
                error!(set = %key, "no questions found in generated list");
                continue;
            }
            info!(set = %key, count = questions.len(), "parsed questions");
            report.questions += questions.len();
            pending.extend(questions.into_iter().enumerate().map(|(i, q)| (key, i + 1, q)));
        }

        let outcomes =
            join_all(pending.iter().map(|(key, index, question)| self.answer(group, key, *index, question))).await;
        for outcome in outcomes {
            match outcome? {
                AnswerOutcome::Generated => report.answers_generated += 1,
                AnswerOutcome::Cached => report.answers_cached += 1,
                AnswerOutcome::Failed => report.answers_failed += 1,
            }
        }
        Ok(report)
    }

    async fn question_set(&self, key: &SetKey, prompt: &str) -> PipelineResult<QuestionSet> {
        let path = self.layout.questions_file(key);
        if path.exists() {
            info!(set = %key, "reusing existing questions");
            let text = tokio::fs::read_to_string(&path).await?;
            return Ok(QuestionSet::Reused(text.trim().to_string()));
        }

        info!(set = %key, "generating questions");
        match self.call(self.questions.as_ref(), prompt).await? {
            Some(text) => {
                tokio::fs::write(&path, &text).await?;
                tokio::fs::write(self.layout.question_debug_file(key), prompt).await?;
                Ok(QuestionSet::Generated(text))
            }
            None => {
                error!(set = %key, "question generation failed");
                Ok(QuestionSet::Failed)
            }
        }
    }

    async fn answer(&self, group: &FileGroup, key: &SetKey, index: usize, question: &str) -> PipelineResult<AnswerOutcome> {
        let answer_path = self.layout.answer_file(key, index);
        let meta_path = self.layout.answer_meta_file(key, index);
        let hash = question_hash(question);

        match answer_state(&answer_path, &meta_path, &hash) {
            AnswerState::Fresh => return Ok(AnswerOutcome::Cached),
            AnswerState::Untracked => {
                info!(set = %key, index, "adopting existing answer");
                tokio::fs::write(&meta_path, &hash).await?;
                return Ok(AnswerOutcome::Cached);
            }
            AnswerState::Stale => info!(set = %key, index, "question changed, regenerating answer"),
            AnswerState::Missing => info!(set = %key, index, "generating answer"),
        }

        let prompts = &group.prompts;
        let files_content =
            prompt::render_files(&self.file_order(&group.files), &self.config.source_dir(), &prompts.answer_file_prompt_header);
        let prompt = prompt::answer_prompt(prompts, &files_content, question);

        match self.call(self.answers.as_ref(), &prompt).await? {
            Some(text) => {
                tokio::fs::write(&answer_path, &text).await?;
                tokio::fs::write(self.layout.answer_debug_file(key, index), &prompt).await?;
                tokio::fs::write(&meta_path, &hash).await?;
                Ok(AnswerOutcome::Generated)
            }
            None => {
                error!(set = %key, index, "answer generation failed");
                Ok(AnswerOutcome::Failed)
            }
        }
    }

    /// One provider call under the concurrency limit. Provider failures
    /// are logged and yield `None`.
    async fn call(&self, provider: &dyn TextProvider, prompt: &str) -> PipelineResult<Option<String>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PipelineError::Dataset(format!("generation permits closed: {e}")))?;
        match generate_with_retry(provider, prompt, &self.options.retry).await {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                error!(provider = provider.name(), error = %e, "provider call failed");
                Ok(None)
            }
        }
    }

    fn file_order(&self, files: &[String]) -> Vec<String> {
        let mut files = files.to_vec();
        if self.options.shuffle_files {
            files.shuffle(&mut rand::thread_rng());
        }
        files
    }
}

fn non_empty_or_blank(values: &[String]) -> Vec<String> {
    if values.is_empty() { vec![String::new()] } else { values.to_vec() }
}
