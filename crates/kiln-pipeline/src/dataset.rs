//! Pairs generated questions with their answers into a chat-style JSONL
//! training file.
//!
//! Questions live in `questions_<group>.txt`; the answer to question `N`
//! (1-based) of a group lives in `answer_<group>_<N>.txt`.

use crate::error::{PipelineError, PipelineResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const QUESTIONS_PREFIX: &str = "questions_";
const TEXT_SUFFIX: &str = ".txt";

static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.?!]\s+").expect("sentence break regex should be valid"));

/// Stable identifier for a written dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// One training conversation: a question and its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    #[must_use]
    pub fn pair(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatMessage { role: Role::User, content: question.into() },
                ChatMessage { role: Role::Assistant, content: answer.into() },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub group: String,
    pub questions: usize,
    pub answers: usize,
}

/// Result of pairing one questions/answers directory pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairingOutcome {
    pub conversations: Vec<Conversation>,
    pub groups: Vec<GroupStats>,
    /// Answer files that were expected but missing.
    pub missing_answers: Vec<String>,
}

impl PairingOutcome {
    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.groups.iter().map(|g| g.questions).sum()
    }

    #[must_use]
    pub fn total_answers(&self) -> usize {
        self.groups.iter().map(|g| g.answers).sum()
    }
}

/// Summary of a written dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: DatasetId,
    pub path: PathBuf,
    pub pairs: usize,
    pub groups: Vec<GroupStats>,
}

/// Splits text into sentences after `.`, `?` or `!` followed by whitespace
/// and keeps the trimmed sentences that end with `?`.
#[must_use]
pub fn extract_questions(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_BREAK.find_iter(text) {
        // Punctuation is ASCII, so `start + 1` is a char boundary.
        sentences.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    sentences.push(&text[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| s.ends_with('?'))
        .map(str::to_string)
        .collect()
}

/// Group name of a questions file, e.g. `questions_intro.txt` -> `intro`.
#[must_use]
pub fn group_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(QUESTIONS_PREFIX)?
        .strip_suffix(TEXT_SUFFIX)
        .filter(|group| !group.is_empty())
}

#[must_use]
pub fn answer_file_name(group: &str, index: usize) -> String {
    format!("answer_{group}_{index}{TEXT_SUFFIX}")
}

/// Pairs every question in `questions_dir` with its answer in `answers_dir`.
///
/// Groups are visited in sorted file-name order.
pub fn pair_directory(questions_dir: &Path, answers_dir: &Path) -> PipelineResult<PairingOutcome> {
    let mut files: Vec<(String, PathBuf)> = std::fs::read_dir(questions_dir)
        .map_err(|e| PipelineError::Dataset(format!("{}: {e}", questions_dir.display())))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            group_name(&name).map(|group| (group.to_string(), entry.path()))
        })
        .collect();
    files.sort();

    let mut outcome = PairingOutcome::default();
    for (group, path) in files {
        let questions = extract_questions(&std::fs::read_to_string(&path)?);
        let mut stats = GroupStats { group: group.clone(), questions: questions.len(), answers: 0 };

        for (index, question) in questions.into_iter().enumerate() {
            let answer_name = answer_file_name(&group, index + 1);
            let answer_path = answers_dir.join(&answer_name);
            if !answer_path.is_file() {
                warn!(group = %group, question = index + 1, file = %answer_name, "answer file not found");
                outcome.missing_answers.push(answer_name);
                continue;
            }
            let answer = std::fs::read_to_string(&answer_path)?;
            outcome.conversations.push(Conversation::pair(question, answer.trim()));
            stats.answers += 1;
        }

        info!(group = %stats.group, questions = stats.questions, answers = stats.answers, "paired group");
        outcome.groups.push(stats);
    }

    Ok(outcome)
}

/// Encodes conversations as JSONL lines, without trailing newlines.
pub fn encode_lines(conversations: &[Conversation]) -> PipelineResult<Vec<String>> {
    conversations
        .iter()
        .map(|c| serde_json::to_string(c).map_err(PipelineError::from))
        .collect()
}

pub fn compute_dataset_id(lines: &[String]) -> DatasetId {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    DatasetId(hex::encode(hasher.finalize()))
}

/// Writes the pairing outcome to `output` as JSONL.
///
/// Fails without touching `output` when there is nothing to write.
pub fn write_jsonl(outcome: &PairingOutcome, output: &Path) -> PipelineResult<DatasetSummary> {
    if outcome.conversations.is_empty() {
        return Err(PipelineError::Dataset("no question/answer pairs found".to_string()));
    }

    let lines = encode_lines(&outcome.conversations)?;
    let mut content = lines.join("\n");
    content.push('\n');

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, content)?;

    Ok(DatasetSummary {
        id: compute_dataset_id(&lines),
        path: output.to_path_buf(),
        pairs: lines.len(),
        groups: outcome.groups.clone(),
    })
}
