//! Answer freshness tracking.
//!
//! Each answer file `answer_<...>.txt` has a sibling `answer_<...>.meta`
//! holding the sha256 of the question it answers. An answer is regenerated
//! only when it is missing or its question changed.

use sha2::{Digest, Sha256};
use std::path::Path;

#[must_use]
pub fn question_hash(question: &str) -> String {
    hex::encode(Sha256::digest(question.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerState {
    /// No answer file yet.
    Missing,
    /// The stored hash matches the question.
    Fresh,
    /// The stored hash belongs to a different question.
    Stale,
    /// An answer exists without a hash; it is kept and adopted.
    Untracked,
}

impl AnswerState {
    #[must_use]
    pub fn needs_generation(self) -> bool {
        matches!(self, Self::Missing | Self::Stale)
    }
}

#[must_use]
pub fn answer_state(answer: &Path, meta: &Path, hash: &str) -> AnswerState {
    if !answer.exists() {
        return AnswerState::Missing;
    }
    match std::fs::read_to_string(meta) {
        Ok(stored) if stored.trim() == hash => AnswerState::Fresh,
        Ok(_) => AnswerState::Stale,
        Err(_) => AnswerState::Untracked,
    }
}
