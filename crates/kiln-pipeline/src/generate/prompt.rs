//! Prompt assembly and question-list parsing.

use super::config::GroupPrompts;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d.\-+*]+\s*").expect("list marker regex should be valid"));

static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+").expect("emphasis regex should be valid"));

/// Questions from a generated list, one per line.
///
/// Numbering and bullets are stripped, as are `*` runs. Lines without a `?`
/// are dropped.
#[must_use]
pub fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let unmarked = LIST_MARKER.replace(line, "");
            EMPHASIS.replace_all(&unmarked, "").trim().to_string()
        })
        .filter(|line| line.contains('?'))
        .collect()
}

/// Resolves `relative` under `base_dir`, falling back to the first file
/// with the same name anywhere below it.
#[must_use]
pub fn find_source_file(base_dir: &Path, relative: &str) -> Option<PathBuf> {
    let direct = base_dir.join(relative);
    if direct.exists() {
        return Some(direct);
    }

    let target = Path::new(relative).file_name()?;
    WalkDir::new(base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == target)
        .map(walkdir::DirEntry::into_path)
}

/// Concatenates each file's header (from `template`) and content. Missing or
/// unreadable files are skipped with a warning.
#[must_use]
pub fn render_files(files: &[String], base_dir: &Path, template: &str) -> String {
    let mut combined = String::new();
    for relative in files {
        let content = find_source_file(base_dir, relative).and_then(|path| std::fs::read_to_string(path).ok());
        match content {
            Some(content) => {
                combined.push_str(&template.replace("{file_name}", relative));
                combined.push_str("\n\n");
                combined.push_str(&content);
                combined.push_str("\n\n");
            }
            None => warn!(file = %relative, base_dir = %base_dir.display(), "source file not found"),
        }
    }
    combined
}

#[must_use]
pub fn question_prompt(prompts: &GroupPrompts, files_content: &str, header: &str, persona: &str) -> String {
    let persona = if persona.is_empty() {
        String::new()
    } else {
        format!("Please use the following persona when generating the questions: {persona}.")
    };
    format!(
        "{}\n\n{header}\n\n{persona}\n\n{}",
        prompts.question_context_prompt.replace("{files_content}", files_content),
        prompts.question_prompt_footer,
    )
}

#[must_use]
pub fn answer_prompt(prompts: &GroupPrompts, files_content: &str, question: &str) -> String {
    format!(
        "{}\n\n{}",
        prompts.answer_context_prompt.replace("{files_content}", files_content),
        prompts.answer_question_prompt.replace("{question}", question),
    )
}
