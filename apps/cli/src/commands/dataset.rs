//! Dataset command implementation.

use crate::commands::types::DatasetCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_pipeline::{GenerationConfig, GenerationOptions, QaGenerator, pair_directory, write_jsonl};
use std::path::Path;

pub async fn execute(command: DatasetCommand) -> Result<()> {
    match command {
        DatasetCommand::Pair { questions, answers, output, json } => pair(&questions, &answers, &output, json),
        DatasetCommand::Generate { config, threads, no_shuffle, json } => {
            generate(&config, usize::from(threads), !no_shuffle, json).await
        }
    }
}

async fn generate(config_path: &Path, threads: usize, shuffle_files: bool, json_output: bool) -> Result<()> {
    let config = GenerationConfig::load_from_file(config_path).context("Failed to load generation config")?;
    let options = GenerationOptions { concurrency: threads, shuffle_files, ..Default::default() };
    let generator = QaGenerator::from_config(config, options).context("Failed to set up providers")?;
    let report = generator.run().await.context("Question/answer generation failed")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let layout = generator.layout();
    println!("{}", "Generation Summary:".bold());
    println!("  File groups:   {}", report.groups);
    println!(
        "  Question sets: {} generated, {} reused, {} failed",
        report.question_sets_generated, report.question_sets_reused, report.question_sets_failed
    );
    println!("  Questions:     {}", report.questions);
    println!(
        "  Answers:       {} generated, {} up to date, {} failed",
        report.answers_generated, report.answers_cached, report.answers_failed
    );
    println!("  Questions dir: {}", layout.questions_dir.display().to_string().green());
    println!("  Answers dir:   {}", layout.answers_dir.display().to_string().green());
    if report.question_sets_failed + report.answers_failed > 0 {
        println!("{} some provider calls failed; rerun to retry them", "!".yellow());
    }
    Ok(())
}

fn pair(questions: &Path, answers: &Path, output: &Path, json_output: bool) -> Result<()> {
    let outcome = pair_directory(questions, answers).context("Failed to read question/answer files")?;
    let summary = write_jsonl(&outcome, output).context("Failed to write dataset")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Processing Summary:".bold());
    for group in &summary.groups {
        println!("  Group '{}': {} questions, {} answers processed.", group.group, group.questions, group.answers);
    }
    println!(
        "Total: {} questions and {} answers processed.",
        outcome.total_questions(),
        outcome.total_answers()
    );
    if !outcome.missing_answers.is_empty() {
        println!("{} {} answer file(s) missing", "!".yellow(), outcome.missing_answers.len());
    }
    println!("Total pairs saved to {}: {}", summary.path.display().to_string().green(), summary.pairs);
    println!("Dataset id: {}", summary.id.to_string().dimmed());
    Ok(())
}
