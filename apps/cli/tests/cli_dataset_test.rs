//! Integration tests for `kiln dataset` and `kiln check`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn kiln(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(temp_dir.path()).env("HOME", temp_dir.path()).env("NO_COLOR", "1");
    cmd
}

fn write_fixture(temp_dir: &TempDir) {
    let questions = temp_dir.path().join("questions");
    let answers = temp_dir.path().join("answers");
    fs::create_dir_all(&questions).unwrap();
    fs::create_dir_all(&answers).unwrap();
    fs::write(questions.join("questions_basics.txt"), "What is a LoRA adapter? Say more. Why merge it?").unwrap();
    fs::write(answers.join("answer_basics_1.txt"), "A low-rank update.\n").unwrap();
    fs::write(answers.join("answer_basics_2.txt"), "To serve one model file.").unwrap();
}

#[test]
fn test_dataset_pair_writes_jsonl() {
    let temp_dir = TempDir::new().unwrap();
    write_fixture(&temp_dir);

    kiln(&temp_dir)
        .args(["dataset", "pair", "--questions", "questions", "--answers", "answers", "--output", "out/data.jsonl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Group 'basics': 2 questions, 2 answers processed."))
        .stdout(predicate::str::contains("Total pairs saved to"));

    let written = fs::read_to_string(temp_dir.path().join("out/data.jsonl")).unwrap();
    let lines: Vec<_> = written.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["messages"][0]["role"], "user");
    assert_eq!(first["messages"][0]["content"], "What is a LoRA adapter?");
    assert_eq!(first["messages"][1]["role"], "assistant");
    assert_eq!(first["messages"][1]["content"], "A low-rank update.");
}

#[test]
fn test_dataset_pair_json_summary() {
    let temp_dir = TempDir::new().unwrap();
    write_fixture(&temp_dir);

    let output = kiln(&temp_dir)
        .args(["dataset", "pair", "--questions", "questions", "--answers", "answers", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["pairs"], 2);
    assert_eq!(summary["id"].as_str().unwrap().len(), 64);
    assert!(temp_dir.path().join("data.jsonl").exists());
}

#[test]
fn test_dataset_pair_without_answers_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("questions")).unwrap();
    fs::create_dir_all(temp_dir.path().join("answers")).unwrap();
    fs::write(temp_dir.path().join("questions/questions_x.txt"), "Anyone?").unwrap();

    kiln(&temp_dir)
        .args(["dataset", "pair", "--questions", "questions", "--answers", "answers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no question/answer pairs found"));
    assert!(!temp_dir.path().join("data.jsonl").exists());
}

#[test]
fn test_check_local_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    kiln(&temp_dir)
        .args(["check", "--runtime", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Environment local is running"));
}

#[test]
fn test_check_missing_container_fails() {
    let temp_dir = TempDir::new().unwrap();
    kiln(&temp_dir)
        .args(["check", "--runtime", "podman", "--container", "kiln-test-no-such-container"])
        .assert()
        .failure();
}

fn write_generation_config(temp_dir: &TempDir, ollama_url: &str) {
    fs::create_dir_all(temp_dir.path().join("docs")).unwrap();
    fs::write(temp_dir.path().join("docs/README.md"), "Kiln fine-tunes models.").unwrap();
    fs::write(
        temp_dir.path().join("generate_qa_config.yaml"),
        format!(
            "global:\n  base_dir: docs\n  output_base_path: {root}\n  ollama_url: {ollama_url}\n\
             providers:\n  question: {{provider: ollama, model: q}}\n  answer: {{provider: ollama, model: a}}\n\
             file_groups:\n  readme:\n    files: [README.md]\n    prompts:\n      question_prompt_footer: LIST-QUESTIONS\n",
            root = temp_dir.path().display(),
        ),
    )
    .unwrap();
}

#[test]
fn test_dataset_generate_then_pair() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let questions = server
        .mock("POST", "/api/generate")
        .match_body(mockito::Matcher::Regex("LIST-QUESTIONS".to_string()))
        .with_body(r#"{"response": "1. What does kiln do?\n2. Which format does it emit?"}"#)
        .expect(1)
        .create();
    let answers = server
        .mock("POST", "/api/generate")
        .match_body(mockito::Matcher::Regex("answer the following question".to_string()))
        .with_body(r#"{"response": "It fine-tunes models."}"#)
        .expect(2)
        .create();
    write_generation_config(&temp_dir, &format!("{}/api/generate", server.url()));

    for _ in 0..2 {
        kiln(&temp_dir)
            .args(["dataset", "generate", "--threads", "2", "--no-shuffle"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Questions:     2"));
    }
    questions.assert();
    answers.assert();

    let output_root = temp_dir.path().join("qa_generation_output");
    assert!(output_root.join("questions/questions_readme_1_h1_p1.txt").exists());
    assert!(output_root.join("answers/answer_readme_1_h1_p1_2.meta").exists());

    kiln(&temp_dir)
        .args(["dataset", "pair", "--questions"])
        .arg(output_root.join("questions"))
        .arg("--answers")
        .arg(output_root.join("answers"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Group 'readme_1_h1_p1': 2 questions, 2 answers processed."));
    assert_eq!(fs::read_to_string(temp_dir.path().join("data.jsonl")).unwrap().lines().count(), 2);
}

#[test]
fn test_dataset_generate_missing_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    kiln(&temp_dir)
        .args(["dataset", "generate", "--config", "absent.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load generation config"));
}

#[test]
fn test_dataset_generate_openai_without_key_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("generate_qa_config.yaml"),
        "providers:\n  question: {provider: openai, model: gpt-4o-mini}\n  answer: {provider: openai, model: gpt-4o-mini}\n",
    )
    .unwrap();
    kiln(&temp_dir)
        .env_remove("OPENAI_API_KEY")
        .args(["dataset", "generate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}
