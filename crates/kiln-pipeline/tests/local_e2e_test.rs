//! End-to-end runs on the local host with every tool replaced by `true`.

#![cfg(unix)]

use kiln_exec::LocalEnvironment;
use kiln_pipeline::{
    NullProgressSink, Pipeline, PipelineConfig, PipelineError, PipelineOverrides, PipelineState, Toolchain,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn stub_toolchain(data_root: &Path) -> Toolchain {
    Toolchain {
        tune: "true".to_string(),
        python: "true".to_string(),
        quantize: "true".to_string(),
        data_root: data_root.to_string_lossy().into_owned(),
        ..Default::default()
    }
}

fn seed_checkpoints(output_dir: &Path) {
    for epoch in ["epoch_1", "epoch_2", "epoch_10"] {
        fs::create_dir_all(output_dir.join(epoch)).unwrap();
    }
    fs::write(output_dir.join("epoch_99.txt"), "not a directory").unwrap();
}

#[tokio::test]
async fn test_default_scheme_writes_both_descriptors() {
    let temp = TempDir::new().unwrap();
    let output_dir = temp.path().join("outputs");
    seed_checkpoints(&output_dir);

    let env = LocalEnvironment::default();
    let mut pipeline = Pipeline::new(&env, PipelineConfig::default(), stub_toolchain(temp.path()), &NullProgressSink)
        .with_interrupt_handling(false);
    let report = pipeline.run().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert!(report.checkpoint.as_str().ends_with("/outputs/epoch_10"));
    assert_eq!(fs::read_to_string(output_dir.join("Modelfile")).unwrap(), "FROM Merged.gguf\n");
    assert_eq!(fs::read_to_string(output_dir.join("ModelfileQ4_K_M")).unwrap(), "FROM MergedQ4_K_M.gguf\n");
}

#[tokio::test]
async fn test_disabled_quantization_writes_one_descriptor() {
    let temp = TempDir::new().unwrap();
    let output_dir = temp.path().join("run b");
    seed_checkpoints(&output_dir);

    let overrides = PipelineOverrides {
        output_dir: Some("run b".to_string()),
        quantization: Some(String::new()),
        ..Default::default()
    };
    let env = LocalEnvironment::default();
    let mut pipeline = Pipeline::new(
        &env,
        PipelineConfig::from_overrides(overrides),
        stub_toolchain(temp.path()),
        &NullProgressSink,
    )
    .with_interrupt_handling(false);
    pipeline.run().await.unwrap();

    assert_eq!(fs::read_to_string(output_dir.join("Modelfile")).unwrap(), "FROM Merged.gguf\n");
    let descriptors: Vec<_> = fs::read_dir(&output_dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("Modelfile"))
        .collect();
    assert_eq!(descriptors, vec!["Modelfile"]);
}

#[tokio::test]
async fn test_failing_training_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let output_dir = temp.path().join("outputs");
    seed_checkpoints(&output_dir);

    let toolchain = Toolchain { tune: "false".to_string(), ..stub_toolchain(temp.path()) };
    let env = LocalEnvironment::default();
    let mut pipeline = Pipeline::new(&env, PipelineConfig::default(), toolchain, &NullProgressSink)
        .with_interrupt_handling(false);
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::StageFailed { exit_code: Some(1), .. }));
    assert!(!output_dir.join("Modelfile").exists());
}

#[tokio::test]
async fn test_missing_checkpoints_is_no_checkpoint() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("outputs").join("merged_model")).unwrap();

    let env = LocalEnvironment::default();
    let mut pipeline = Pipeline::new(&env, PipelineConfig::default(), stub_toolchain(temp.path()), &NullProgressSink)
        .with_interrupt_handling(false);
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::NoCheckpoint { .. }));
}

#[tokio::test]
async fn test_training_that_creates_no_output_dir_is_no_checkpoint() {
    let temp = TempDir::new().unwrap();

    let env = LocalEnvironment::default();
    let mut pipeline = Pipeline::new(&env, PipelineConfig::default(), stub_toolchain(temp.path()), &NullProgressSink)
        .with_interrupt_handling(false);
    let err = pipeline.run().await.unwrap_err();

    let expected = temp.path().join("outputs").to_string_lossy().into_owned();
    assert!(matches!(err, PipelineError::NoCheckpoint { ref dir } if *dir == expected), "{err}");
    assert!(!temp.path().join("outputs").exists());
}
