use crate::invocation::Stage;
use crate::orchestrator::RunId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: RunId, environment: String },
    StageStarted { run_id: RunId, stage: Stage, command: String },
    StageFinished { run_id: RunId, stage: Stage },
    StageSkipped { run_id: RunId, stage: Stage, reason: String },
    Message { run_id: RunId, message: String },
    Finished { run_id: RunId },
    Failed { run_id: RunId, error: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, environment } => {
                println!("[kiln:{run_id}] started in {environment}");
            }
            ProgressEvent::StageStarted { run_id, stage, command } => {
                println!("[kiln:{run_id}] {stage}: {command}");
            }
            ProgressEvent::StageFinished { run_id, stage } => println!("[kiln:{run_id}] {stage} done"),
            ProgressEvent::StageSkipped { run_id, stage, reason } => {
                println!("[kiln:{run_id}] {stage} skipped ({reason})");
            }
            ProgressEvent::Message { run_id, message } => println!("[kiln:{run_id}] {message}"),
            ProgressEvent::Finished { run_id } => println!("[kiln:{run_id}] finished"),
            ProgressEvent::Failed { run_id, error } => eprintln!("[kiln:{run_id}] failed: {error}"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
