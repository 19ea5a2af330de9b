use kiln_exec::{CommandSpec, ExecMode};
use serde::{Deserialize, Serialize};

/// Logical pipeline stage an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Training,
    #[serde(rename = "locate-checkpoint")]
    LocateCheckpoint,
    Merge,
    Conversion,
    Quantization,
    #[serde(rename = "descriptor-write")]
    Descriptor,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::LocateCheckpoint => "locate-checkpoint",
            Self::Merge => "merge",
            Self::Conversion => "conversion",
            Self::Quantization => "quantization",
            Self::Descriptor => "descriptor-write",
        }
    }

    /// Output handling for the stage: tool stages stream, queries and
    /// file writes capture.
    #[must_use]
    pub fn exec_mode(self) -> ExecMode {
        match self {
            Self::Training | Self::Merge | Self::Conversion | Self::Quantization => ExecMode::Stream,
            Self::LocateCheckpoint | Self::Descriptor => ExecMode::Capture,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external call: the stage it belongs to plus the command to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub stage: Stage,
    pub command: CommandSpec,
}

impl Invocation {
    #[must_use]
    pub fn new(stage: Stage, command: CommandSpec) -> Self {
        Self { stage, command }
    }

    #[must_use]
    pub fn mode(&self) -> ExecMode {
        self.stage.exec_mode()
    }

    /// Effective value of a `key=value` argument; the last occurrence wins,
    /// as it does for the training tool.
    #[must_use]
    pub fn override_value(&self, key: &str) -> Option<&str> {
        self.command.args.iter().rev().find_map(|a| {
            a.split_once('=').filter(|(k, _)| *k == key).map(|(_, v)| v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serializes_like_display() {
        for stage in [
            Stage::Training,
            Stage::LocateCheckpoint,
            Stage::Merge,
            Stage::Conversion,
            Stage::Quantization,
            Stage::Descriptor,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
            assert_eq!(serde_json::from_str::<Stage>(&json).unwrap(), stage);
        }
    }
}
