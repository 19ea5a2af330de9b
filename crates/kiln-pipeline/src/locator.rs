//! Finds the checkpoint produced by the training stage.

use crate::error::{PipelineError, PipelineResult};
use crate::invocation::{Invocation, Stage};
use crate::layout::OutputLayout;
use kiln_exec::{CommandSpec, ExecOutput};
use serde::{Deserialize, Serialize};

const CHECKPOINT_PREFIX: &str = "epoch_";

/// Lists `epoch_*` directories under `$1`. A missing directory lists nothing.
const LISTING_SCRIPT: &str =
    r#"[ -d "$1" ] || exit 0; exec find "$1" -mindepth 1 -maxdepth 1 -type d -name 'epoch_*'"#;

/// `$0` of the listing script.
pub const LISTING_SCRIPT_NAME: &str = "kiln-locate";

/// Path of the checkpoint to merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointRef(String);

impl CheckpointRef {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lists `epoch_<N>` directories in the output directory and picks the
/// highest `N`.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    layout: OutputLayout,
    shell: String,
}

impl ArtifactLocator {
    #[must_use]
    pub fn new(layout: OutputLayout, shell: impl Into<String>) -> Self {
        Self { layout, shell: shell.into() }
    }

    /// Query listing candidate checkpoint directories, one per line.
    ///
    /// An output directory that training never created yields an empty
    /// listing, so it resolves to [`PipelineError::NoCheckpoint`].
    #[must_use]
    pub fn query(&self) -> Invocation {
        let command = CommandSpec::new(&self.shell)
            .arg("-c")
            .arg(LISTING_SCRIPT)
            .arg(LISTING_SCRIPT_NAME)
            .arg(self.layout.root());
        Invocation::new(Stage::LocateCheckpoint, command)
    }

    /// Picks the checkpoint from the query's output.
    pub fn resolve(&self, output: &ExecOutput) -> PipelineResult<CheckpointRef> {
        select_latest(&output.stdout)
            .map(CheckpointRef::new)
            .ok_or_else(|| PipelineError::NoCheckpoint { dir: self.layout.root().to_string() })
    }
}

/// Returns the listed path whose final component is `epoch_<N>` with the
/// largest numeric `N`. Entries with a non-numeric suffix are ignored.
#[must_use]
pub fn select_latest(listing: &str) -> Option<&str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| epoch_index(line).map(|index| (index, line)))
        .max_by_key(|(index, _)| *index)
        .map(|(_, line)| line)
}

fn epoch_index(path: &str) -> Option<u64> {
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    name.strip_prefix(CHECKPOINT_PREFIX)?.parse().ok()
}
