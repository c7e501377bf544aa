use std::path::Path;
use thiserror::Error;

use super::{Flake, InputName};

/// Errors reported by the flake tooling
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed for {flake}: {stderr}")]
    CommandFailed {
        command: String,
        flake: String,
        stderr: String,
    },

    #[error("failed to parse flake metadata for {flake}")]
    Metadata {
        flake: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("flake metadata for {flake} has no root node with inputs")]
    MissingRoot { flake: String },

    #[error("could not resolve the git repository containing {}", path.display())]
    RepositoryRoot {
        path: std::path::PathBuf,
        reason: String,
    },
}

/// The package-manager operations the update loop depends on.
pub trait FlakeTool {
    /// Direct inputs of the flake, read without writing its lock file.
    ///
    /// `repo_root` is the checkout the flake path is relative to.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be queried or lacks a root node.
    fn direct_inputs(&self, flake: &Flake, repo_root: &Path) -> Result<Vec<InputName>, ToolError>;

    /// Update a single input in the flake located inside `work_dir`, rewriting
    /// its lock file in place. Returns a human-readable summary of the update.
    ///
    /// # Errors
    ///
    /// Returns an error if the update command fails or the repository root of
    /// `work_dir` cannot be resolved.
    fn update_input(
        &self,
        input: &InputName,
        flake: &Flake,
        work_dir: &Path,
    ) -> Result<String, ToolError>;
}

/// Inputs of `flake` that should be updated: its direct inputs minus the
/// ones excluded for this flake.
///
/// # Errors
///
/// Propagates the tool's error; the caller skips this flake.
pub fn enumerate<T: FlakeTool>(
    tool: &T,
    flake: &Flake,
    repo_root: &Path,
) -> Result<Vec<InputName>, ToolError> {
    let inputs = tool.direct_inputs(flake, repo_root)?;
    Ok(flake.retain_included(inputs))
}
