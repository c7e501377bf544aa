use log::{error, info, warn};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::domain::{
    AutoMerge, ChangePublisher, Flake, FlakeTool, Forge, ForgeError, InputName, MergeMethod,
    PublishOutcome, PullRequest, PullRequestIntent, ToolError, commit_message, enumerate, pr_body,
    pr_title,
};
use crate::infrastructure::{
    DiscoveryError, IsolatedCheckout, IsolationError, IsolationManager, discover,
};

/// Errors that can occur while updating one flake input
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Finding flakes failed; nothing was updated.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Forge(#[from] ForgeError),
}

/// What to update and how to publish it.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub base_branch: String,
    pub exclude_patterns: String,
    pub labels: Vec<String>,
    pub auto_merge: Option<MergeMethod>,
    pub delete_branch_on_merge: bool,
    pub commit_template: String,
}

/// Result for one (flake, input) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Opened { pr: PullRequest, auto_merge: AutoMerge },
    /// The branch was pushed but a pull request was already open.
    AlreadyOpen(PullRequest),
    /// The input was already current; nothing was committed.
    NoChanges,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    pub flake: String,
    pub input: InputName,
    pub branch: String,
    pub outcome: InputOutcome,
}

/// A flake whose inputs could not be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeFailure {
    pub flake: String,
    pub reason: String,
}

/// Everything one run did, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub flakes: usize,
    pub inputs: Vec<InputReport>,
    pub flake_failures: Vec<FlakeFailure>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&InputOutcome) -> bool) -> usize {
        self.inputs.iter().filter(|r| pred(&r.outcome)).count()
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::Opened { .. }))
    }

    #[must_use]
    pub fn already_open(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::AlreadyOpen(_)))
    }

    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::NoChanges))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::Failed(_)))
    }

    /// Whether any flake or input failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || !self.flake_failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} flake(s), {} input(s): {} opened, {} already open, {} unchanged, {} failed",
            self.flakes,
            self.inputs.len(),
            self.opened(),
            self.already_open(),
            self.unchanged(),
            self.failed(),
        )?;
        if !self.flake_failures.is_empty() {
            write!(f, ", {} flake(s) skipped", self.flake_failures.len())?;
        }
        Ok(())
    }
}

/// Update every input of every discovered flake, each on its own branch.
///
/// Per-flake and per-input failures are recorded in the report and do not stop
/// the run. The scratch directory is removed before returning in every case.
///
/// # Errors
///
/// Returns [`UpdateError::Discovery`] if flakes cannot be discovered.
pub fn run<T: FlakeTool, F: Forge>(
    repo_root: &Path,
    options: &UpdateOptions,
    tool: &T,
    forge: &F,
    isolation: IsolationManager,
) -> Result<RunReport, UpdateError> {
    let result = update_all(repo_root, options, tool, forge, &isolation);
    isolation.cleanup_all();
    result
}

fn update_all<T: FlakeTool, F: Forge>(
    repo_root: &Path,
    options: &UpdateOptions,
    tool: &T,
    forge: &F,
    isolation: &IsolationManager,
) -> Result<RunReport, UpdateError> {
    let flakes = discover(repo_root, &options.exclude_patterns)?;
    let mut report = RunReport {
        flakes: flakes.len(),
        ..RunReport::default()
    };

    for flake in &flakes {
        info!("Processing {flake}");

        let inputs = match enumerate(tool, flake, repo_root) {
            Ok(inputs) => inputs,
            Err(e) => {
                error!("Failed to list inputs of {flake}: {e}");
                report.flake_failures.push(FlakeFailure {
                    flake: flake.path().to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for input in inputs {
            let outcome = update_one(&input, flake, options, tool, forge, isolation);
            report.inputs.push(InputReport {
                flake: flake.path().to_string(),
                branch: flake.branch_name(&input),
                input,
                outcome,
            });
        }
    }

    Ok(report)
}

fn update_one<T: FlakeTool, F: Forge>(
    input: &InputName,
    flake: &Flake,
    options: &UpdateOptions,
    tool: &T,
    forge: &F,
    isolation: &IsolationManager,
) -> InputOutcome {
    let checkout = match isolation.create_branch(forge, input, flake, &options.base_branch) {
        Ok(checkout) => checkout,
        Err(e) => {
            error!("Failed to prepare branch for flake input {input} in {flake}: {e}");
            return InputOutcome::Failed(e.to_string());
        }
    };

    let outcome = match update_in_checkout(input, flake, &checkout, options, tool, forge, isolation) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Failed to update flake input {input} in {flake}: {e}");
            InputOutcome::Failed(e.to_string())
        }
    };

    if !isolation.cleanup(&checkout) {
        warn!("Working tree {} was left behind", checkout.root().display());
    }
    outcome
}

fn update_in_checkout<T: FlakeTool, F: Forge>(
    input: &InputName,
    flake: &Flake,
    checkout: &IsolatedCheckout,
    options: &UpdateOptions,
    tool: &T,
    forge: &F,
    isolation: &IsolationManager,
) -> Result<InputOutcome, UpdateError> {
    let summary = tool.update_input(input, flake, checkout.root())?;

    let message = commit_message(&options.commit_template, input, flake);
    if !isolation.commit_and_push(checkout, &message)? {
        info!("No changes detected for flake input: {input} in {flake} - skipping PR creation");
        return Ok(InputOutcome::NoChanges);
    }

    let intent = PullRequestIntent {
        branch: checkout.branch().to_string(),
        base: options.base_branch.clone(),
        title: pr_title(input, flake),
        body: pr_body(input, flake, &summary),
        labels: options.labels.clone(),
        auto_merge: options.auto_merge,
        delete_branch_on_merge: options.delete_branch_on_merge,
    };

    match ChangePublisher::new(forge).publish(&intent)? {
        PublishOutcome::AlreadyOpen(pr) => Ok(InputOutcome::AlreadyOpen(pr)),
        PublishOutcome::Opened { pr, auto_merge } => {
            info!("Successfully created PR for flake input: {input} in {flake}");
            Ok(InputOutcome::Opened { pr, auto_merge })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr(number: u64) -> PullRequest {
        PullRequest {
            number,
            url: format!("https://github.com/o/r/pull/{number}"),
            node_id: format!("PR_{number}"),
            head_sha: "abc".to_string(),
        }
    }

    fn input_report(outcome: InputOutcome) -> InputReport {
        InputReport {
            flake: "flake.nix".to_string(),
            input: InputName::from("nixpkgs"),
            branch: "update-nixpkgs".to_string(),
            outcome,
        }
    }

    #[test]
    fn report_counts_outcomes() {
        let report = RunReport {
            flakes: 2,
            inputs: vec![
                input_report(InputOutcome::Opened {
                    pr: pr(1),
                    auto_merge: AutoMerge::NotRequested,
                }),
                input_report(InputOutcome::AlreadyOpen(pr(2))),
                input_report(InputOutcome::NoChanges),
                input_report(InputOutcome::Failed("boom".to_string())),
            ],
            flake_failures: vec![],
        };

        assert_eq!(report.opened(), 1);
        assert_eq!(report.already_open(), 1);
        assert_eq!(report.unchanged(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.has_failures());
        assert_eq!(
            report.to_string(),
            "2 flake(s), 4 input(s): 1 opened, 1 already open, 1 unchanged, 1 failed"
        );
    }

    #[test]
    fn report_mentions_skipped_flakes() {
        let report = RunReport {
            flakes: 1,
            inputs: vec![],
            flake_failures: vec![FlakeFailure {
                flake: "flake.nix".to_string(),
                reason: "nix not found".to_string(),
            }],
        };

        assert!(report.has_failures());
        assert!(report.to_string().ends_with(", 1 flake(s) skipped"));
    }

    #[test]
    fn empty_report_has_no_failures() {
        assert!(!RunReport::default().has_failures());
    }
}
