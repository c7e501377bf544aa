use log::{info, warn};

use super::{Forge, ForgeError, MergeMethod, PullRequest, PullRequestIntent};

/// Label created with a dedicated color and description when missing.
const DEPENDENCIES_LABEL: &str = "dependencies";
const DEPENDENCIES_COLOR: &str = "0366d6";
const DEPENDENCIES_DESCRIPTION: &str = "Pull requests that update a dependency file";
const DEFAULT_LABEL_COLOR: &str = "ededed";

/// What happened to auto-merge for an opened pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMerge {
    NotRequested,
    /// The repository does not allow auto-merge (or the check failed).
    NotAllowed,
    Enabled,
    /// Enabling failed but the direct merge fallback succeeded.
    Merged,
    Failed,
}

/// Result of publishing one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// An open pull request from the branch into the base already existed.
    AlreadyOpen(PullRequest),
    Opened {
        pr: PullRequest,
        auto_merge: AutoMerge,
    },
}

/// Opens pull requests for pushed branches and applies the best-effort extras
/// (labels, auto-merge, delete-branch-on-merge).
pub struct ChangePublisher<'a, F: Forge> {
    forge: &'a F,
}

impl<'a, F: Forge> ChangePublisher<'a, F> {
    #[must_use]
    pub fn new(forge: &'a F) -> Self {
        Self { forge }
    }

    /// Open a pull request for the intent unless one is already open.
    ///
    /// Only listing and creating the pull request can fail; every later step is
    /// logged and skipped on error.
    ///
    /// # Errors
    ///
    /// Returns an error if open pull requests cannot be listed or the pull
    /// request cannot be created.
    pub fn publish(&self, intent: &PullRequestIntent) -> Result<PublishOutcome, ForgeError> {
        let existing = self
            .forge
            .open_pull_requests(&intent.branch, &intent.base)?;
        if let Some(pr) = existing.into_iter().next() {
            info!("Pull request already exists for branch {}: {pr}", intent.branch);
            return Ok(PublishOutcome::AlreadyOpen(pr));
        }

        for label in &intent.labels {
            self.ensure_label(label);
        }

        let pr = self.forge.create_pull_request(
            &intent.branch,
            &intent.base,
            &intent.title,
            &intent.body,
        )?;
        info!("Created pull request {pr}");

        if !intent.labels.is_empty() {
            match self.forge.add_labels(pr.number, &intent.labels) {
                Ok(()) => info!("Added labels to #{}: {}", pr.number, intent.labels.join(", ")),
                Err(e) => warn!("Failed to add labels to #{}: {e}", pr.number),
            }
        }

        let auto_merge = match intent.auto_merge {
            Some(method) => self.auto_merge(&pr, method),
            None => AutoMerge::NotRequested,
        };

        if intent.delete_branch_on_merge {
            match self.forge.enable_delete_branch_on_merge(&pr) {
                Ok(()) => info!("Branch {} is deleted once {pr} is merged", intent.branch),
                Err(e) => warn!("Failed to enable delete-branch-on-merge: {e}"),
            }
        }

        Ok(PublishOutcome::Opened { pr, auto_merge })
    }

    /// Create `name` if the repository lacks it. Returns false on failure.
    fn ensure_label(&self, name: &str) -> bool {
        match self.forge.label_exists(name) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to look up label {name}: {e}");
                return false;
            }
        }

        let (color, description) = if name == DEPENDENCIES_LABEL {
            (DEPENDENCIES_COLOR, DEPENDENCIES_DESCRIPTION)
        } else {
            (DEFAULT_LABEL_COLOR, "")
        };

        match self.forge.create_label(name, color, description) {
            Ok(()) => {
                info!("Created label: {name}");
                true
            }
            Err(e) => {
                warn!("Failed to create label {name}: {e}");
                false
            }
        }
    }

    /// Auto-merge is best-effort: required checks may not have started yet.
    fn auto_merge(&self, pr: &PullRequest, method: MergeMethod) -> AutoMerge {
        match self.forge.auto_merge_allowed() {
            Ok(true) => {}
            Ok(false) => {
                warn!("Auto-merge is not allowed in this repository, skipping for #{}", pr.number);
                return AutoMerge::NotAllowed;
            }
            Err(e) => {
                warn!("Could not check whether auto-merge is allowed: {e}");
                return AutoMerge::NotAllowed;
            }
        }

        let Err(e) = self.forge.enable_auto_merge(pr, method) else {
            info!("Enabled auto-merge ({method}) for #{}", pr.number);
            return AutoMerge::Enabled;
        };
        warn!("Failed to enable auto-merge for #{}: {e}; trying a direct merge", pr.number);

        match self.forge.merge_pull_request(pr, method) {
            Ok(()) => {
                info!("Merged #{} directly ({method})", pr.number);
                AutoMerge::Merged
            }
            Err(e) => {
                warn!("Direct merge of #{} failed: {e}", pr.number);
                AutoMerge::Failed
            }
        }
    }
}
