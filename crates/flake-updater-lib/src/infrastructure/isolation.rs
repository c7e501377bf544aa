use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

use super::git::{GitError, GitIdentity, GitRunner};
use super::repo::PushTarget;
use crate::domain::{Flake, Forge, ForgeError, InputName};

const SCRATCH_PREFIX: &str = "flake-updater-";

/// Errors while preparing or pushing an isolated checkout
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("failed to create scratch directory")]
    Scratch(#[source] std::io::Error),

    #[error("base branch '{0}' does not exist on the remote")]
    MissingBaseBranch(String),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// A working tree dedicated to one update branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedCheckout {
    branch: String,
    root: PathBuf,
}

impl IsolatedCheckout {
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Owns the run-scoped scratch directory and every checkout created in it.
pub struct IsolationManager {
    repo_root: PathBuf,
    scratch: TempDir,
    push_target: PushTarget,
    identity: GitIdentity,
}

impl IsolationManager {
    /// # Errors
    ///
    /// Returns [`IsolationError::Scratch`] if the scratch directory cannot be created.
    pub fn new(
        repo_root: impl Into<PathBuf>,
        push_target: PushTarget,
        identity: GitIdentity,
    ) -> Result<Self, IsolationError> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(IsolationError::Scratch)?;
        debug!("Scratch directory: {}", scratch.path().display());

        Ok(Self {
            repo_root: repo_root.into(),
            scratch,
            push_target,
            identity,
        })
    }

    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn git(&self) -> GitRunner {
        GitRunner::new(&self.repo_root)
    }

    /// Recreate the remote branch for `input` at the head of `base` and check
    /// out that same commit in a fresh working tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the base branch is unknown, a remote call fails or
    /// the working tree cannot be created.
    pub fn create_branch<F: Forge>(
        &self,
        forge: &F,
        input: &InputName,
        flake: &Flake,
        base: &str,
    ) -> Result<IsolatedCheckout, IsolationError> {
        let branch = flake.branch_name(input);

        let base_sha = forge
            .branch_sha(base)?
            .ok_or_else(|| IsolationError::MissingBaseBranch(base.to_string()))?;

        if forge.branch_sha(&branch)?.is_some() {
            info!("Deleting existing branch {branch}");
            forge.delete_branch(&branch)?;
        }
        forge.create_branch(&branch, &base_sha)?;
        info!("Created branch {branch} at {base_sha}");

        let root = self.scratch.path().join(&branch);
        if root.exists() {
            warn!("Removing stale working tree {}", root.display());
            self.remove_worktree(&root);
        }

        let git = self.git();
        git.fetch(
            self.push_target.remote(),
            self.push_target.display(),
            &format!("refs/heads/{base}"),
        )?;
        git.worktree_add_detached(&root, &base_sha)?;
        debug!("Working tree for {branch}: {}", root.display());

        Ok(IsolatedCheckout { branch, root })
    }

    /// Commit everything in the checkout and force-push it to its branch.
    ///
    /// Returns `false`, without committing, when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if staging, committing or pushing fails.
    pub fn commit_and_push(
        &self,
        checkout: &IsolatedCheckout,
        message: &str,
    ) -> Result<bool, IsolationError> {
        let git = GitRunner::new(&checkout.root);

        git.add_all()?;
        if !git.has_staged_changes()? {
            return Ok(false);
        }

        git.commit(message, &self.identity)?;
        git.force_push(
            self.push_target.remote(),
            self.push_target.display(),
            &checkout.branch,
        )?;
        info!("Pushed {}", checkout.branch);

        Ok(true)
    }

    /// Remove the checkout's working tree. Never fails; returns whether the
    /// directory is gone.
    pub fn cleanup(&self, checkout: &IsolatedCheckout) -> bool {
        self.remove_worktree(&checkout.root)
    }

    fn remove_worktree(&self, path: &Path) -> bool {
        if let Err(e) = self.git().worktree_remove(path) {
            debug!("git worktree remove failed, removing directory: {e}");
            if path.exists()
                && let Err(e) = fs::remove_dir_all(path)
            {
                warn!("Failed to remove {}: {e}", path.display());
                return false;
            }
        }

        if let Err(e) = self.git().worktree_prune() {
            warn!("Failed to prune worktrees: {e}");
        }
        true
    }

    /// Remove the scratch directory and everything left in it. Never fails;
    /// returns whether the directory is gone.
    pub fn cleanup_all(self) -> bool {
        let path = self.scratch.path().to_path_buf();
        let repo_root = self.repo_root;

        let removed = match self.scratch.close() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove scratch directory {}: {e}", path.display());
                false
            }
        };

        if let Err(e) = GitRunner::new(&repo_root).worktree_prune() {
            warn!("Failed to prune worktrees: {e}");
        }
        removed
    }
}
