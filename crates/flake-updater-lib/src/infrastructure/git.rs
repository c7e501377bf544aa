use log::debug;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;

/// Errors that can occur when running git
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git in {}", dir.display())]
    Spawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

/// Author and committer identity applied to every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    /// Add a `Signed-off-by` trailer.
    pub signoff: bool,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            author_name: DEFAULT_BOT_NAME.to_string(),
            author_email: DEFAULT_BOT_EMAIL.to_string(),
            committer_name: DEFAULT_BOT_NAME.to_string(),
            committer_email: DEFAULT_BOT_EMAIL.to_string(),
            signoff: false,
        }
    }
}

pub const DEFAULT_BOT_NAME: &str = "github-actions[bot]";
pub const DEFAULT_BOT_EMAIL: &str = "41898282+github-actions[bot]@users.noreply.github.com";

/// Runs git commands inside one working tree.
#[derive(Debug, Clone)]
pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("git");
        command.args(args).current_dir(&self.working_dir);
        command
    }

    fn output(&self, mut command: Command, args: &[&str]) -> Result<Output, GitError> {
        debug!("git {} (in {})", args.join(" "), self.working_dir.display());
        command.output().map_err(|source| GitError::Spawn {
            dir: self.working_dir.clone(),
            source,
        })
    }

    /// Run git and return its output regardless of the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::Spawn`] if git cannot be started.
    pub fn run(&self, args: &[&str]) -> Result<Output, GitError> {
        self.output(self.command(args), args)
    }

    /// Run git and fail on a non-zero exit status. Returns trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::Failed`] with git's stderr on a non-zero exit status.
    pub fn run_checked(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(args)?;
        check(args, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Name of the checked out branch; empty on a detached HEAD.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails.
    pub fn current_branch(&self) -> Result<String, GitError> {
        self.run_checked(&["branch", "--show-current"])
    }

    /// Top-level directory of the working tree git is run in.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is not inside a git working tree.
    pub fn show_toplevel(&self) -> Result<PathBuf, GitError> {
        self.run_checked(&["rev-parse", "--show-toplevel"])
            .map(PathBuf::from)
    }

    /// URL of the given remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote does not exist.
    pub fn remote_url(&self, remote: &str) -> Result<String, GitError> {
        self.run_checked(&["remote", "get-url", remote])
    }

    /// Check out `start` with a detached HEAD in a new working tree at `path`.
    ///
    /// No local branch is created, so the repository's own refs stay untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the worktree cannot be created.
    pub fn worktree_add_detached(&self, path: &Path, start: &str) -> Result<(), GitError> {
        let path = path_str(path)?;
        self.run_checked(&["worktree", "add", "--force", "--detach", path, start])?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if git refuses to remove the worktree.
    pub fn worktree_remove(&self, path: &Path) -> Result<(), GitError> {
        let path = path_str(path)?;
        self.run_checked(&["worktree", "remove", "--force", path])?;
        Ok(())
    }

    /// Forget worktrees whose directories no longer exist.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails.
    pub fn worktree_prune(&self) -> Result<(), GitError> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if git fails.
    pub fn add_all(&self) -> Result<(), GitError> {
        self.run_checked(&["add", "--all"])?;
        Ok(())
    }

    /// Whether the index differs from HEAD.
    ///
    /// # Errors
    ///
    /// Returns an error if git exits with anything other than 0 or 1.
    pub fn has_staged_changes(&self) -> Result<bool, GitError> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(failed(&args, &output)),
        }
    }

    /// Commit the index with the given identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(&self, message: &str, identity: &GitIdentity) -> Result<(), GitError> {
        let mut args = vec![
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--no-verify",
            "-m",
            message,
        ];
        if identity.signoff {
            args.push("--signoff");
        }

        let mut command = self.command(&args);
        command
            .env("GIT_AUTHOR_NAME", &identity.author_name)
            .env("GIT_AUTHOR_EMAIL", &identity.author_email)
            .env("GIT_COMMITTER_NAME", &identity.committer_name)
            .env("GIT_COMMITTER_EMAIL", &identity.committer_email);

        let output = self.output(command, &args)?;
        check(&args, &output)
    }

    /// Force-push HEAD to `refs/heads/{branch}` on `remote`.
    ///
    /// `remote` may be a remote name or a URL; only `label` is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the push is rejected.
    pub fn force_push(&self, remote: &str, label: &str, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let args = ["push", "--force", remote, refspec.as_str()];
        let shown = ["push", "--force", label, refspec.as_str()];

        self.run_redacted(&args, &shown, remote, label)
    }

    /// Fetch `refspec` from `remote` without tags.
    ///
    /// `remote` may be a remote name or a URL; only `label` is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    pub fn fetch(&self, remote: &str, label: &str, refspec: &str) -> Result<(), GitError> {
        let args = ["fetch", "--no-tags", remote, refspec];
        let shown = ["fetch", "--no-tags", label, refspec];
        self.run_redacted(&args, &shown, remote, label)
    }

    fn run_redacted(
        &self,
        args: &[&str],
        shown: &[&str],
        remote: &str,
        label: &str,
    ) -> Result<(), GitError> {
        let output = self.output(self.command(args), shown)?;
        check(shown, &output).map_err(|e| match e {
            GitError::Failed { command, stderr } => GitError::Failed {
                command,
                stderr: stderr.replace(remote, label),
            },
            other => other,
        })
    }
}

fn check(args: &[&str], output: &Output) -> Result<(), GitError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(failed(args, output))
    }
}

fn failed(args: &[&str], output: &Output) -> GitError {
    GitError::Failed {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn path_str(path: &Path) -> Result<&str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::NonUtf8Path(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_is_actions_bot() {
        let identity = GitIdentity::default();
        assert_eq!(identity.author_name, "github-actions[bot]");
        assert_eq!(identity.committer_email, DEFAULT_BOT_EMAIL);
        assert!(!identity.signoff);
    }

    #[test]
    fn failed_error_message_includes_stderr() {
        let err = GitError::Failed {
            command: "push --force origin HEAD:refs/heads/x".to_string(),
            stderr: "rejected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`git push --force origin HEAD:refs/heads/x` failed: rejected"
        );
    }

    #[test]
    fn failed_push_does_not_reveal_remote_url() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitRunner::new(dir.path());
        git.run_checked(&["init", "-q"]).unwrap();
        let secret = dir.path().join("secret-token-remote.git");
        let secret = secret.to_str().unwrap();

        let err = git.force_push(secret, "origin", "update-nixpkgs").unwrap_err();

        let message = err.to_string();
        assert!(!message.contains("secret-token"), "{message}");
        assert!(message.starts_with("`git push --force origin HEAD:refs/heads/update-nixpkgs` failed"));
    }

    #[test]
    fn failed_fetch_does_not_reveal_remote_url() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitRunner::new(dir.path());
        git.run_checked(&["init", "-q"]).unwrap();
        let secret = dir.path().join("secret-token-remote.git");
        let secret = secret.to_str().unwrap();

        let err = git.fetch(secret, "origin", "refs/heads/main").unwrap_err();

        let message = err.to_string();
        assert!(!message.contains("secret-token"), "{message}");
        assert!(message.starts_with("`git fetch --no-tags origin refs/heads/main` failed"));
    }

    #[test]
    fn show_toplevel_fails_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let result = GitRunner::new(dir.path()).show_toplevel();
        assert!(result.is_err());
    }
}
