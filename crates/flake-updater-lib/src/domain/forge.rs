use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors returned by a hosting platform
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    #[error("{operation} failed: {reason}")]
    Request {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} returned an unexpected response: {reason}")]
    UnexpectedResponse {
        operation: &'static str,
        reason: String,
    },
}

/// Strategy used when the platform merges a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

/// Error when a merge method token is not one of MERGE, SQUASH, REBASE
#[derive(Debug, Error)]
#[error("invalid merge method {0:?}: expected one of MERGE, SQUASH, REBASE")]
pub struct InvalidMergeMethod(pub String);

impl MergeMethod {
    /// Token used by the GraphQL API (`MERGE`, `SQUASH`, `REBASE`).
    #[must_use]
    pub fn as_graphql(self) -> &'static str {
        match self {
            Self::Merge => "MERGE",
            Self::Squash => "SQUASH",
            Self::Rebase => "REBASE",
        }
    }

    /// Token used by the REST merge endpoint (`merge`, `squash`, `rebase`).
    #[must_use]
    pub fn as_rest(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl FromStr for MergeMethod {
    type Err = InvalidMergeMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MERGE" => Ok(Self::Merge),
            "SQUASH" => Ok(Self::Squash),
            "REBASE" => Ok(Self::Rebase),
            _ => Err(InvalidMergeMethod(s.to_string())),
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_graphql())
    }
}

/// A pull request as known by the hosting platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    /// Global node id, used by GraphQL mutations.
    pub node_id: String,
    /// Commit at the head of the pull request branch.
    pub head_sha: String,
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.url)
    }
}

/// Everything needed to open one pull request.
#[derive(Debug, Clone)]
pub struct PullRequestIntent {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// `Some` when platform auto-merge should be enabled.
    pub auto_merge: Option<MergeMethod>,
    pub delete_branch_on_merge: bool,
}

/// The handful of hosting platform calls this tool makes.
///
/// Absence (e.g., an unknown branch or label) is reported as `Ok(None)` /
/// `Ok(false)`, never as an error.
pub trait Forge {
    /// Head commit of `branch`, or `None` if the branch does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn branch_sha(&self, branch: &str) -> Result<Option<String>, ForgeError>;

    /// Create `refs/heads/{branch}` pointing at `sha`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ref cannot be created.
    fn create_branch(&self, branch: &str, sha: &str) -> Result<(), ForgeError>;

    /// Delete `refs/heads/{branch}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ref cannot be deleted.
    fn delete_branch(&self, branch: &str) -> Result<(), ForgeError>;

    /// Open pull requests from `head` into `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn open_pull_requests(&self, head: &str, base: &str) -> Result<Vec<PullRequest>, ForgeError>;

    /// Open a pull request.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull request cannot be created.
    fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, ForgeError>;

    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn label_exists(&self, name: &str) -> Result<bool, ForgeError>;

    /// # Errors
    ///
    /// Returns an error if the label cannot be created.
    fn create_label(&self, name: &str, color: &str, description: &str) -> Result<(), ForgeError>;

    /// # Errors
    ///
    /// Returns an error if the labels cannot be attached.
    fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), ForgeError>;

    /// Whether the repository allows platform auto-merge.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn auto_merge_allowed(&self) -> Result<bool, ForgeError>;

    /// Enable platform auto-merge, guarded by the expected head commit.
    ///
    /// # Errors
    ///
    /// Returns an error if auto-merge cannot be enabled.
    fn enable_auto_merge(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ForgeError>;

    /// Merge the pull request right away, guarded by the expected head commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull request cannot be merged.
    fn merge_pull_request(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ForgeError>;

    /// Have the head branch of `pr` deleted once it is merged.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull request cannot be updated.
    fn enable_delete_branch_on_merge(&self, pr: &PullRequest) -> Result<(), ForgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_method_parses_case_insensitively() {
        assert_eq!("squash".parse::<MergeMethod>().unwrap(), MergeMethod::Squash);
        assert_eq!("REBASE".parse::<MergeMethod>().unwrap(), MergeMethod::Rebase);
        assert_eq!(" Merge ".parse::<MergeMethod>().unwrap(), MergeMethod::Merge);
    }

    #[test]
    fn merge_method_rejects_unknown_token() {
        let err = "fast-forward".parse::<MergeMethod>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid merge method \"fast-forward\": expected one of MERGE, SQUASH, REBASE"
        );
    }

    #[test]
    fn merge_method_tokens() {
        assert_eq!(MergeMethod::Squash.as_graphql(), "SQUASH");
        assert_eq!(MergeMethod::Squash.as_rest(), "squash");
    }
}
