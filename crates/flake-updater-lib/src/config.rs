use thiserror::Error;

use crate::domain::{DEFAULT_COMMIT_TEMPLATE, InvalidMergeMethod, MergeMethod};
use crate::infrastructure::{
    DEFAULT_BOT_EMAIL, DEFAULT_BOT_NAME, DEFAULT_NOISE_PREFIXES, GITHUB_API_URL, GitIdentity,
    RepoError, RepoSlug, default_graphql_url,
};

/// Label applied when none are configured.
pub const DEFAULT_LABEL: &str = "dependencies";

/// Errors in the startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "a Github token is required.\n\
         Set it with: export GITHUB_TOKEN=<your-token> or pass --github-token"
    )]
    TokenRequired,

    #[error(transparent)]
    MergeMethod(#[from] InvalidMergeMethod),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// Raw settings as given on the command line or in the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub github_token: String,
    /// `OWNER/NAME`; read from the `origin` remote when unset.
    pub repository: Option<String>,
    pub api_url: String,
    pub graphql_url: Option<String>,
    pub exclude_patterns: String,
    /// Detected from the checked out branch when unset.
    pub base_branch: Option<String>,
    /// Comma-separated.
    pub labels: String,
    pub auto_merge: bool,
    pub merge_method: String,
    pub delete_branch: bool,
    pub git_author_name: String,
    pub git_author_email: String,
    pub git_committer_name: String,
    pub git_committer_email: String,
    pub git_signoff: bool,
    pub commit_message: String,
    /// Comma-separated; empty entries are ignored.
    pub noise_prefixes: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_token: String::new(),
            repository: None,
            api_url: GITHUB_API_URL.to_string(),
            graphql_url: None,
            exclude_patterns: String::new(),
            base_branch: None,
            labels: DEFAULT_LABEL.to_string(),
            auto_merge: false,
            merge_method: MergeMethod::default().to_string(),
            delete_branch: true,
            git_author_name: DEFAULT_BOT_NAME.to_string(),
            git_author_email: DEFAULT_BOT_EMAIL.to_string(),
            git_committer_name: DEFAULT_BOT_NAME.to_string(),
            git_committer_email: DEFAULT_BOT_EMAIL.to_string(),
            git_signoff: false,
            commit_message: DEFAULT_COMMIT_TEMPLATE.to_string(),
            noise_prefixes: DEFAULT_NOISE_PREFIXES.join(","),
        }
    }
}

/// Validated configuration, built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    pub repository: Option<RepoSlug>,
    pub api_url: String,
    pub graphql_url: String,
    pub exclude_patterns: String,
    pub base_branch: Option<String>,
    pub labels: Vec<String>,
    /// `Some` when auto-merge is enabled.
    pub auto_merge: Option<MergeMethod>,
    pub delete_branch_on_merge: bool,
    pub identity: GitIdentity,
    pub commit_template: String,
    pub noise_prefixes: Vec<String>,
}

impl Config {
    /// # Errors
    ///
    /// Returns [`ConfigError::TokenRequired`] for an empty token,
    /// [`ConfigError::MergeMethod`] for an unknown merge method (even when
    /// auto-merge is off) and [`ConfigError::Repository`] for a malformed
    /// `OWNER/NAME`.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let github_token = settings.github_token.trim().to_string();
        if github_token.is_empty() {
            return Err(ConfigError::TokenRequired);
        }

        let merge_method: MergeMethod = settings.merge_method.parse()?;

        let repository = non_empty(settings.repository)
            .map(|repo| repo.parse::<RepoSlug>())
            .transpose()?;

        let graphql_url = non_empty(settings.graphql_url)
            .unwrap_or_else(|| default_graphql_url(&settings.api_url));

        let commit_template = if settings.commit_message.trim().is_empty() {
            DEFAULT_COMMIT_TEMPLATE.to_string()
        } else {
            settings.commit_message
        };

        Ok(Self {
            github_token,
            repository,
            api_url: settings.api_url,
            graphql_url,
            exclude_patterns: settings.exclude_patterns,
            base_branch: non_empty(settings.base_branch),
            labels: split_list(&settings.labels),
            auto_merge: settings.auto_merge.then_some(merge_method),
            delete_branch_on_merge: settings.delete_branch,
            identity: GitIdentity {
                author_name: settings.git_author_name,
                author_email: settings.git_author_email,
                committer_name: settings.git_committer_name,
                committer_email: settings.git_committer_email,
                signoff: settings.git_signoff,
            },
            commit_template,
            noise_prefixes: split_prefixes(&settings.noise_prefixes),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Like [`split_list`] but keeps trailing whitespace, which is significant in
/// a prefix such as `"unpacking "`.
fn split_prefixes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim_start)
        .filter(|s| !s.trim().is_empty())
        .map(ToString::to_string)
        .collect()
}
