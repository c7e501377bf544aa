use log::info;
use std::path::Path;
use thiserror::Error;

use crate::config::Config;
use crate::infrastructure::{
    GitRunner, GithubClient, GithubError, IsolationError, IsolationManager, NixCli, PushTarget,
    RepoError, RepoSlug, detect_base_branch,
};

use super::update::{self, RunReport, UpdateError, UpdateOptions};

/// Errors that can occur during command orchestration
#[derive(Debug, Error)]
pub enum AppError {
    /// The repository or its remote could not be resolved.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// The Github client could not be initialized.
    #[error(transparent)]
    Github(#[from] GithubError),

    /// The scratch directory could not be created.
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    /// The update command failed.
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Run the update command against the repository at `repo_root` with the
/// `nix` CLI and the Github API.
///
/// # Errors
///
/// Returns [`AppError::Repo`] if the repository slug cannot be determined.
/// Returns [`AppError::Github`] if the API client cannot be created.
/// Returns [`AppError::Isolation`] if the scratch directory cannot be created.
/// Returns [`AppError::Update`] if flake discovery fails.
pub fn update(repo_root: &Path, config: Config) -> Result<RunReport, AppError> {
    let origin_url = GitRunner::new(repo_root).remote_url("origin").ok();

    let repository = match config.repository {
        Some(repository) => repository,
        None => RepoSlug::from_remote_url(origin_url.as_deref().unwrap_or_default())?,
    };
    info!("Repository: {repository}");

    let base_branch = match config.base_branch {
        Some(branch) => branch,
        None => detect_base_branch(repo_root),
    };
    info!("Base branch: {base_branch}");

    let forge = GithubClient::new(
        config.github_token.as_str(),
        repository,
        &config.api_url,
        &config.graphql_url,
    )?;
    let push_target = PushTarget::for_origin(origin_url.as_deref(), Some(config.github_token.as_str()));
    let isolation = IsolationManager::new(repo_root, push_target, config.identity)?;
    let tool = NixCli::new(config.noise_prefixes);

    let options = UpdateOptions {
        base_branch,
        exclude_patterns: config.exclude_patterns,
        labels: config.labels,
        auto_merge: config.auto_merge,
        delete_branch_on_merge: config.delete_branch_on_merge,
        commit_template: config.commit_template,
    };

    Ok(update::run(repo_root, &options, &tool, &forge, isolation)?)
}
