use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use flake_updater_lib::commands::app::{self, AppError};
use flake_updater_lib::config::{Config, ConfigError, DEFAULT_LABEL, Settings};
use flake_updater_lib::domain::DEFAULT_COMMIT_TEMPLATE;
use flake_updater_lib::infrastructure::{
    DEFAULT_BOT_EMAIL, DEFAULT_BOT_NAME, GITHUB_API_URL, RepoError, find_root,
};
use log::{LevelFilter, info, warn};
use std::io::Write;
use thiserror::Error;

/// Top-level error type for the flake-updater binary
#[derive(Debug, Error)]
enum FlakeUpdaterError {
    /// The configuration is incomplete or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Command orchestration failed.
    #[error(transparent)]
    App(#[from] AppError),

    /// Repository detection failed.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(name = "flake-updater")]
#[command(about = "Update each nix flake input in its own pull request", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Token used for the Github API and for pushing branches
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, default_value = "")]
    github_token: String,

    /// Repository as OWNER/NAME; read from the origin remote when unset
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    /// Github REST API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = GITHUB_API_URL)]
    api_url: String,

    /// Github GraphQL endpoint; derived from the API URL when unset
    #[arg(long, env = "GITHUB_GRAPHQL_URL")]
    graphql_url: Option<String>,

    /// Comma-separated globs; `glob#input` excludes a single input
    #[arg(long, env = "EXCLUDE_PATTERNS", default_value = "")]
    exclude_patterns: String,

    /// Branch pull requests target; defaults to the checked out branch
    #[arg(long, env = "BASE_BRANCH")]
    base_branch: Option<String>,

    /// Comma-separated labels added to every pull request
    #[arg(long, env = "PR_LABELS", default_value = DEFAULT_LABEL)]
    labels: String,

    /// Enable auto-merge on created pull requests
    #[arg(long, env = "AUTO_MERGE", action = ArgAction::Set, num_args = 0..=1,
          default_value = "false", default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    auto_merge: bool,

    /// Merge method for auto-merge: MERGE, SQUASH or REBASE
    #[arg(long, env = "MERGE_METHOD", default_value = "MERGE")]
    merge_method: String,

    /// Delete head branches once their pull request is merged
    #[arg(long, env = "DELETE_BRANCH", action = ArgAction::Set, num_args = 0..=1,
          default_value = "true", default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    delete_branch: bool,

    #[arg(long, env = "GIT_AUTHOR_NAME", default_value = DEFAULT_BOT_NAME)]
    git_author_name: String,

    #[arg(long, env = "GIT_AUTHOR_EMAIL", default_value = DEFAULT_BOT_EMAIL)]
    git_author_email: String,

    #[arg(long, env = "GIT_COMMITTER_NAME", default_value = DEFAULT_BOT_NAME)]
    git_committer_name: String,

    #[arg(long, env = "GIT_COMMITTER_EMAIL", default_value = DEFAULT_BOT_EMAIL)]
    git_committer_email: String,

    /// Add a Signed-off-by trailer to commits
    #[arg(long, env = "GIT_SIGNOFF", action = ArgAction::Set, num_args = 0..=1,
          default_value = "false", default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    signoff: bool,

    /// Commit message template; {{input}} is the input name, {{in}} expands
    /// to " in <path>" for flakes outside the repository root
    #[arg(long, env = "COMMIT_MESSAGE", default_value = DEFAULT_COMMIT_TEMPLATE)]
    commit_message: String,

    /// Comma-separated prefixes of `nix flake update` output lines to drop
    #[arg(long, env = "NOISE_PREFIXES", default_value = "unpacking ,warning:")]
    noise_prefixes: String,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Self {
            github_token: cli.github_token,
            repository: cli.repository,
            api_url: cli.api_url,
            graphql_url: cli.graphql_url,
            exclude_patterns: cli.exclude_patterns,
            base_branch: cli.base_branch,
            labels: cli.labels,
            auto_merge: cli.auto_merge,
            merge_method: cli.merge_method,
            delete_branch: cli.delete_branch,
            git_author_name: cli.git_author_name,
            git_author_email: cli.git_author_email,
            git_committer_name: cli.git_committer_name,
            git_committer_email: cli.git_committer_email,
            git_signoff: cli.signoff,
            commit_message: cli.commit_message,
            noise_prefixes: cli.noise_prefixes,
        }
    }
}

fn main() -> Result<(), FlakeUpdaterError> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Config::from_settings(cli.into())?;

    let cwd = std::env::current_dir()?;
    let repo_root = find_root(&cwd)?;

    let report = app::update(&repo_root, config)?;

    if report.has_failures() {
        warn!("Finished with failures: {report}");
    } else {
        info!("Finished: {report}");
    }
    Ok(())
}

/// Initialize logging based on the verbosity level specified in the CLI
fn init_logging(verbose: bool) {
    let mut builder = env_logger::builder();
    builder
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format(|buf, record| {
            let level = record.level();
            let style = &buf.default_level_style(level);
            writeln!(buf, "[{style}{level}{style:#}] {}", record.args())
        });

    if !verbose {
        builder.format_timestamp(None);
    }

    builder.init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bool_options_accept_explicit_values() {
        let cli = Cli::try_parse_from([
            "flake-updater",
            "--github-token",
            "t",
            "--auto-merge",
            "--delete-branch",
            "false",
            "--signoff=yes",
        ])
        .unwrap();
        assert!(cli.auto_merge);
        assert!(!cli.delete_branch);
        assert!(cli.signoff);
    }

    #[test]
    fn settings_carry_cli_values() {
        let cli = Cli::try_parse_from([
            "flake-updater",
            "--github-token",
            "t",
            "--exclude-patterns",
            "tests/**,*/flake.nix#nixpkgs",
            "--merge-method",
            "squash",
        ])
        .unwrap();
        let settings = Settings::from(cli);
        assert_eq!(settings.exclude_patterns, "tests/**,*/flake.nix#nixpkgs");
        assert_eq!(settings.merge_method, "squash");
    }
}
