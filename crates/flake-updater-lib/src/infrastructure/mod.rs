pub mod discovery;
pub mod git;
pub mod github;
pub mod isolation;
pub mod nix;
pub mod repo;

pub use discovery::{DiscoveryError, discover};
pub use git::{DEFAULT_BOT_EMAIL, DEFAULT_BOT_NAME, GitError, GitIdentity, GitRunner};
pub use github::{GITHUB_API_URL, GithubClient, GithubError, default_graphql_url};
pub use isolation::{IsolatedCheckout, IsolationError, IsolationManager};
pub use nix::{DEFAULT_NOISE_PREFIXES, NixCli, clean_update_message, flake_locator, locate};
pub use repo::{FALLBACK_BASE_BRANCH, PushTarget, RepoError, RepoSlug, detect_base_branch, find_root};
