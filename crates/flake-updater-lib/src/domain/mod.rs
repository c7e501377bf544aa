pub mod exclude;
pub mod flake;
pub mod forge;
pub mod message;
pub mod publish;
pub mod tool;

pub use exclude::{ExcludeError, ExcludeRules};
pub use flake::{Flake, InputName, LOCK_FILE_NAME, MANIFEST_FILE_NAME};
pub use forge::{Forge, ForgeError, InvalidMergeMethod, MergeMethod, PullRequest, PullRequestIntent};
pub use message::{DEFAULT_COMMIT_TEMPLATE, commit_message, pr_body, pr_title};
pub use publish::{AutoMerge, ChangePublisher, PublishOutcome};
pub use tool::{FlakeTool, ToolError, enumerate};
