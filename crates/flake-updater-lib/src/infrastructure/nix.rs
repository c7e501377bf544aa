use log::{debug, info};
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output};

use super::git::GitRunner;
use crate::domain::{Flake, FlakeTool, InputName, ToolError};

const NIX_PROGRAM: &str = "nix";
const EXPERIMENTAL_FEATURES: [&str; 2] = ["--extra-experimental-features", "nix-command flakes"];

/// Line prefixes dropped from `nix flake update` output by default.
pub const DEFAULT_NOISE_PREFIXES: &[&str] = &["unpacking ", "warning:"];

/// Output of `nix flake metadata --json`, reduced to the lock graph.
#[derive(Debug, Deserialize)]
struct FlakeMetadata {
    locks: Option<FlakeLocks>,
}

#[derive(Debug, Deserialize)]
struct FlakeLocks {
    #[serde(default = "default_root")]
    root: String,
    nodes: HashMap<String, LockNode>,
}

#[derive(Debug, Deserialize)]
struct LockNode {
    /// Input name -> node id, or a "follows" path (a list of names).
    #[serde(default)]
    inputs: BTreeMap<String, serde_json::Value>,
}

fn default_root() -> String {
    "root".to_string()
}

/// Names of the root node's direct inputs in `nix flake metadata --json` output.
///
/// # Errors
///
/// Returns [`ToolError::Metadata`] for invalid JSON and [`ToolError::MissingRoot`]
/// if there is no lock graph or no root node.
pub fn parse_direct_inputs(json: &str, flake: &Flake) -> Result<Vec<InputName>, ToolError> {
    let metadata: FlakeMetadata =
        serde_json::from_str(json).map_err(|source| ToolError::Metadata {
            flake: flake.path().to_string(),
            source,
        })?;

    let missing = || ToolError::MissingRoot {
        flake: flake.path().to_string(),
    };
    let locks = metadata.locks.ok_or_else(missing)?;
    let root = locks.nodes.get(&locks.root).ok_or_else(missing)?;

    Ok(root.inputs.keys().cloned().map(InputName::from).collect())
}

/// Flake reference for the checkout at `repo_root`, selecting `subdir` with
/// `dir=`. Nix resolves relative paths against the repository root, so a nested
/// flake must not be addressed as if its directory were the root.
///
/// # Errors
///
/// Returns [`ToolError::RepositoryRoot`] if `repo_root` is not absolute.
pub fn flake_locator(repo_root: &Path, subdir: &Path) -> Result<String, ToolError> {
    let mut url = Url::from_file_path(repo_root).map_err(|()| ToolError::RepositoryRoot {
        path: repo_root.to_path_buf(),
        reason: "not an absolute path".to_string(),
    })?;

    let parts: Vec<_> = subdir
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            Component::CurDir
            | Component::ParentDir
            | Component::RootDir
            | Component::Prefix(_) => None,
        })
        .collect();
    if parts.is_empty() {
        url.set_query(Some("shallow=1"));
    } else {
        url.set_query(Some(&format!("shallow=1&dir={}", parts.join("/"))));
    }

    Ok(format!("git+{url}"))
}

/// Locator for `flake` as checked out under `work_dir`, addressed through the
/// git repository that contains it.
///
/// # Errors
///
/// Returns [`ToolError::RepositoryRoot`] if the flake directory is not inside
/// a git working tree.
pub fn locate(flake: &Flake, work_dir: &Path) -> Result<String, ToolError> {
    let (root, subdir) = repository_root(&flake.dir_in(work_dir))?;
    flake_locator(&root, &subdir)
}

/// Drop blank lines and lines starting with one of `noise_prefixes`. Kept
/// lines retain their indentation.
#[must_use]
pub fn clean_update_message<S: AsRef<str>>(stderr: &str, noise_prefixes: &[S]) -> String {
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| {
            let content = line.trim_start();
            !content.is_empty()
                && !noise_prefixes
                    .iter()
                    .any(|prefix| content.starts_with(prefix.as_ref()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the `nix` command line.
#[derive(Debug, Clone)]
pub struct NixCli {
    program: String,
    noise_prefixes: Vec<String>,
}

impl Default for NixCli {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_PREFIXES.iter().map(ToString::to_string).collect())
    }
}

impl NixCli {
    #[must_use]
    pub fn new(noise_prefixes: Vec<String>) -> Self {
        Self {
            program: NIX_PROGRAM.to_string(),
            noise_prefixes,
        }
    }

    fn run(&self, args: &[&str], cwd: &Path, flake: &Flake) -> Result<Output, ToolError> {
        debug!("{} {} (in {})", self.program, args.join(" "), cwd.display());

        let output = Command::new(&self.program)
            .args(EXPERIMENTAL_FEATURES)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(ToolError::CommandFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                flake: flake.path().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Canonical git top-level of `dir` and `dir` relative to it.
fn repository_root(dir: &Path) -> Result<(PathBuf, PathBuf), ToolError> {
    let unresolved = |reason: String| ToolError::RepositoryRoot {
        path: dir.to_path_buf(),
        reason,
    };

    let toplevel = GitRunner::new(dir)
        .show_toplevel()
        .map_err(|e| unresolved(e.to_string()))?;
    let root = toplevel
        .canonicalize()
        .map_err(|e| unresolved(e.to_string()))?;
    let canonical_dir = dir.canonicalize().map_err(|e| unresolved(e.to_string()))?;

    let subdir = canonical_dir
        .strip_prefix(&root)
        .map_err(|_| unresolved(format!("not below {}", root.display())))?
        .to_path_buf();

    Ok((root, subdir))
}

impl FlakeTool for NixCli {
    fn direct_inputs(&self, flake: &Flake, repo_root: &Path) -> Result<Vec<InputName>, ToolError> {
        let output = self.run(
            &["flake", "metadata", "--json", "--no-write-lock-file"],
            &flake.dir_in(repo_root),
            flake,
        )?;

        let inputs = parse_direct_inputs(&String::from_utf8_lossy(&output.stdout), flake)?;
        info!(
            "Found inputs in {flake}: {}",
            inputs.iter().map(InputName::as_str).collect::<Vec<_>>().join(", ")
        );
        Ok(inputs)
    }

    fn update_input(
        &self,
        input: &InputName,
        flake: &Flake,
        work_dir: &Path,
    ) -> Result<String, ToolError> {
        info!("Updating flake input: {input} in {flake}");

        let flake_dir = flake.dir_in(work_dir);
        let locator = locate(flake, work_dir)?;

        let output = self.run(
            &["flake", "update", input.as_str(), "--flake", &locator],
            &flake_dir,
            flake,
        )?;

        info!("Successfully updated flake input: {input} in {flake}");
        Ok(clean_update_message(
            &String::from_utf8_lossy(&output.stderr),
            &self.noise_prefixes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn flake(path: &str) -> Flake {
        Flake::new(path, BTreeSet::new())
    }

    const METADATA: &str = r#"{
        "description": "test",
        "locks": {
            "nodes": {
                "flake-utils": {
                    "inputs": { "systems": "systems" },
                    "locked": { "owner": "numtide", "repo": "flake-utils", "type": "github" }
                },
                "nixos-hardware": { "locked": { "type": "github" } },
                "root": {
                    "inputs": {
                        "flake-utils": "flake-utils",
                        "hardware": "nixos-hardware",
                        "utils-follow": ["flake-utils"]
                    }
                },
                "systems": { "locked": { "type": "github" } }
            },
            "root": "root",
            "version": 7
        }
    }"#;

    #[test]
    fn direct_inputs_are_root_input_names() {
        let inputs = parse_direct_inputs(METADATA, &flake("flake.nix")).unwrap();
        assert_eq!(
            inputs,
            vec![
                InputName::from("flake-utils"),
                InputName::from("hardware"),
                InputName::from("utils-follow"),
            ]
        );
    }

    #[test]
    fn transitive_nodes_are_not_inputs() {
        let inputs = parse_direct_inputs(METADATA, &flake("flake.nix")).unwrap();
        assert!(!inputs.contains(&InputName::from("systems")));
        assert!(!inputs.contains(&InputName::from("nixos-hardware")));
    }

    #[test]
    fn root_without_inputs_is_empty() {
        let json = r#"{"locks": {"nodes": {"root": {}}, "root": "root", "version": 7}}"#;
        assert!(parse_direct_inputs(json, &flake("flake.nix")).unwrap().is_empty());
    }

    #[test]
    fn missing_locks_is_an_error() {
        let err = parse_direct_inputs(r#"{"description": "x"}"#, &flake("a/flake.nix")).unwrap_err();
        assert!(matches!(err, ToolError::MissingRoot { ref flake } if flake == "a/flake.nix"));
    }

    #[test]
    fn missing_root_node_is_an_error() {
        let json = r#"{"locks": {"nodes": {"other": {}}, "root": "root", "version": 7}}"#;
        assert!(matches!(
            parse_direct_inputs(json, &flake("flake.nix")),
            Err(ToolError::MissingRoot { .. })
        ));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            parse_direct_inputs("not json", &flake("flake.nix")),
            Err(ToolError::Metadata { .. })
        ));
    }

    #[test]
    fn locator_for_root_flake() {
        assert_eq!(
            flake_locator(Path::new("/tmp/wt"), Path::new("")).unwrap(),
            "git+file:///tmp/wt?shallow=1"
        );
    }

    #[test]
    fn locator_selects_subdirectory() {
        assert_eq!(
            flake_locator(Path::new("/tmp/wt"), Path::new("dev/flake")).unwrap(),
            "git+file:///tmp/wt?shallow=1&dir=dev/flake"
        );
    }

    #[test]
    fn locator_escapes_reserved_characters() {
        assert_eq!(
            flake_locator(Path::new("/tmp/my checkout#1"), Path::new("dev flake")).unwrap(),
            "git+file:///tmp/my%20checkout%231?shallow=1&dir=dev%20flake"
        );
    }

    #[test]
    fn locator_requires_absolute_root() {
        assert!(matches!(
            flake_locator(Path::new("relative/wt"), Path::new("")),
            Err(ToolError::RepositoryRoot { .. })
        ));
    }

    #[test]
    fn clean_message_drops_noise_and_blank_lines() {
        let stderr = concat!(
            "unpacking 'github:numtide/flake-utils/abc' into the Git cache...\n",
            "warning: Git tree '/tmp/wt' is dirty\n",
            "\n",
            "• Updated input 'flake-utils':\n",
            "    'github:numtide/flake-utils/old' (2023-01-01)\n",
            "  → 'github:numtide/flake-utils/new' (2024-01-01)  \n",
        );

        let cleaned = clean_update_message(stderr, DEFAULT_NOISE_PREFIXES);

        assert_eq!(
            cleaned,
            concat!(
                "• Updated input 'flake-utils':\n",
                "    'github:numtide/flake-utils/old' (2023-01-01)\n",
                "  → 'github:numtide/flake-utils/new' (2024-01-01)",
            )
        );
    }

    #[test]
    fn indented_noise_is_dropped() {
        let cleaned = clean_update_message("  warning: dirty tree\n  kept\n", DEFAULT_NOISE_PREFIXES);
        assert_eq!(cleaned, "  kept");
    }

    #[test]
    fn clean_message_uses_configured_prefixes() {
        let cleaned = clean_update_message("copying path\nkeep me\n", &["copying".to_string()]);
        assert_eq!(cleaned, "keep me");
    }

    #[test]
    fn nested_flake_in_worktree_is_located_through_its_root() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let nested = repo.join("sub").join("dev");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("flake.nix"), "{ }\n").unwrap();
        let git = GitRunner::new(&repo);
        git.run_checked(&["init", "-q"]).unwrap();
        git.run_checked(&["add", "--all"]).unwrap();
        git.run_checked(&["-c", "user.name=t", "-c", "user.email=t@example.com", "commit", "-q", "-m", "init"])
            .unwrap();
        let worktree = dir.path().join("worktree");
        git.worktree_add_detached(&worktree, "HEAD").unwrap();

        let locator = locate(&flake("sub/dev/flake.nix"), &worktree).unwrap();

        assert_eq!(
            locator,
            format!(
                "git+file://{}?shallow=1&dir=sub/dev",
                worktree.canonicalize().unwrap().display()
            )
        );
    }

    #[test]
    fn subdirectory_is_resolved_against_git_root() {
        let dir = tempfile::tempdir().unwrap();
        GitRunner::new(dir.path()).run_checked(&["init", "-q"]).unwrap();
        let nested = dir.path().join("dev-flake");
        std::fs::create_dir(&nested).unwrap();

        let (root, subdir) = repository_root(&nested).unwrap();

        assert_eq!(root, dir.path().canonicalize().unwrap());
        assert_eq!(subdir, PathBuf::from("dev-flake"));
    }
}
