use log::{debug, info};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::domain::{ExcludeError, ExcludeRules, Flake, LOCK_FILE_NAME, MANIFEST_FILE_NAME};

/// Directories never searched for flakes.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Errors that abort flake discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Exclude(#[from] ExcludeError),

    #[error("failed to walk {}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Find every locked `flake.nix` under `root`, applying the exclusion list.
///
/// Flakes without a `flake.lock` next to them are skipped. Paths in the result
/// are relative to `root` and use `/` as separator.
///
/// # Errors
///
/// Returns [`DiscoveryError::Exclude`] for an invalid pattern and
/// [`DiscoveryError::Walk`] if any directory cannot be read.
pub fn discover(root: &Path, exclude_patterns: &str) -> Result<Vec<Flake>, DiscoveryError> {
    let rules = ExcludeRules::parse(exclude_patterns)?;
    if !rules.is_empty() {
        info!("Exclude patterns: {exclude_patterns}");
    }

    let mut flakes = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

    for entry in walker {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            root: root.to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE_NAME {
            continue;
        }

        let Some(path) = relative_path(root, entry.path()) else {
            continue;
        };

        if rules.excludes_manifest(&path) {
            info!("Excluding {path}");
            continue;
        }

        if !entry.path().with_file_name(LOCK_FILE_NAME).is_file() {
            info!("Skipping {path} - no {LOCK_FILE_NAME} found");
            continue;
        }

        let excluded = rules.excluded_inputs(&path);
        if !excluded.is_empty() {
            debug!(
                "Excluded inputs for {path}: {}",
                excluded.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            );
        }
        flakes.push(Flake::new(path, excluded));
    }

    info!("Found {} flake file(s) after exclusions", flakes.len());
    Ok(flakes)
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// `root`-relative path joined with `/`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}
