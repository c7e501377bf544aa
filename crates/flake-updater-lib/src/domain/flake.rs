use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of a flake manifest.
pub const MANIFEST_FILE_NAME: &str = "flake.nix";

/// File name of the lock artifact paired with a manifest.
pub const LOCK_FILE_NAME: &str = "flake.lock";

/// Name of a single input declared in a flake (e.g., "nixpkgs", "flake-utils")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputName(pub String);

impl InputName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InputName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InputName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A discovered `flake.nix` that has a `flake.lock` next to it.
///
/// The path is relative to the repository root and always uses `/` as separator,
/// so it can be matched against exclusion globs and embedded in branch names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flake {
    path: String,
    excluded_inputs: BTreeSet<InputName>,
}

impl Flake {
    #[must_use]
    pub fn new(path: impl Into<String>, excluded_inputs: BTreeSet<InputName>) -> Self {
        Self {
            path: path.into(),
            excluded_inputs,
        }
    }

    /// Repository-relative path of the manifest.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn excluded_inputs(&self) -> &BTreeSet<InputName> {
        &self.excluded_inputs
    }

    #[must_use]
    pub fn is_excluded(&self, input: &InputName) -> bool {
        self.excluded_inputs.contains(input)
    }

    /// True for the conventional top-level `flake.nix`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path == MANIFEST_FILE_NAME
    }

    /// Directory holding the manifest, relative to the repository root.
    /// Empty for the top-level flake.
    #[must_use]
    pub fn dir(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    /// Absolute directory of this flake inside the given checkout.
    #[must_use]
    pub fn dir_in(&self, work_dir: &Path) -> PathBuf {
        let dir = self.dir();
        if dir.is_empty() {
            work_dir.to_path_buf()
        } else {
            work_dir.join(dir)
        }
    }

    /// Branch that carries the update of `input` in this flake.
    ///
    /// - `flake.nix` + `nixpkgs` -> `update-nixpkgs`
    /// - `sub/dir/flake.nix` + `nixpkgs` -> `update-nixpkgs-sub-dir-flake-nix`
    #[must_use]
    pub fn branch_name(&self, input: &InputName) -> String {
        if self.is_root() {
            format!("update-{input}")
        } else {
            format!("update-{input}-{}", sanitize(&self.path))
        }
    }

    /// Suffix naming this flake in messages: empty for the top-level flake.
    #[must_use]
    pub fn location_suffix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!(" in {}", self.path)
        }
    }

    /// Remove excluded inputs from the list, preserving order.
    #[must_use]
    pub fn retain_included(&self, inputs: Vec<InputName>) -> Vec<InputName> {
        inputs
            .into_iter()
            .filter(|input| !self.is_excluded(input))
            .collect()
    }
}

impl fmt::Display for Flake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Replace every character outside `[A-Za-z0-9]` with `-`.
fn sanitize(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flake(path: &str) -> Flake {
        Flake::new(path, BTreeSet::new())
    }

    #[test]
    fn root_flake_branch_is_short() {
        let name = flake("flake.nix").branch_name(&InputName::from("nixpkgs"));
        assert_eq!(name, "update-nixpkgs");
    }

    #[test]
    fn nested_flake_branch_embeds_sanitized_path() {
        let name = flake("sub/dir/name.ext").branch_name(&InputName::from("X"));
        assert_eq!(name, "update-X-sub-dir-name-ext");
    }

    #[test]
    fn sanitize_replaces_each_character() {
        assert_eq!(sanitize("a__b/c.nix"), "a--b-c-nix");
    }

    #[test]
    fn dir_of_root_flake_is_empty() {
        assert_eq!(flake("flake.nix").dir(), "");
        assert_eq!(flake("dev/flake.nix").dir(), "dev");
        assert_eq!(flake("a/b/flake.nix").dir(), "a/b");
    }

    #[test]
    fn dir_in_joins_checkout() {
        let work = Path::new("/tmp/checkout");
        assert_eq!(flake("flake.nix").dir_in(work), PathBuf::from("/tmp/checkout"));
        assert_eq!(
            flake("dev/flake.nix").dir_in(work),
            PathBuf::from("/tmp/checkout/dev")
        );
    }

    #[test]
    fn location_suffix_only_for_nested() {
        assert_eq!(flake("flake.nix").location_suffix(), "");
        assert_eq!(flake("dev/flake.nix").location_suffix(), " in dev/flake.nix");
    }

    #[test]
    fn retain_included_drops_excluded() {
        let excluded = BTreeSet::from([InputName::from("nixpkgs")]);
        let flake = Flake::new("flake.nix", excluded);
        let kept = flake.retain_included(vec![
            InputName::from("flake-utils"),
            InputName::from("nixpkgs"),
        ]);
        assert_eq!(kept, vec![InputName::from("flake-utils")]);
    }
}
