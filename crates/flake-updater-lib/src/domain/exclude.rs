use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use thiserror::Error;

use super::InputName;

/// Errors that can occur when parsing exclusion patterns
#[derive(Debug, Error)]
pub enum ExcludeError {
    #[error("invalid exclude pattern {pattern:?}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// `*` and `?` match across `/`, so `*` alone behaves like "any characters".
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Let `glob` match anywhere in a path, e.g. `legacy` covers `a/legacy/flake.nix`.
fn unanchored(glob: &str) -> String {
    // `***` is not a valid pattern, so an existing leading or trailing star is reused
    let prefix = if glob.starts_with('*') { "" } else { "*" };
    let suffix = if glob.ends_with('*') { "" } else { "*" };
    format!("{prefix}{glob}{suffix}")
}

/// A glob matched anywhere within repository-relative manifest paths.
#[derive(Debug, Clone)]
struct PathGlob {
    pattern: Pattern,
    /// Same glob with a leading `*/` removed, so `*/flake.nix` also covers the
    /// top-level `flake.nix`.
    top_level: Option<Pattern>,
}

impl PathGlob {
    fn parse(raw: &str) -> Result<Self, ExcludeError> {
        let compile = |glob: &str| {
            Pattern::new(glob).map_err(|source| ExcludeError::InvalidGlob {
                pattern: raw.to_string(),
                source,
            })
        };

        let pattern = compile(&unanchored(raw))?;
        let top_level = match raw.strip_prefix("*/") {
            Some(rest) => Some(compile(&unanchored(rest))?),
            None => None,
        };

        Ok(Self { pattern, top_level })
    }

    fn matches(&self, path: &str) -> bool {
        self.pattern.matches_with(path, MATCH_OPTIONS)
            || self
                .top_level
                .as_ref()
                .is_some_and(|p| p.matches_with(path, MATCH_OPTIONS))
    }
}

/// One comma-separated token of the exclusion list.
#[derive(Debug, Clone)]
enum ExcludeRule {
    /// `glob`: drop every matching manifest.
    Manifest(PathGlob),
    /// `glob#input`: keep matching manifests but never update `input` in them.
    Input(PathGlob, InputName),
}

/// Parsed exclusion list, e.g. `"legacy/**,*/flake.nix#nixpkgs"`.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    rules: Vec<ExcludeRule>,
}

impl ExcludeRules {
    /// Parse a comma-separated list of `glob` and `glob#input` tokens.
    /// Blank tokens are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ExcludeError::InvalidGlob`] if a glob cannot be compiled.
    pub fn parse(patterns: &str) -> Result<Self, ExcludeError> {
        let mut rules = Vec::new();

        for token in patterns.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let rule = match token.split_once('#') {
                Some((glob, input)) if !input.trim().is_empty() => {
                    ExcludeRule::Input(PathGlob::parse(glob.trim())?, InputName::from(input.trim()))
                }
                Some((glob, _)) => ExcludeRule::Manifest(PathGlob::parse(glob.trim())?),
                None => ExcludeRule::Manifest(PathGlob::parse(token)?),
            };
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True if a whole-file rule matches the manifest path.
    #[must_use]
    pub fn excludes_manifest(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| match rule {
            ExcludeRule::Manifest(glob) => glob.matches(path),
            ExcludeRule::Input(..) => false,
        })
    }

    /// Inputs excluded for the manifest at `path`.
    #[must_use]
    pub fn excluded_inputs(&self, path: &str) -> BTreeSet<InputName> {
        self.rules
            .iter()
            .filter_map(|rule| match rule {
                ExcludeRule::Input(glob, input) if glob.matches(path) => Some(input.clone()),
                ExcludeRule::Input(..) | ExcludeRule::Manifest(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_has_no_rules() {
        let rules = ExcludeRules::parse("").unwrap();
        assert!(rules.is_empty());
        assert!(!rules.excludes_manifest("flake.nix"));
    }

    #[test]
    fn blank_tokens_are_skipped() {
        let rules = ExcludeRules::parse(" , ,").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn bare_glob_excludes_whole_manifest() {
        let rules = ExcludeRules::parse("subflake/**").unwrap();
        assert!(rules.excludes_manifest("subflake/flake.nix"));
        assert!(rules.excludes_manifest("subflake/sub/flake.nix"));
        assert!(!rules.excludes_manifest("simple/flake.nix"));
        assert!(rules.excluded_inputs("subflake/flake.nix").is_empty());
    }

    #[test]
    fn star_matches_any_characters() {
        let rules = ExcludeRules::parse("sub*").unwrap();
        assert!(rules.excludes_manifest("subflake/sub/flake.nix"));
        assert!(!rules.excludes_manifest("flake.nix"));
    }

    #[test]
    fn question_mark_matches_single_character() {
        let rules = ExcludeRules::parse("dev?/flake.nix").unwrap();
        assert!(rules.excludes_manifest("dev1/flake.nix"));
        assert!(!rules.excludes_manifest("dev12/flake.nix"));
    }

    #[test]
    fn input_suffix_keeps_manifest() {
        let rules = ExcludeRules::parse("**/flake.nix#flake-utils").unwrap();
        assert!(!rules.excludes_manifest("simple/flake.nix"));
        assert_eq!(
            rules.excluded_inputs("simple/flake.nix"),
            BTreeSet::from([InputName::from("flake-utils")])
        );
        assert_eq!(
            rules.excluded_inputs("flake.nix"),
            BTreeSet::from([InputName::from("flake-utils")])
        );
    }

    #[test]
    fn leading_star_slash_covers_top_level() {
        let rules = ExcludeRules::parse("*/flake.nix#nixpkgs").unwrap();
        assert!(rules.excluded_inputs("flake.nix").contains(&InputName::from("nixpkgs")));
        assert!(rules.excluded_inputs("a/b/flake.nix").contains(&InputName::from("nixpkgs")));
    }

    #[test]
    fn bare_directory_name_excludes_manifest() {
        let rules = ExcludeRules::parse("simple").unwrap();
        assert!(rules.excludes_manifest("simple/flake.nix"));
        assert!(rules.excludes_manifest("a/simple/flake.nix"));
        assert!(!rules.excludes_manifest("flake.nix"));
    }

    #[test]
    fn pattern_matches_within_nested_path() {
        let rules = ExcludeRules::parse("legacy/*,sub#nixpkgs").unwrap();
        assert!(rules.excludes_manifest("nested/legacy/flake.nix"));
        assert!(!rules.excludes_manifest("nested/modern/flake.nix"));
        assert!(rules.excluded_inputs("a/sub/flake.nix").contains(&InputName::from("nixpkgs")));
    }

    #[test]
    fn mixed_rules_apply_independently() {
        let rules = ExcludeRules::parse("simple/**, subflake/sub/flake.nix#nixos-hardware").unwrap();

        assert!(rules.excludes_manifest("simple/flake.nix"));
        assert!(!rules.excludes_manifest("subflake/sub/flake.nix"));
        assert!(rules.excluded_inputs("simple/flake.nix").is_empty());
        assert_eq!(
            rules.excluded_inputs("subflake/sub/flake.nix"),
            BTreeSet::from([InputName::from("nixos-hardware")])
        );
        assert!(rules.excluded_inputs("subflake/flake.nix").is_empty());
    }

    #[test]
    fn union_of_input_rules() {
        let rules = ExcludeRules::parse("flake.nix#a,*#b,other/flake.nix#c").unwrap();
        assert_eq!(
            rules.excluded_inputs("flake.nix"),
            BTreeSet::from([InputName::from("a"), InputName::from("b")])
        );
    }

    #[test]
    fn empty_input_suffix_excludes_manifest() {
        let rules = ExcludeRules::parse("legacy/flake.nix#").unwrap();
        assert!(rules.excludes_manifest("legacy/flake.nix"));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = ExcludeRules::parse("[unclosed").unwrap_err();
        assert!(matches!(err, ExcludeError::InvalidGlob { .. }));
    }
}
