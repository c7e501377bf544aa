use super::{Flake, InputName};

/// Default commit message; `{{in}}` expands to ` in <path>` for nested flakes.
pub const DEFAULT_COMMIT_TEMPLATE: &str = "Update flake input: {{input}}{{in}}";

const INPUT_PLACEHOLDER: &str = "{{input}}";
const LOCATION_PLACEHOLDER: &str = "{{in}}";

/// Render the commit message template for one input.
#[must_use]
pub fn commit_message(template: &str, input: &InputName, flake: &Flake) -> String {
    template
        .replace(INPUT_PLACEHOLDER, input.as_str())
        .replace(LOCATION_PLACEHOLDER, &flake.location_suffix())
}

#[must_use]
pub fn pr_title(input: &InputName, flake: &Flake) -> String {
    format!("Update flake input: {input}{}", flake.location_suffix())
}

/// Pull request body, with the cleaned update output appended when present.
#[must_use]
pub fn pr_body(input: &InputName, flake: &Flake, summary: &str) -> String {
    let mut body = if flake.is_root() {
        format!("This PR updates the flake input `{input}` to the latest version.")
    } else {
        format!(
            "This PR updates the flake input `{input}` in `{}` to the latest version.",
            flake.path()
        )
    };

    if !summary.trim().is_empty() {
        body.push_str("\n\n```\n");
        body.push_str(summary.trim_end());
        body.push_str("\n```");
    }

    body
}
