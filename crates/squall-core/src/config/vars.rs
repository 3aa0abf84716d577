//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?:
                (:?-)                  # 2: default operator
                ([^}]*)                # 3: default value
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every variable that could not be resolved, in order of appearance.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate variables from the process environment.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| env::var(name).ok())
}

/// Interpolate variables resolved through `lookup`.
///
/// All unresolved variables are collected so the caller can report them at
/// once instead of failing on the first one.
pub fn interpolate_with<F>(input: &str, lookup: F) -> InterpolationResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }

            let name = caps
                .get(1)
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let operator = caps.get(2).map(|m| m.as_str());
            let fallback = caps.get(3).map(|m| m.as_str());

            match (lookup(name), fallback) {
                (Some(value), _) if value.contains(['\n', '\r']) => {
                    errors.push(format!(
                        "environment variable '{name}' contains newlines, which is not allowed"
                    ));
                    whole.to_string()
                }
                (Some(value), Some(fallback)) if value.is_empty() && operator == Some(":-") => {
                    fallback.to_string()
                }
                (Some(value), _) => value,
                (None, Some(fallback)) => fallback.to_string(),
                (None, None) => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_bare_and_braced_substitution() {
        let result = interpolate_with(
            "project: $PROJECT\nregion: ${REGION}",
            lookup_from(&[("PROJECT", "tarrieu"), ("REGION", "europe-west1")]),
        );
        assert!(result.is_ok());
        assert_eq!(result.text, "project: tarrieu\nregion: europe-west1");
    }

    #[test]
    fn test_all_missing_variables_reported() {
        let result = interpolate_with("a: $FIRST\nb: ${SECOND}", lookup_from(&[]));
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("FIRST"));
        assert!(result.errors[1].contains("SECOND"));
    }

    #[test]
    fn test_colon_default_applies_to_empty() {
        let lookup = lookup_from(&[("CLUSTER_NAME", "")]);
        let result = interpolate_with("${CLUSTER_NAME:-dataproc-cluster}", &lookup);
        assert_eq!(result.text, "dataproc-cluster");

        let result = interpolate_with("[${CLUSTER_NAME-dataproc-cluster}]", &lookup);
        assert_eq!(result.text, "[]");
    }

    #[test]
    fn test_default_applies_to_unset() {
        let result = interpolate_with("${TOPIC-processing_job_ended}", lookup_from(&[]));
        assert!(result.is_ok());
        assert_eq!(result.text, "processing_job_ended");
    }

    #[test]
    fn test_newline_injection_rejected() {
        let result = interpolate_with("x: $BAD", lookup_from(&[("BAD", "a\nb: c")]));
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("newlines"));
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate_with("price: $$100", lookup_from(&[]));
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }
}
