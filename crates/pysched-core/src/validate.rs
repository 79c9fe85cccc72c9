//! Authoring-time validation helpers.
//!
//! Everything here runs when a script or trigger is created or updated —
//! malformed input is rejected before it can ever reach the dispatch loop.

use std::collections::BTreeMap;

use crate::error::{PyschedError, Result};

/// Convert a display name to a filesystem-safe slug.
///
/// Lowercases, replaces whitespace runs with `-`, strips everything outside
/// `[a-z0-9-]`, collapses repeated hyphens, and trims. An input with no
/// usable characters falls back to `"script"`.
pub fn safe_slug(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    let mut last_hyphen = true; // swallow leading hyphens

    for ch in display_name.to_lowercase().chars() {
        if ch.is_whitespace() || ch == '-' {
            if !last_hyphen {
                slug.push('-');
                last_hyphen = true;
            }
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
            last_hyphen = false;
        }
        // anything else is dropped
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "script".to_string()
    } else {
        slug
    }
}

/// True for names matching `[A-Z_][A-Z0-9_]*` — the shape the runner is
/// willing to inject into a child process environment.
pub fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Reject any environment map containing an invalid variable name.
pub fn validate_env_vars(env_vars: &BTreeMap<String, String>) -> Result<()> {
    for name in env_vars.keys() {
        if !is_valid_env_var_name(name) {
            return Err(PyschedError::Validation(format!(
                "invalid environment variable name: {name}"
            )));
        }
    }
    Ok(())
}

/// Validate requirements.txt content: each non-comment line must start with
/// a plausible package name. Version specifiers are not interpreted here —
/// pip is the authority — this only rejects obvious garbage early.
pub fn validate_requirements(requirements: &str) -> Result<()> {
    for line in requirements.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let name_end = line
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
            .unwrap_or(line.len());
        let name = &line[..name_end];

        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(PyschedError::Validation(format!(
                "invalid package name in requirements: {line}"
            )));
        }
    }
    Ok(())
}

/// Accepted interpreter versions: 3.8 through 3.13.
pub fn is_valid_python_version(version: &str) -> bool {
    matches!(version, "3.8" | "3.9" | "3.10" | "3.11" | "3.12" | "3.13")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_basic_conversion() {
        assert_eq!(safe_slug("My Backup Script"), "my-backup-script");
        assert_eq!(safe_slug("  spaced   out  "), "spaced-out");
        assert_eq!(safe_slug("Data (v2)!"), "data-v2");
    }

    #[test]
    fn slug_collapses_hyphens_and_trims() {
        assert_eq!(safe_slug("a---b"), "a-b");
        assert_eq!(safe_slug("--leading and trailing--"), "leading-and-trailing");
    }

    #[test]
    fn slug_falls_back_when_empty() {
        assert_eq!(safe_slug("!!!"), "script");
        assert_eq!(safe_slug(""), "script");
    }

    #[test]
    fn env_var_names() {
        assert!(is_valid_env_var_name("API_KEY"));
        assert!(is_valid_env_var_name("_PRIVATE"));
        assert!(is_valid_env_var_name("DB2_URL"));
        assert!(!is_valid_env_var_name("lowercase"));
        assert!(!is_valid_env_var_name("1STARTS_WITH_DIGIT"));
        assert!(!is_valid_env_var_name("HAS-HYPHEN"));
        assert!(!is_valid_env_var_name(""));
    }

    #[test]
    fn env_var_map_validation() {
        let mut vars = BTreeMap::new();
        vars.insert("GOOD_NAME".to_string(), "v".to_string());
        assert!(validate_env_vars(&vars).is_ok());

        vars.insert("bad name".to_string(), "v".to_string());
        assert!(validate_env_vars(&vars).is_err());
    }

    #[test]
    fn requirements_accepts_common_forms() {
        let reqs = "requests==2.31.0\n# comment\n\nnumpy>=1.26\npython-dateutil~=2.8";
        assert!(validate_requirements(reqs).is_ok());
    }

    #[test]
    fn requirements_rejects_garbage() {
        assert!(validate_requirements("-e git+https://evil").is_err());
        assert!(validate_requirements("==2.0").is_err());
    }

    #[test]
    fn python_versions() {
        assert!(is_valid_python_version("3.12"));
        assert!(is_valid_python_version("3.8"));
        assert!(!is_valid_python_version("2.7"));
        assert!(!is_valid_python_version("3"));
    }
}
