//! Identifier validation and generation.
//!
//! Every identifier that reaches the filesystem must pass the safe charset
//! check first; ids become file names, so this is the path-traversal guard.

use crate::error::CoordError;

/// Maximum identifier length accepted from tool calls.
pub const MAX_IDENT_LEN: usize = 80;

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn check(field: &str, value: &str, allow_colon: bool) -> Result<(), CoordError> {
    if value.is_empty() {
        return Err(CoordError::validation(field, "must not be empty"));
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(CoordError::validation(
            field,
            format!("exceeds {MAX_IDENT_LEN} characters"),
        ));
    }
    if value.contains("..") {
        return Err(CoordError::validation(field, "must not contain '..'"));
    }
    for c in value.chars() {
        if !is_safe_char(c) && !(allow_colon && c == ':') {
            return Err(CoordError::validation(
                field,
                format!("character '{c}' outside safe set [A-Za-z0-9._-]"),
            ));
        }
    }
    Ok(())
}

/// Validate an identifier used as (part of) a filename: sessions, tasks,
/// workers, pipelines, teams, members, context keys.
pub fn validate_ident(field: &str, value: &str) -> Result<(), CoordError> {
    check(field, value, false)
}

/// Validate a model/agent/runtime token. Same rules, plus `:` for
/// provider-qualified model strings.
pub fn validate_model_ident(field: &str, value: &str) -> Result<(), CoordError> {
    check(field, value, true)
}

/// True when `value` passes [`validate_ident`].
pub fn is_safe_ident(value: &str) -> bool {
    check("ident", value, false).is_ok()
}

/// Generate a millisecond-epoch id with a single-letter type prefix:
/// `T…` for tasks, `W…` for workers, `P…` for pipelines.
pub fn stamped_id(prefix: char) -> String {
    format!("{prefix}{}", chrono::Utc::now().timestamp_millis())
}

/// Resolve `provided` or generate a fresh stamped id; either way the result
/// has passed the safe charset check.
pub fn resolve_id(field: &str, provided: Option<&str>, prefix: char) -> Result<String, CoordError> {
    match provided {
        Some(value) => {
            validate_ident(field, value)?;
            Ok(value.to_string())
        }
        None => Ok(stamped_id(prefix)),
    }
}

/// Team names are stored lower-cased.
pub fn normalize_team_name(value: &str) -> Result<String, CoordError> {
    validate_ident("team_name", value)?;
    Ok(value.to_ascii_lowercase())
}

/// Derive a project slug from a working directory: final path component,
/// lower-cased, unsafe characters folded to `-`.
pub fn project_slug(dir: &std::path::Path) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let slug: String = name
        .chars()
        .map(|c| {
            if is_safe_char(c) {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        "root".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn accepts_safe_identifiers() {
        for id in ["abc12345", "T1700000000000", "my-team_v2", "a.b.c"] {
            assert!(is_safe_ident(id), "{id} should be safe");
        }
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_ident("task_id", "../etc/passwd").is_err());
        assert!(validate_ident("task_id", "a/b").is_err());
        assert!(validate_ident("task_id", "a\\b").is_err());
        assert!(validate_ident("task_id", "..").is_err());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(validate_ident("session", "").is_err());
        let long = "x".repeat(MAX_IDENT_LEN + 1);
        assert!(validate_ident("session", &long).is_err());
        let max = "x".repeat(MAX_IDENT_LEN);
        assert!(validate_ident("session", &max).is_ok());
    }

    #[test]
    fn error_names_the_field() {
        let err = validate_ident("assignee", "has space").unwrap_err();
        assert!(err.to_string().contains("assignee"));
    }

    #[test]
    fn model_ident_allows_colon() {
        assert!(validate_ident("model", "anthropic:sonnet").is_err());
        assert!(validate_model_ident("model", "anthropic:sonnet").is_ok());
        assert!(validate_model_ident("model", "bad/model").is_err());
    }

    #[test]
    fn stamped_ids_carry_prefix() {
        let id = stamped_id('W');
        assert!(id.starts_with('W'));
        assert!(id[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn resolve_id_prefers_provided() {
        assert_eq!(resolve_id("task_id", Some("TA"), 'T').unwrap(), "TA");
        assert!(resolve_id("task_id", Some("bad id"), 'T').is_err());
        assert!(resolve_id("task_id", None, 'T').unwrap().starts_with('T'));
    }

    #[test]
    fn team_names_are_lowercased() {
        assert_eq!(normalize_team_name("Alpha").unwrap(), "alpha");
        assert!(normalize_team_name("bad name").is_err());
    }

    #[test]
    fn project_slug_folds_unsafe_chars() {
        assert_eq!(project_slug(Path::new("/home/me/My Repo")), "my-repo");
        assert_eq!(project_slug(Path::new("/")), "root");
    }
}
