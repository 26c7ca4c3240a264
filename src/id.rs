//! Identifier and branch-name sanitization. Every path that turns untrusted
//! input into a filesystem path, a shell argument, or a store key passes
//! through here first.

use crate::error::ApiError;

const RESERVED: &[&str] = &["apex", "www", "api"];

/// Turn arbitrary user input into a safe project identifier.
///
/// Lowercases, replaces whitespace runs with `-`, strips any character
/// outside `[a-z0-9_-]`, collapses consecutive `-`, trims leading/trailing
/// `-`. Fails when the result is empty or a reserved name.
pub fn sanitize_id(name: &str) -> Result<String, ApiError> {
    let lowered = name.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for c in lowered.chars() {
        let mapped = if c.is_whitespace() {
            Some('-')
        } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            Some(c)
        } else {
            None
        };

        match mapped {
            Some('-') => {
                if !last_was_dash {
                    out.push('-');
                }
                last_was_dash = true;
            }
            Some(c) => {
                out.push(c);
                last_was_dash = false;
            }
            None => {}
        }
    }

    // The leading character must be alphanumeric (see invariant 1 in the
    // data model); `_` and `-` are only legal after the first position.
    let trimmed = out.trim_start_matches(['-', '_']).trim_end_matches('-');

    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(
            "identifier must contain at least one alphanumeric character".into(),
        ));
    }

    if RESERVED.contains(&trimmed) {
        return Err(ApiError::BadRequest(format!(
            "'{trimmed}' is a reserved identifier"
        )));
    }

    Ok(trimmed.to_owned())
}

/// Accept only `^[a-zA-Z0-9/_-]+$` and reject traversal/ref-syntax tricks,
/// defaulting to `main` on any rejection. Untrusted branch input must always
/// pass through this before being handed to git.
pub fn sanitize_branch(branch: &str) -> String {
    const BANNED: &[&str] = &["refs/", "HEAD~", "HEAD^", "@{", "..", "//", "stash"];

    let charset_ok = !branch.is_empty()
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_' || c == '-');

    let banned_found = BANNED.iter().any(|needle| branch.contains(needle));

    if charset_ok && !banned_found {
        branch.to_owned()
    } else {
        "main".to_owned()
    }
}
