//! Line-level helpers for `key = value` configuration files.

/// What: Check if a line should be skipped (empty or comment).
///
/// Inputs:
/// - `line`: Line to check
///
/// Output:
/// - `true` if the line should be skipped, `false` otherwise
///
/// Details:
/// - Skips empty lines and lines starting with `#`, `//`, or `;`
#[must_use]
pub fn skip_comment_or_empty(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("//")
        || trimmed.starts_with(';')
}

/// What: Parse a key-value pair from a line.
///
/// Inputs:
/// - `line`: Line containing `key = value`, optionally followed by ` # comment`
///
/// Output:
/// - `Some((key, value))` with a normalized key, `None` when there is no `=` or the key is empty
///
/// Details:
/// - Splits on the first `=`.
/// - A `#` preceded by whitespace starts an inline comment.
/// - Keys are lowercased; `.`, `-` and spaces become `_`.
#[must_use]
pub fn parse_key_value(line: &str) -> Option<(String, String)> {
    let (key, value) = line.trim().split_once('=')?;
    let key = normalize_key(key);
    if key.is_empty() {
        return None;
    }
    let value = value
        .find(" #")
        .or_else(|| value.find("\t#"))
        .map_or(value, |i| &value[..i]);
    Some((key, value.trim().to_string()))
}

/// Lowercase `key` and unify separators to `_`.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(['.', '-', ' '], "_")
}

/// What: Interpret a config value as a boolean.
///
/// Output:
/// - `Some(true)` for `true/1/yes/on`, `Some(false)` for `false/0/no/off`, `None` otherwise.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Split a comma separated list, dropping empty items.
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}
