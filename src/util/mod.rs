//! Small helpers for URL encoding, JSON extraction and filesystem chores.

pub mod config;

use std::fmt::Write;
use std::io;
use std::path::Path;

use serde_json::Value;
use walkdir::WalkDir;

/// What: Percent-encode a string for use in URLs according to RFC 3986.
///
/// Inputs:
/// - `input`: String to encode.
///
/// Output:
/// - Returns a percent-encoded string where reserved characters are escaped.
///
/// Details:
/// - Unreserved characters (`A-Z`, `a-z`, `0-9`, `-`, `.`, `_`, `~`) are left as-is.
/// - Space is encoded as `%20` (not `+`).
/// - Non-ASCII bytes are hex-escaped byte by byte.
#[must_use]
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push_str("%20"),
            _ => {
                out.push('%');
                let _ = write!(out, "{b:02X}");
            }
        }
    }
    out
}

/// What: Extract a string value from a JSON object by key, defaulting to empty string.
///
/// Inputs:
/// - `v`: JSON value to extract from.
/// - `key`: Key to look up in the JSON object.
///
/// Output:
/// - The string value, or `""` when the key is missing or not a string.
#[must_use]
pub fn s(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// What: Extract an array of strings from a JSON object by trying keys in order.
///
/// Inputs:
/// - `v`: JSON value to extract from.
/// - `keys`: Candidate keys, tried in order.
///
/// Output:
/// - The first array found, with non-string elements dropped; empty when none match.
#[must_use]
pub fn arrs(v: &Value, keys: &[&str]) -> Vec<String> {
    for k in keys {
        if let Some(arr) = v.get(*k).and_then(|x| x.as_array()) {
            return arr
                .iter()
                .filter_map(|e| e.as_str().map(ToOwned::to_owned))
                .collect();
        }
    }
    Vec::new()
}

/// What: Recursively copy a directory tree.
///
/// Inputs:
/// - `from`: Existing source directory.
/// - `to`: Destination; created when missing.
///
/// # Errors
/// - Any I/O error while walking or copying.
///
/// Details:
/// - Symlinks are recreated as links and never followed, so a link pointing
///   outside the tree copies nothing from its target.
pub fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let target = to.join(relative);
        let kind = entry.file_type();
        if kind.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if kind.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> io::Result<()> {
    tracing::warn!(path = %link.display(), "skipping symlink");
    Ok(())
}

/// What: Give `user` ownership of `path` and everything below it.
///
/// Inputs:
/// - `path`: File or directory.
/// - `user`: Account name from the passwd database.
///
/// # Errors
/// - `NotFound` when the user does not exist, otherwise the failing `lchown` error.
///
/// Details:
/// - Without root privileges ownership cannot change hands, so this is a no-op.
/// - Symlinks are re-owned themselves; their targets are never touched or descended into.
#[cfg(unix)]
pub fn chown_recursive(path: &Path, user: &str) -> io::Result<()> {
    use nix::unistd::{User, geteuid};

    if !geteuid().is_root() {
        tracing::debug!(path = %path.display(), "not running as root; leaving ownership unchanged");
        return Ok(());
    }
    let account = User::from_name(user)
        .map_err(io::Error::from)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("user '{user}' does not exist")))?;
    let (uid, gid) = (account.uid.as_raw(), account.gid.as_raw());
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))?;
    }
    Ok(())
}

/// Ownership changes are a no-op off Unix.
///
/// # Errors
/// - Never fails.
#[cfg(not(unix))]
pub fn chown_recursive(_path: &Path, _user: &str) -> io::Result<()> {
    Ok(())
}
