use std::env;
use std::path::{Path, PathBuf};

/// Directory name used under XDG bases.
const APP_DIR: &str = "decman";

/// System-wide configuration directory.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/decman";

/// What: Locate the configuration directory.
///
/// Inputs:
/// - `explicit`: Directory passed with `--config`, if any.
///
/// Output:
/// - `explicit` when given; otherwise the first existing directory among
///   `$XDG_CONFIG_HOME/decman`, `$HOME/.config/decman` and `/etc/decman`,
///   falling back to `/etc/decman`.
pub fn resolve_config_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME")
        && !xdg.trim().is_empty()
    {
        candidates.push(Path::new(&xdg).join(APP_DIR));
    }
    if let Ok(home) = env::var("HOME") {
        candidates.push(Path::new(&home).join(".config").join(APP_DIR));
    }
    candidates
        .into_iter()
        .find(|p| p.is_dir())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_DIR))
}

/// Resolve an XDG base directory from environment or default to `$HOME` + segments.
///
/// Inputs:
/// - `var`: Environment variable to check (e.g., `XDG_STATE_HOME`).
/// - `home_default`: Fallback path segments relative to `$HOME` if `var` is unset/empty.
///
/// Output: Resolved base directory path.
fn xdg_base_dir(var: &str, home_default: &[&str]) -> PathBuf {
    if let Ok(p) = env::var(var)
        && !p.trim().is_empty()
    {
        return PathBuf::from(p);
    }
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let mut base = PathBuf::from(home);
    for seg in home_default {
        base = base.join(seg);
    }
    base
}

/// Directory for log files: `$XDG_STATE_HOME/decman/logs`.
#[must_use]
pub fn logs_dir() -> PathBuf {
    xdg_base_dir("XDG_STATE_HOME", &[".local", "state"])
        .join(APP_DIR)
        .join("logs")
}
