//! Settings and desired-state loading.
//!
//! `settings.conf` holds `key = value` tunables; `packages.toml` declares
//! what should be installed. Both live in the directory found by
//! [`paths::resolve_config_dir`].

pub mod desired;
pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::util::config::{parse_bool, parse_key_value, parse_list, skip_comment_or_empty};

/// Settings file name inside the configuration directory.
pub const SETTINGS_FILE: &str = "settings.conf";
/// Desired-state file name inside the configuration directory.
pub const PACKAGES_FILE: &str = "packages.toml";

/// Runtime tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Scratch directory for recipes and the build root.
    pub build_dir: PathBuf,
    /// Artifact cache directory.
    pub cache_dir: PathBuf,
    /// Persistent store file.
    pub store_path: PathBuf,
    /// Unprivileged account used for builds.
    pub makepkg_user: String,
    /// AUR RPC request timeout.
    pub aur_rpc_timeout: Duration,
    /// Artifacts retained per package name.
    pub cache_keep: usize,
    /// Machine architecture for `.SRCINFO` arch keys.
    pub arch: String,
    /// Packages installed when a build root is created.
    pub chroot_base_packages: Vec<String>,
    /// Log pacman output lines matching `highlight_keywords`.
    pub print_highlights: bool,
    /// Keywords that mark pacman output worth surfacing.
    pub highlight_keywords: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("/tmp/decman/build"),
            cache_dir: PathBuf::from("/var/cache/decman"),
            store_path: PathBuf::from("/var/lib/decman/store.json"),
            makepkg_user: "nobody".to_string(),
            aur_rpc_timeout: Duration::from_secs(30),
            cache_keep: 3,
            arch: "x86_64".to_string(),
            chroot_base_packages: vec!["base-devel".to_string(), "git".to_string()],
            print_highlights: true,
            highlight_keywords: vec!["pacsave".to_string(), "pacnew".to_string()],
        }
    }
}

/// What: Apply `settings.conf` content on top of `settings`.
///
/// Inputs:
/// - `content`: File content.
/// - `settings`: Settings to update in place.
///
/// Details:
/// - Unknown keys and unparsable values are logged and skipped.
pub fn parse_settings(content: &str, settings: &mut Settings) {
    for line in content.lines() {
        if skip_comment_or_empty(line) {
            continue;
        }
        let Some((key, val)) = parse_key_value(line) else {
            continue;
        };
        let applied = match key.as_str() {
            "build_dir" => {
                settings.build_dir = PathBuf::from(&val);
                true
            }
            "cache_dir" => {
                settings.cache_dir = PathBuf::from(&val);
                true
            }
            "store_path" | "store" => {
                settings.store_path = PathBuf::from(&val);
                true
            }
            "makepkg_user" | "build_user" => {
                settings.makepkg_user.clone_from(&val);
                !val.is_empty()
            }
            "aur_rpc_timeout" | "aur_timeout" => val.parse::<u64>().is_ok_and(|secs| {
                settings.aur_rpc_timeout = Duration::from_secs(secs);
                true
            }),
            "cache_keep" | "keep_versions" => val.parse::<usize>().is_ok_and(|n| {
                settings.cache_keep = n.max(1);
                true
            }),
            "arch" => {
                settings.arch.clone_from(&val);
                true
            }
            "chroot_base_packages" => {
                settings.chroot_base_packages = parse_list(&val);
                true
            }
            "print_highlights" => parse_bool(&val).is_some_and(|b| {
                settings.print_highlights = b;
                true
            }),
            "highlight_keywords" => {
                settings.highlight_keywords = parse_list(&val);
                true
            }
            _ => {
                tracing::warn!(key = %key, "[Config] unknown setting ignored");
                continue;
            }
        };
        if !applied {
            tracing::warn!(key = %key, value = %val, "[Config] invalid value ignored");
        }
    }
}

/// What: Load settings from `dir/settings.conf`.
///
/// Output:
/// - Defaults when the file does not exist.
///
/// # Errors
/// - `ConfigError::Io` when the file exists but cannot be read.
pub fn load_settings(dir: &Path) -> Result<Settings, ConfigError> {
    let path = dir.join(SETTINGS_FILE);
    let mut settings = Settings::default();
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            parse_settings(&content, &mut settings);
            tracing::debug!(path = %path.display(), "[Config] loaded settings");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "[Config] no settings file; using defaults");
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    }
    Ok(settings)
}
