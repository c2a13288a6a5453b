//! `packages.toml` loader.
//!
//! ```toml
//! native = ["base", "vim"]
//! aur = ["yay"]
//! ignored_native = ["linux-custom"]
//!
//! [[custom]]
//! name = "dotfiles"
//! dir = "/srv/pkgbuilds/dotfiles"
//!
//! [modules.desktop]
//! native = ["sway"]
//! aur = ["wlogout"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::modules::{DesiredState, Module, StaticModule};
use crate::sources::custom::{CustomPackage, CustomSource};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PackagesFile {
    native: BTreeSet<String>,
    aur: BTreeSet<String>,
    ignored_native: BTreeSet<String>,
    ignored_foreign: BTreeSet<String>,
    custom: Vec<CustomEntry>,
    modules: BTreeMap<String, ModuleEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModuleEntry {
    native: BTreeSet<String>,
    aur: BTreeSet<String>,
    custom: Vec<CustomEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CustomEntry {
    name: String,
    git: Option<String>,
    dir: Option<PathBuf>,
}

impl TryFrom<CustomEntry> for CustomPackage {
    type Error = ConfigError;

    fn try_from(entry: CustomEntry) -> Result<Self, Self::Error> {
        let source = match (entry.git, entry.dir) {
            (Some(url), None) => CustomSource::Git(url),
            (None, Some(dir)) => CustomSource::Dir(dir),
            _ => return Err(ConfigError::CustomSource(entry.name)),
        };
        Ok(Self {
            name: entry.name,
            source,
        })
    }
}

fn customs(entries: Vec<CustomEntry>) -> Result<Vec<CustomPackage>, ConfigError> {
    entries.into_iter().map(CustomPackage::try_from).collect()
}

/// Declarations read from `packages.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageDeclarations {
    /// Top-level declarations.
    pub global: StaticModule,
    /// Per-module declarations, in name order.
    pub modules: Vec<StaticModule>,
    /// Native names to leave alone.
    pub ignored_native: BTreeSet<String>,
    /// Foreign names to leave alone.
    pub ignored_foreign: BTreeSet<String>,
}

impl PackageDeclarations {
    /// Union of global and module declarations.
    #[must_use]
    pub fn desired_state(&self) -> DesiredState {
        let modules: Vec<&dyn Module> = self.modules.iter().map(|m| m as &dyn Module).collect();
        DesiredState::assemble(
            &self.global,
            &modules,
            self.ignored_native.clone(),
            self.ignored_foreign.clone(),
        )
    }
}

/// What: Parse `packages.toml` content.
///
/// Inputs:
/// - `text`: File content.
/// - `path`: File path for error messages.
///
/// # Errors
/// - `ConfigError::Toml` on syntax or schema errors.
/// - `ConfigError::CustomSource` when a custom entry sets neither or both of `git` and `dir`.
pub fn parse_packages(text: &str, path: &Path) -> Result<PackageDeclarations, ConfigError> {
    let file: PackagesFile = toml::from_str(text).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;

    let modules = file
        .modules
        .into_iter()
        .map(|(name, entry)| {
            Ok(StaticModule {
                name,
                native: entry.native,
                aur: entry.aur,
                custom: customs(entry.custom)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(PackageDeclarations {
        global: StaticModule {
            name: "global".to_string(),
            native: file.native,
            aur: file.aur,
            custom: customs(file.custom)?,
        },
        modules,
        ignored_native: file.ignored_native,
        ignored_foreign: file.ignored_foreign,
    })
}

/// What: Read and parse a `packages.toml` file.
///
/// # Errors
/// - `ConfigError::Io` when the file cannot be read, otherwise as [`parse_packages`].
pub fn load_packages(path: &Path) -> Result<PackageDeclarations, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_packages(&text, path)
}
