//! Package set contributions and desired state assembly.

use std::collections::{BTreeMap, BTreeSet};

use crate::sources::custom::CustomPackage;

/// A configuration unit that contributes packages.
pub trait Module {
    /// Unique module name, used as the key of its change signal.
    fn name(&self) -> &str;

    /// Packages from sync repositories.
    fn native_packages(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Packages from the AUR.
    fn foreign_packages(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Packages built from user supplied recipes.
    fn custom_packages(&self) -> Vec<CustomPackage> {
        Vec::new()
    }
}

/// Module whose package sets are fixed at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticModule {
    /// Module name.
    pub name: String,
    /// Native packages.
    pub native: BTreeSet<String>,
    /// AUR packages.
    pub aur: BTreeSet<String>,
    /// Custom recipes.
    pub custom: Vec<CustomPackage>,
}

impl Module for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn native_packages(&self) -> BTreeSet<String> {
        self.native.clone()
    }

    fn foreign_packages(&self) -> BTreeSet<String> {
        self.aur.clone()
    }

    fn custom_packages(&self) -> Vec<CustomPackage> {
        self.custom.clone()
    }
}

/// Wanted and ignored package names for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Wanted sync repository packages.
    pub native_wanted: BTreeSet<String>,
    /// Wanted foreign packages: AUR names and custom package names.
    pub foreign_wanted: BTreeSet<String>,
    /// Native packages never installed, removed or re-marked.
    pub ignored_native: BTreeSet<String>,
    /// Foreign packages never built, removed or re-marked.
    pub ignored_foreign: BTreeSet<String>,
    /// Recipes for custom packages, by name.
    pub custom: BTreeMap<String, CustomPackage>,
}

impl DesiredState {
    /// What: Union a module's contribution into the desired state.
    ///
    /// Details:
    /// - Sets are merged by union.
    /// - A custom name declared twice with different recipes keeps the first
    ///   and logs a warning.
    pub fn add_module(&mut self, module: &dyn Module) {
        self.native_wanted.extend(module.native_packages());
        self.foreign_wanted.extend(module.foreign_packages());
        for pkg in module.custom_packages() {
            self.add_custom(module.name(), pkg);
        }
    }

    fn add_custom(&mut self, origin: &str, pkg: CustomPackage) {
        self.foreign_wanted.insert(pkg.name.clone());
        match self.custom.get(&pkg.name) {
            Some(existing) if *existing != pkg => {
                tracing::warn!(
                    package = %pkg.name,
                    module = %origin,
                    kept = ?existing.source,
                    ignored = ?pkg.source,
                    "custom package declared twice with different sources"
                );
            }
            Some(_) => {}
            None => {
                self.custom.insert(pkg.name.clone(), pkg);
            }
        }
    }

    /// What: Assemble the desired state from global declarations and modules.
    #[must_use]
    pub fn assemble(global: &dyn Module, modules: &[&dyn Module], ignored_native: BTreeSet<String>, ignored_foreign: BTreeSet<String>) -> Self {
        let mut out = Self {
            ignored_native,
            ignored_foreign,
            ..Self::default()
        };
        out.add_module(global);
        for m in modules {
            out.add_module(*m);
        }
        out
    }
}
