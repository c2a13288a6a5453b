//! Plugins turn the declared configuration into system changes.
//!
//! Only the package plugin ships today; the registry keeps `--only` and the
//! run loop independent of which plugins exist.

pub mod highlight;
pub mod packages;
pub mod report;

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Settings;
use crate::modules::{DesiredState, Module};
use crate::store::Store;
pub use packages::PackagePlugin;
pub use report::{ApplyReport, FailureKind, FailureRecord};

/// Switches for one `apply` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Compute and report without changing the system.
    pub dry_run: bool,
    /// Rebuild VCS packages even when their version did not change.
    pub upgrade_devel: bool,
    /// Rebuild foreign packages even when the wanted version is cached.
    pub force: bool,
}

/// A unit of system configuration.
pub trait Plugin {
    /// Registry name, used by `--only`.
    fn name(&self) -> &str;

    /// Whether the tools this plugin drives are installed.
    fn available(&self) -> bool;

    /// What: Record what each module contributes and report which modules changed.
    ///
    /// Output:
    /// - Names of modules whose contribution differs from the previous run.
    fn process_modules(&mut self, store: &mut Store, modules: &[&dyn Module]) -> BTreeSet<String>;

    /// What: Bring the system in line with the declared state.
    ///
    /// Output:
    /// - A report; failures are collected there instead of returned.
    fn apply(&mut self, store: &mut Store, opts: ApplyOptions) -> ApplyReport;
}

/// Inputs shared by every plugin constructor.
#[derive(Clone, Debug)]
pub struct PluginContext {
    /// Loaded settings.
    pub settings: Settings,
    /// Assembled desired state.
    pub desired: DesiredState,
    /// Stream package manager and build output to the terminal.
    pub echo_output: bool,
}

/// Builds a plugin from the shared context.
pub type PluginConstructor = fn(&PluginContext) -> Result<Box<dyn Plugin>, String>;

/// Known plugins by name.
pub struct PluginRegistry {
    constructors: BTreeMap<String, PluginConstructor>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry.register(PackagePlugin::NAME, PackagePlugin::from_context);
        registry
    }
}

impl PluginRegistry {
    /// Registry with the built-in plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a plugin constructor.
    pub fn register(&mut self, name: &str, constructor: PluginConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// What: Construct the selected plugins.
    ///
    /// Inputs:
    /// - `ctx`: Shared context.
    /// - `only`: Names to construct; empty selects every plugin.
    ///
    /// Output:
    /// - Constructed plugins, skipping unavailable ones with a warning.
    ///
    /// # Errors
    /// - An unknown name in `only`, or a failing constructor.
    pub fn build(&self, ctx: &PluginContext, only: &[String]) -> Result<Vec<Box<dyn Plugin>>, String> {
        if let Some(unknown) = only.iter().find(|n| !self.constructors.contains_key(*n)) {
            return Err(format!("unknown plugin '{unknown}'"));
        }
        let mut out = Vec::new();
        for (name, ctor) in &self.constructors {
            if !only.is_empty() && !only.contains(name) {
                continue;
            }
            let plugin = ctor(ctx).map_err(|e| format!("plugin '{name}': {e}"))?;
            if plugin.available() {
                out.push(plugin);
            } else {
                tracing::warn!(plugin = %name, "required tools missing; plugin skipped");
            }
        }
        Ok(out)
    }
}
