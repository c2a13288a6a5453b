//! Foreign package metadata resolution.
//!
//! [`ForeignMetadataResolver`] turns foreign package names into
//! [`ForeignPackageDescriptor`]s, preferring custom recipes over the AUR, and
//! walks their dependency closure, classifying each dependency as native (a
//! sync repository satisfies it) or foreign (it must be built).

pub mod aur;
pub mod custom;
pub mod descriptor;
pub mod srcinfo;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::command::CommandRunner;
use crate::error::ResolveError;
use crate::index::query::{NativeIndex, strip_dependency};
use aur::{AurLookup, MAX_INFO_BATCH};
use custom::{CustomPackage, resolve_custom};
pub use descriptor::ForeignPackageDescriptor;

/// A foreign package with its dependencies classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Package metadata.
    pub desc: ForeignPackageDescriptor,
    /// Runtime dependencies satisfied by sync repositories, as declared.
    pub native_runtime: BTreeSet<String>,
    /// Build and check dependencies satisfied by sync repositories, as declared.
    pub native_make: BTreeSet<String>,
    /// Names of foreign packages needed at runtime.
    pub foreign_runtime: BTreeSet<String>,
    /// Names of foreign packages needed only to build or check.
    pub foreign_make: BTreeSet<String>,
}

impl ResolvedPackage {
    fn new(desc: ForeignPackageDescriptor) -> Self {
        Self {
            desc,
            native_runtime: BTreeSet::new(),
            native_make: BTreeSet::new(),
            foreign_runtime: BTreeSet::new(),
            foreign_make: BTreeSet::new(),
        }
    }

    /// Every foreign package this one needs, at runtime or build time.
    pub fn foreign_deps(&self) -> impl Iterator<Item = &String> {
        self.foreign_runtime.iter().chain(self.foreign_make.iter())
    }
}

/// Outcome of a dependency closure walk.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Resolved packages by real name.
    pub packages: BTreeMap<String, ResolvedPackage>,
    /// Names that could not be resolved, including packages whose foreign
    /// dependencies failed.
    pub failures: BTreeMap<String, ResolveError>,
    /// Requested names satisfied by a differently named provider.
    pub redirects: BTreeMap<String, String>,
}

impl Resolution {
    /// Real package name for a requested name.
    #[must_use]
    pub fn real_name<'a>(&'a self, requested: &'a str) -> &'a str {
        self.redirects.get(requested).map_or(requested, String::as_str)
    }
}

/// Resolves and memoizes foreign package metadata for one run.
pub struct ForeignMetadataResolver<'a> {
    runner: &'a dyn CommandRunner,
    aur: &'a dyn AurLookup,
    user: String,
    arch: String,
    custom: BTreeMap<String, CustomPackage>,
    descriptors: BTreeMap<String, ForeignPackageDescriptor>,
    failed: BTreeMap<String, ResolveError>,
    missing: BTreeSet<String>,
    selected_providers: BTreeMap<String, String>,
}

impl<'a> ForeignMetadataResolver<'a> {
    /// What: Create a resolver.
    ///
    /// Inputs:
    /// - `runner`: Runs git and makepkg for custom recipes.
    /// - `aur`: AUR metadata source.
    /// - `user`: Unprivileged account for recipe inspection.
    /// - `arch`: Machine architecture.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, aur: &'a dyn AurLookup, user: &str, arch: &str) -> Self {
        Self {
            runner,
            aur,
            user: user.to_string(),
            arch: arch.to_string(),
            custom: BTreeMap::new(),
            descriptors: BTreeMap::new(),
            failed: BTreeMap::new(),
            missing: BTreeSet::new(),
            selected_providers: BTreeMap::new(),
        }
    }

    /// What: Register custom recipes.
    ///
    /// Details:
    /// - Custom recipes take precedence over AUR packages of the same name.
    /// - Recipes are inspected lazily on first resolution.
    pub fn add_custom<I: IntoIterator<Item = CustomPackage>>(&mut self, pkgs: I) {
        for pkg in pkgs {
            self.custom.insert(pkg.name.clone(), pkg);
        }
    }

    /// What: Fetch AUR metadata for many names in batched requests.
    ///
    /// Inputs:
    /// - `names`: Names to look up; custom and already known names are skipped.
    ///
    /// Details:
    /// - A failing batch is logged and left for per-name resolution, so one bad
    ///   name only fails itself.
    pub fn prefetch<'n, I: IntoIterator<Item = &'n String>>(&mut self, names: I) {
        let pending: Vec<String> = names
            .into_iter()
            .filter(|n| {
                !self.descriptors.contains_key(*n)
                    && !self.custom.contains_key(*n)
                    && !self.failed.contains_key(*n)
                    && !self.missing.contains(*n)
            })
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for chunk in pending.chunks(MAX_INFO_BATCH) {
            match self.aur.info(chunk) {
                Ok(found) => {
                    for desc in found {
                        self.insert_aur(desc);
                    }
                    for name in chunk {
                        if !self.descriptors.contains_key(name) {
                            self.missing.insert(name.clone());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(count = chunk.len(), error = %e, "batched AUR lookup failed; retrying per package");
                }
            }
        }
    }

    fn insert_aur(&mut self, desc: ForeignPackageDescriptor) {
        if self.custom.contains_key(&desc.name) {
            return;
        }
        self.descriptors.entry(desc.name.clone()).or_insert(desc);
    }

    /// What: Resolve metadata for a real package name.
    ///
    /// # Errors
    /// - `ResolveError::NotFound` when neither a custom recipe nor the AUR has it.
    /// - Any RPC or recipe error; failures are memoized for the run.
    pub fn resolve(&mut self, name: &str) -> Result<ForeignPackageDescriptor, ResolveError> {
        if let Some(d) = self.descriptors.get(name) {
            return Ok(d.clone());
        }
        if let Some(e) = self.failed.get(name) {
            return Err(e.clone());
        }

        let outcome = if let Some(pkg) = self.custom.get(name).cloned() {
            resolve_custom(self.runner, &pkg, &self.user, &self.arch).map(|descs| {
                for d in descs {
                    self.descriptors.insert(d.name.clone(), d);
                }
            })
        } else if self.missing.contains(name) {
            Ok(())
        } else {
            self.aur.info(&[name.to_string()]).map(|descs| {
                for d in descs {
                    self.insert_aur(d);
                }
            })
        };

        if let Some(d) = self.descriptors.get(name) {
            return Ok(d.clone());
        }
        let err = outcome
            .err()
            .unwrap_or_else(|| ResolveError::NotFound(name.to_string()));
        tracing::warn!(package = %name, error = %err, "foreign package resolution failed");
        self.failed.insert(name.to_string(), err.clone());
        Err(err)
    }

    /// What: Find the foreign package that satisfies `dep`.
    ///
    /// Inputs:
    /// - `dep`: Package name or virtual name, possibly version-constrained.
    ///
    /// Output:
    /// - `Ok(None)` when nothing provides it.
    ///
    /// # Errors
    /// - RPC or recipe errors other than "not found".
    ///
    /// Details:
    /// - Tries the exact name, then providers among already known packages,
    ///   then an AUR provides search. Several candidates resolve to the first
    ///   by name, with a warning.
    pub fn find_provider(&mut self, dep: &str) -> Result<Option<ForeignPackageDescriptor>, ResolveError> {
        let bare = strip_dependency(dep).to_string();
        if let Some(chosen) = self.selected_providers.get(&bare).cloned() {
            return self.resolve(&chosen).map(Some);
        }

        match self.resolve(&bare) {
            Ok(d) => {
                self.warn_provide_collision(&bare, "foreign package");
                return Ok(Some(d));
            }
            Err(ResolveError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let known: Vec<String> = self
            .descriptors
            .values()
            .filter(|d| d.satisfies(dep))
            .map(|d| d.name.clone())
            .collect();
        let candidates = if known.is_empty() {
            let mut found = self.aur.search_provides(&bare)?;
            found.sort();
            found.dedup();
            found
        } else {
            known
        };

        for candidate in &candidates {
            let desc = match self.resolve(candidate) {
                Ok(d) => d,
                Err(ResolveError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !desc.satisfies(dep) {
                continue;
            }
            if candidates.len() > 1 {
                tracing::warn!(
                    dependency = %dep,
                    chosen = %desc.name,
                    candidates = ?candidates,
                    "multiple foreign providers; picking the first"
                );
            }
            self.selected_providers.insert(bare, desc.name.clone());
            return Ok(Some(desc));
        }
        Ok(None)
    }

    fn warn_provide_collision(&self, real: &str, what: &str) {
        let shadowing: Vec<&str> = self
            .descriptors
            .values()
            .filter(|d| d.name != real && d.provides.iter().any(|p| strip_dependency(p) == real))
            .map(|d| d.name.as_str())
            .collect();
        if !shadowing.is_empty() {
            tracing::warn!(
                name = %real,
                providers = ?shadowing,
                "provided name collides with a real {what}; using the real package"
            );
        }
    }

    /// What: Resolve `wanted` and every foreign package they need.
    ///
    /// Inputs:
    /// - `wanted`: Foreign names (real or virtual) to resolve.
    /// - `native`: Decides which dependencies the sync repositories satisfy.
    ///
    /// Output:
    /// - Resolved packages keyed by real name; failures per requested name.
    ///
    /// Details:
    /// - A package whose foreign dependency fails is itself recorded as failed.
    pub fn resolve_closure(&mut self, wanted: &BTreeSet<String>, native: &dyn NativeIndex) -> Resolution {
        let mut res = Resolution::default();
        self.prefetch(wanted);

        let mut queue: VecDeque<String> = wanted.iter().cloned().collect();
        while let Some(name) = queue.pop_front() {
            if res.packages.contains_key(&name) || res.failures.contains_key(&name) {
                continue;
            }
            let desc = match self.find_provider(&name) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    res.failures.insert(name.clone(), ResolveError::NotFound(name));
                    continue;
                }
                Err(e) => {
                    res.failures.insert(name, e);
                    continue;
                }
            };
            if desc.name != name {
                tracing::info!(requested = %name, provider = %desc.name, "using provider for virtual name");
                res.redirects.insert(name, desc.name.clone());
                if res.packages.contains_key(&desc.name) {
                    continue;
                }
            }

            match self.classify(desc, native, &mut queue) {
                Ok(pkg) => {
                    res.packages.insert(pkg.desc.name.clone(), pkg);
                }
                Err((real, e)) => {
                    res.failures.insert(real, e);
                }
            }
        }

        propagate_failures(&mut res);
        res
    }

    fn classify(
        &mut self,
        desc: ForeignPackageDescriptor,
        native: &dyn NativeIndex,
        queue: &mut VecDeque<String>,
    ) -> Result<ResolvedPackage, (String, ResolveError)> {
        let mut pkg = ResolvedPackage::new(desc.clone());

        let runtime: Vec<(String, bool)> = desc.runtime_deps.iter().map(|d| (d.clone(), true)).collect();
        let make: Vec<(String, bool)> = desc.make_deps().map(|d| (d.clone(), false)).collect();
        let mut foreign: Vec<(String, bool)> = Vec::new();
        for (dep, is_runtime) in runtime.into_iter().chain(make) {
            if native.is_native(&dep) {
                self.warn_provide_collision(strip_dependency(&dep), "repository package");
                if is_runtime {
                    pkg.native_runtime.insert(dep);
                } else {
                    pkg.native_make.insert(dep);
                }
            } else {
                foreign.push((dep, is_runtime));
            }
        }

        let bare: Vec<String> = foreign.iter().map(|(d, _)| strip_dependency(d).to_string()).collect();
        self.prefetch(&bare);

        for (dep, is_runtime) in foreign {
            if desc.satisfies(&dep) {
                continue;
            }
            let unsatisfiable = || ResolveError::Unsatisfiable {
                package: desc.name.clone(),
                dependency: dep.clone(),
            };
            let provider = match self.find_provider(&dep) {
                Ok(Some(p)) => p,
                Ok(None) => return Err((desc.name.clone(), unsatisfiable())),
                Err(e) => {
                    tracing::warn!(package = %desc.name, dependency = %dep, error = %e, "dependency lookup failed");
                    return Err((desc.name.clone(), unsatisfiable()));
                }
            };
            queue.push_back(provider.name.clone());
            if is_runtime {
                pkg.foreign_runtime.insert(provider.name);
            } else {
                pkg.foreign_make.insert(provider.name);
            }
        }
        Ok(pkg)
    }
}

fn propagate_failures(res: &mut Resolution) {
    loop {
        let doomed: Vec<(String, String)> = res
            .packages
            .values()
            .filter_map(|p| {
                p.foreign_deps()
                    .find(|d| res.failures.contains_key(*d) || !res.packages.contains_key(*d))
                    .map(|d| (p.desc.name.clone(), d.clone()))
            })
            .collect();
        if doomed.is_empty() {
            return;
        }
        for (name, dep) in doomed {
            res.packages.remove(&name);
            tracing::warn!(package = %name, dependency = %dep, "skipping package with failed dependency");
            res.failures.insert(
                name.clone(),
                ResolveError::Unsatisfiable {
                    package: name,
                    dependency: dep,
                },
            );
        }
    }
}
