//! Chroot build pipeline for foreign packages.
//!
//! Each package base moves through [`BuildStage`]s:
//! `Idle → RootReady → DepsInstalled → Building → ArtifactsExtracted → Done`,
//! with `Failed` reachable from any stage. Bases build one at a time against
//! the single shared root; a failed base only takes down bases that need it.

pub mod fetch;
pub mod order;
pub mod root;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cache::{PackageCache, package_extension};
use crate::command::{CommandRunner, RunOptions, argv};
use crate::error::{BuildError, CacheError, ResolveError};
use crate::index::query::strip_dependency;
use crate::sources::{ForeignPackageDescriptor, Resolution, ResolvedPackage};
use crate::store::{DEVEL_REVISIONS, Store};
use fetch::fetch_recipe;
use order::{bases, build_order, root_foreign_deps};
use root::BuildRoot;

/// Lifecycle of one base build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BuildStage {
    /// Not started.
    Idle,
    /// The build root exists and is up to date.
    RootReady,
    /// Build dependencies are installed in the root.
    DepsInstalled,
    /// `makechrootpkg` is running.
    Building,
    /// Package files were found and cached.
    ArtifactsExtracted,
    /// Artifacts are ready to install.
    Done,
    /// The base could not be built.
    Failed,
}

/// Whether a base is rebuilt or served from the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BuildDecision {
    /// Every output is cached at the wanted version.
    Cache,
    /// The base is built from source.
    Rebuild,
}

/// Rebuild switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Rebuild VCS packages even when their revision did not change.
    pub force_devel: bool,
    /// Rebuild even when the wanted version is cached.
    pub force_cached: bool,
}

/// Result of building a set of targets.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// Installable file per package name.
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Failed bases.
    pub failed: BTreeMap<String, BuildError>,
    /// Bases that could not be ordered because of a dependency cycle.
    pub cycles: BTreeMap<String, ResolveError>,
    /// Non-fatal cache store or prune failures per package.
    pub cache_errors: BTreeMap<String, CacheError>,
    /// Decision taken per base.
    pub decisions: BTreeMap<String, BuildDecision>,
}

impl BuildOutcome {
    /// True when an installable file for `name` exists.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }
}

/// What: Decide whether `base` can be served from the cache.
///
/// Inputs:
/// - `cache`: Artifact cache.
/// - `outputs`: Resolved outputs of the base.
/// - `opts`: Rebuild switches.
///
/// Output:
/// - `Cache` when every output is cached at its resolved version and no
///   switch forces a rebuild; VCS bases with a changed revision are still
///   rebuilt by the pipeline after fetching.
#[must_use]
pub fn decide(cache: &PackageCache, outputs: &[&ForeignPackageDescriptor], opts: BuildOptions) -> BuildDecision {
    let devel = outputs.iter().any(|d| d.is_devel());
    let cached = !outputs.is_empty()
        && outputs
            .iter()
            .all(|d| cache.lookup(&d.name, &d.version).is_some());
    if cached && !opts.force_cached && !(devel && opts.force_devel) {
        BuildDecision::Cache
    } else {
        BuildDecision::Rebuild
    }
}

/// What: Find the file makepkg produced for `desc` in `dir`.
///
/// Output:
/// - The single file named `<name>-<version>-…` with a package extension.
///
/// # Errors
/// - `BuildError::Artifact` when no file or several files match.
pub fn find_artifact(dir: &Path, desc: &ForeignPackageDescriptor) -> Result<PathBuf, BuildError> {
    let prefix = desc.file_prefix();
    let entries = std::fs::read_dir(dir).map_err(|source| BuildError::Io {
        base: desc.base.clone(),
        source,
    })?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_prefix(&prefix)
                .is_some_and(|rest| rest.starts_with('-'))
                && package_extension(&name).is_some()
        })
        .map(|e| e.path())
        .collect();
    matches.sort();
    if matches.len() == 1 {
        Ok(matches.remove(0))
    } else {
        Err(BuildError::Artifact {
            name: desc.name.clone(),
            candidates: matches,
        })
    }
}

/// Builds foreign packages inside the shared build root.
pub struct ChrootBuildPipeline<'a> {
    runner: &'a dyn CommandRunner,
    cache: &'a mut PackageCache,
    store: &'a mut Store,
    root: BuildRoot,
    build_dir: PathBuf,
    user: String,
    opts: BuildOptions,
    stages: BTreeMap<String, BuildStage>,
    root_error: Option<String>,
}

impl<'a> ChrootBuildPipeline<'a> {
    /// What: Create a pipeline.
    ///
    /// Inputs:
    /// - `runner`: Command runner.
    /// - `cache`: Artifact cache receiving every built file.
    /// - `store`: Persistent store for VCS revisions.
    /// - `build_dir`: Scratch directory for recipes and the root.
    /// - `base_packages`: Packages every root contains.
    /// - `user`: Unprivileged build account.
    /// - `opts`: Rebuild switches.
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        cache: &'a mut PackageCache,
        store: &'a mut Store,
        build_dir: &Path,
        base_packages: &[String],
        user: &str,
        opts: BuildOptions,
    ) -> Self {
        Self {
            runner,
            cache,
            store,
            root: BuildRoot::new(build_dir, base_packages),
            build_dir: build_dir.to_path_buf(),
            user: user.to_string(),
            opts,
            stages: BTreeMap::new(),
            root_error: None,
        }
    }

    /// Stage reached by `base` in this run.
    #[must_use]
    pub fn stage(&self, base: &str) -> BuildStage {
        self.stages.get(base).copied().unwrap_or(BuildStage::Idle)
    }

    fn set_stage(&mut self, base: &str, stage: BuildStage) {
        tracing::debug!(base = %base, stage = ?stage, "build stage");
        self.stages.insert(base.to_string(), stage);
    }

    /// What: Make artifacts available for `targets` and every foreign package they need.
    ///
    /// Inputs:
    /// - `resolution`: Resolved packages, including foreign dependencies.
    /// - `targets`: Real package names to provide.
    ///
    /// Output:
    /// - Artifacts per package name, and per-base failures.
    ///
    /// Details:
    /// - Bases depending on a failed base are skipped with `DependencyFailed`.
    /// - Dependencies installed into the root are removed at the end; the
    ///   root marker is written only when no root operation failed.
    pub fn build(&mut self, resolution: &Resolution, targets: &BTreeSet<String>) -> BuildOutcome {
        let packages = &resolution.packages;
        let mut outcome = BuildOutcome::default();
        let plan = build_order(packages, targets);
        if let Some((a, b)) = &plan.cycle_edge {
            for base in &plan.cyclic {
                outcome
                    .cycles
                    .insert(base.clone(), ResolveError::DependencyCycle(a.clone(), b.clone()));
            }
        }

        let grouped = bases(packages);
        for base in &plan.order {
            let names = grouped.get(base).cloned().unwrap_or_default();
            if let Some(dep) = self.failed_dependency(packages, &names, &outcome) {
                tracing::warn!(base = %base, dependency = %dep, "skipping build; dependency failed");
                self.set_stage(base, BuildStage::Failed);
                outcome.failed.insert(
                    base.clone(),
                    BuildError::DependencyFailed {
                        base: base.clone(),
                        dependency: dep,
                    },
                );
                continue;
            }
            match self.build_base(base, &names, packages, &mut outcome) {
                Ok(decision) => {
                    outcome.decisions.insert(base.clone(), decision);
                    self.set_stage(base, BuildStage::Done);
                }
                Err(e) => {
                    tracing::error!(base = %base, error = %e, "build failed");
                    self.set_stage(base, BuildStage::Failed);
                    outcome.failed.insert(base.clone(), e);
                }
            }
        }

        self.finish();
        outcome
    }

    fn failed_dependency(
        &self,
        packages: &BTreeMap<String, ResolvedPackage>,
        names: &BTreeSet<String>,
        outcome: &BuildOutcome,
    ) -> Option<String> {
        names
            .iter()
            .filter_map(|n| packages.get(n))
            .flat_map(|p| p.foreign_deps())
            .filter_map(|d| packages.get(d))
            .map(|p| &p.desc.base)
            .find(|b| outcome.failed.contains_key(*b) || outcome.cycles.contains_key(*b))
            .cloned()
    }

    fn finish(&mut self) {
        if !self.root.is_ready() {
            return;
        }
        if let Err(e) = self.root.remove_installed_deps(self.runner) {
            tracing::warn!(error = %e, "could not remove build dependencies from the build root");
            return;
        }
        if self.root_error.is_none()
            && let Err(e) = self.root.save_marker()
        {
            tracing::warn!(error = %e, "could not write build root marker");
        }
    }

    fn ensure_root(&mut self) -> Result<(), BuildError> {
        if let Some(message) = &self.root_error {
            return Err(BuildError::Root {
                path: self.root.path().to_path_buf(),
                message: message.clone(),
            });
        }
        self.root.prepare(self.runner).inspect_err(|e| {
            self.root_error = Some(e.to_string());
        })
    }

    fn build_base(
        &mut self,
        base: &str,
        names: &BTreeSet<String>,
        packages: &BTreeMap<String, ResolvedPackage>,
        outcome: &mut BuildOutcome,
    ) -> Result<BuildDecision, BuildError> {
        self.set_stage(base, BuildStage::Idle);
        let outputs: Vec<&ResolvedPackage> = names.iter().filter_map(|n| packages.get(n)).collect();
        let descs: Vec<&ForeignPackageDescriptor> = outputs.iter().map(|p| &p.desc).collect();
        let Some(first) = descs.first() else {
            return Err(BuildError::Sources {
                base: base.to_string(),
                message: "no resolved outputs".to_string(),
            });
        };
        let devel = descs.iter().any(|d| d.is_devel());

        if decide(&*self.cache, &descs, self.opts) == BuildDecision::Cache && !devel {
            tracing::info!(base = %base, "using cached packages");
            return Ok(self.use_cached(&descs, outcome));
        }

        let recipe = fetch_recipe(self.runner, &first.source, base, &self.build_dir, &self.user)?;

        let mut revisions: BTreeMap<String, String> = self.store.get(DEVEL_REVISIONS).unwrap_or_default();
        if devel
            && decide(&*self.cache, &descs, self.opts) == BuildDecision::Cache
            && recipe.revision.is_some()
            && revisions.get(base) == recipe.revision.as_ref()
        {
            tracing::info!(base = %base, "revision unchanged; using cached packages");
            return Ok(self.use_cached(&descs, outcome));
        }

        self.ensure_root()?;
        self.set_stage(base, BuildStage::RootReady);

        let native: BTreeSet<String> = outputs
            .iter()
            .flat_map(|p| p.native_runtime.iter().chain(p.native_make.iter()))
            .map(|dep| {
                self.root
                    .resolve_real_name(self.runner, dep)
                    .unwrap_or_else(|| strip_dependency(dep).to_string())
            })
            .collect();
        self.root
            .install_deps(self.runner, &native)
            .map_err(|message| BuildError::Dependencies {
                base: base.to_string(),
                message,
            })?;

        let mut files: Vec<String> = Vec::new();
        for dep in root_foreign_deps(packages, base) {
            let Some(path) = outcome.artifacts.get(&dep) else {
                return Err(BuildError::DependencyFailed {
                    base: base.to_string(),
                    dependency: dep,
                });
            };
            files.push(path.display().to_string());
        }
        self.set_stage(base, BuildStage::DepsInstalled);

        self.set_stage(base, BuildStage::Building);
        let chroot_wd = self.root.chroot_wd().display().to_string();
        let mut cmd = argv(&["makechrootpkg", "-c", "-r", chroot_wd.as_str(), "-U", self.user.as_str()]);
        for f in files {
            cmd.push("-I".to_string());
            cmd.push(f);
        }
        tracing::info!(base = %base, "building");
        let out = self
            .runner
            .run(&cmd, &RunOptions::new().cwd(&recipe.dir).pty(true))
            .map_err(|e| BuildError::Build {
                base: base.to_string(),
                exit_code: None,
                output: e.to_string(),
            })?;
        if !out.success() {
            return Err(BuildError::Build {
                base: base.to_string(),
                exit_code: out.exit_code,
                output: out.stdout,
            });
        }

        for desc in &descs {
            let built = find_artifact(&recipe.dir, desc)?;
            let path = match self.cache.store(&desc.name, &desc.version, &built) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(package = %desc.name, error = %e, "could not cache artifact; installing from the build directory");
                    outcome.cache_errors.insert(desc.name.clone(), e);
                    built
                }
            };
            outcome.artifacts.insert(desc.name.clone(), path);
        }
        self.set_stage(base, BuildStage::ArtifactsExtracted);

        if devel && let Some(rev) = recipe.revision {
            revisions.insert(base.to_string(), rev);
            if let Err(e) = self.store.set(DEVEL_REVISIONS, &revisions) {
                tracing::warn!(base = %base, error = %e, "could not record built revision");
            }
        }
        Ok(BuildDecision::Rebuild)
    }

    fn use_cached(&self, descs: &[&ForeignPackageDescriptor], outcome: &mut BuildOutcome) -> BuildDecision {
        for d in descs {
            if let Some(path) = self.cache.lookup(&d.name, &d.version) {
                outcome.artifacts.insert(d.name.clone(), path);
            }
        }
        BuildDecision::Cache
    }
}
