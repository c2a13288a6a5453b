//! Package reconciliation through pacman and the chroot build pipeline.
//!
//! One run walks a fixed sequence of steps: mark wanted dependencies
//! explicit, remove, upgrade, install, then mark leftovers as dependencies. A failing pacman transaction aborts the rest of
//! its step only; later steps still run against whatever state it left.

use std::collections::{BTreeMap, BTreeSet};

use super::highlight::log_highlights;
use super::report::{ApplyReport, FailureKind};
use super::{ApplyOptions, Plugin, PluginContext};
use crate::build::order::{bases, build_order};
use crate::build::{BuildOptions, BuildOutcome, ChrootBuildPipeline, decide};
use crate::cache::PackageCache;
use crate::command::system::SystemRunner;
use crate::command::{CommandRunner, RunOptions, argv};
use crate::config::Settings;
use crate::error::{InstallError, ResolveError};
use crate::index::query::{SyncIndex, strip_dependency};
use crate::index::{InstalledSnapshot, InstalledStateInspector};
use crate::logic::plan::{ForeignUpgrades, ReconciliationPlan, foreign_upgrades, plan};
use crate::modules::{DesiredState, Module};
use crate::sources::aur::{AurClient, AurLookup};
use crate::sources::{ForeignMetadataResolver, Resolution};
use crate::store::{AUR_PACKAGES_FOR_MODULE, CUSTOM_PACKAGES_FOR_MODULE, PACKAGES_FOR_MODULE, Store};

/// Tools needed for native packages.
const NATIVE_TOOLS: &[&str] = &["pacman"];
/// Extra tools needed once foreign packages are declared.
const BUILD_TOOLS: &[&str] = &["git", "makepkg", "mkarchroot", "makechrootpkg", "arch-nspawn"];

/// Reconciles installed packages with the declared ones.
pub struct PackagePlugin {
    settings: Settings,
    desired: DesiredState,
    runner: Box<dyn CommandRunner>,
    aur: Box<dyn AurLookup>,
}

impl PackagePlugin {
    /// Registry name.
    pub const NAME: &'static str = "pacman";

    /// What: Create the plugin over explicit collaborators.
    ///
    /// Inputs:
    /// - `settings`: Loaded settings.
    /// - `desired`: Assembled desired state.
    /// - `runner`: Runs pacman, git and the devtools scripts.
    /// - `aur`: AUR metadata lookups.
    #[must_use]
    pub fn new(
        settings: Settings,
        desired: DesiredState,
        runner: Box<dyn CommandRunner>,
        aur: Box<dyn AurLookup>,
    ) -> Self {
        Self {
            settings,
            desired,
            runner,
            aur,
        }
    }

    /// What: Registry constructor backed by real processes and the AUR.
    ///
    /// # Errors
    /// - The HTTP client could not be created.
    pub fn from_context(ctx: &PluginContext) -> Result<Box<dyn Plugin>, String> {
        let aur = AurClient::new(ctx.settings.aur_rpc_timeout).map_err(|e| e.to_string())?;
        Ok(Box::new(Self::new(
            ctx.settings.clone(),
            ctx.desired.clone(),
            Box::new(SystemRunner::new(ctx.echo_output)),
            Box::new(aur),
        )))
    }

    fn build_options(opts: ApplyOptions) -> BuildOptions {
        BuildOptions {
            force_devel: opts.upgrade_devel,
            force_cached: opts.force,
        }
    }

    /// Run one pacman transaction; `args` precede the package list.
    fn pacman(&self, operation: &str, args: &[&str], targets: &[String]) -> Result<(), InstallError> {
        let mut cmd = argv(&["pacman"]);
        cmd.extend(args.iter().map(ToString::to_string));
        cmd.extend(targets.iter().cloned());
        tracing::info!(operation = %operation, count = targets.len(), "running pacman");
        let result = self
            .runner
            .run(&cmd, &RunOptions::new().pty(true))
            .and_then(|out| {
                if self.settings.print_highlights {
                    log_highlights(operation, &out.stdout, &self.settings.highlight_keywords);
                }
                out.check(&cmd)
            });
        result.map(|_| ()).map_err(|source| InstallError {
            operation: operation.to_string(),
            packages: targets.to_vec(),
            source,
        })
    }

    fn select_upgrades(
        &self,
        resolver: &mut ForeignMetadataResolver<'_>,
        snapshot: &InstalledSnapshot,
        plan: &ReconciliationPlan,
        opts: ApplyOptions,
        report: &mut ApplyReport,
    ) -> ForeignUpgrades {
        let removals = plan.removals();
        let installed: Vec<String> = snapshot
            .foreign_versions
            .keys()
            .filter(|n| !self.desired.ignored_foreign.contains(*n) && !removals.contains(*n))
            .cloned()
            .collect();
        resolver.prefetch(&installed);

        let mut available = BTreeMap::new();
        for name in &installed {
            match resolver.resolve(name) {
                Ok(desc) => {
                    available.insert(name.clone(), desc.version);
                }
                Err(ResolveError::NotFound(_)) => {
                    tracing::debug!(package = %name, "installed foreign package has no known source; not upgraded");
                }
                Err(e) => report.record(name.clone(), FailureKind::Resolution, e),
            }
        }
        foreign_upgrades(snapshot, &available, opts.upgrade_devel, &self.desired.ignored_foreign)
    }

    fn dry_run(&self, resolution: &Resolution, targets: &BTreeSet<String>, opts: ApplyOptions, report: &mut ApplyReport) {
        let cache = PackageCache::open_read_only(&self.settings.cache_dir, self.settings.cache_keep);
        let order = build_order(&resolution.packages, targets);
        let grouped = bases(&resolution.packages);
        for base in &order.order {
            let descs: Vec<_> = grouped
                .get(base)
                .into_iter()
                .flatten()
                .filter_map(|n| resolution.packages.get(n))
                .map(|p| &p.desc)
                .collect();
            report
                .builds
                .insert(base.clone(), decide(&cache, &descs, Self::build_options(opts)));
        }
        if let Some((a, b)) = &order.cycle_edge {
            for base in &order.cyclic {
                report.record(
                    base.clone(),
                    FailureKind::Resolution,
                    ResolveError::DependencyCycle(a.clone(), b.clone()),
                );
            }
        }
        tracing::info!("dry run; no changes made");
    }

    fn record_build_outcome(outcome: &BuildOutcome, report: &mut ApplyReport) {
        report.builds.extend(outcome.decisions.clone());
        for (base, e) in &outcome.cycles {
            report.record(base.clone(), FailureKind::Resolution, e);
        }
        for (base, e) in &outcome.failed {
            report.record(base.clone(), FailureKind::Build, e);
        }
        for (name, e) in &outcome.cache_errors {
            report.record(name.clone(), FailureKind::CacheIo, e);
        }
    }

    /// What: Install built foreign packages together with what they need at runtime.
    ///
    /// Inputs:
    /// - `operation`: Step label for logs and failures.
    /// - `names`: Real names to install.
    /// - `reason`: Extra flag for `names`, e.g. `--asexplicit`; `None` keeps the installed reason.
    ///
    /// # Errors
    /// - The first failing transaction; later transactions of the batch are skipped.
    ///
    /// Details:
    /// - Native runtime dependencies come from the sync repositories; missing
    ///   foreign runtime dependencies are installed from their artifacts,
    ///   both marked as dependencies.
    fn install_foreign(
        &self,
        operation: &str,
        names: &BTreeSet<String>,
        reason: Option<&str>,
        resolution: &Resolution,
        outcome: &BuildOutcome,
        snapshot: &InstalledSnapshot,
    ) -> Result<(), InstallError> {
        let names: BTreeSet<&String> = names.iter().filter(|n| outcome.is_available(n)).collect();
        if names.is_empty() {
            return Ok(());
        }

        let mut deps: BTreeSet<&String> = BTreeSet::new();
        let mut queue: Vec<&String> = names.iter().copied().collect();
        let mut native: BTreeSet<String> = BTreeSet::new();
        while let Some(name) = queue.pop() {
            let Some(pkg) = resolution.packages.get(name) else {
                continue;
            };
            native.extend(pkg.native_runtime.iter().map(|d| strip_dependency(d).to_string()));
            for dep in &pkg.foreign_runtime {
                if !names.contains(dep) && !snapshot.is_installed(dep) && deps.insert(dep) {
                    queue.push(dep);
                }
            }
        }

        if !native.is_empty() {
            let native: Vec<String> = native.into_iter().collect();
            self.pacman(
                &format!("{operation} (repository dependencies)"),
                &["-S", "--needed", "--asdeps", "--noconfirm"],
                &native,
            )?;
        }
        let files = |set: &BTreeSet<&String>| -> Vec<String> {
            set.iter()
                .filter_map(|n| outcome.artifacts.get(*n))
                .map(|p| p.display().to_string())
                .collect()
        };
        let dep_files = files(&deps);
        if !dep_files.is_empty() {
            self.pacman(
                &format!("{operation} (foreign dependencies)"),
                &["-U", "--asdeps", "--noconfirm"],
                &dep_files,
            )?;
        }
        let mut args = vec!["-U", "--noconfirm"];
        args.extend(reason);
        self.pacman(operation, &args, &files(&names))
    }

    fn mark(&self, operation: &str, flag: &str, names: &BTreeSet<String>) -> Result<(), InstallError> {
        if names.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = names.iter().cloned().collect();
        self.pacman(operation, &["-D", flag], &names)
    }

    #[allow(clippy::too_many_lines)]
    fn run(&self, store: &mut Store, opts: ApplyOptions) -> ApplyReport {
        let mut report = ApplyReport::new(opts.dry_run);
        let runner: &dyn CommandRunner = self.runner.as_ref();

        let inspector = InstalledStateInspector::new(runner);
        let snapshot = match inspector.snapshot() {
            Ok(s) => s,
            Err(e) => {
                report.record("installed state", FailureKind::Query, e);
                return report;
            }
        };
        let plan = match plan(&self.desired, &snapshot, |name| inspector.dependents(name)) {
            Ok(p) => p,
            Err(e) => {
                report.record("desired state", FailureKind::Plan, e);
                return report;
            }
        };
        tracing::info!(
            install = plan.to_install.len() + plan.to_install_foreign.len(),
            remove = plan.removals().len(),
            promote = plan.to_promote.len(),
            demote = plan.to_demote.len(),
            "computed reconciliation plan"
        );
        report.plan = Some(plan.clone());

        let sync = match SyncIndex::load(runner) {
            Ok(s) => s,
            Err(e) => {
                report.record("sync databases", FailureKind::Query, e);
                return report;
            }
        };
        let mut resolver = ForeignMetadataResolver::new(
            runner,
            self.aur.as_ref(),
            &self.settings.makepkg_user,
            &self.settings.arch,
        );
        resolver.add_custom(self.desired.custom.values().cloned());

        let upgrades = self.select_upgrades(&mut resolver, &snapshot, &plan, opts, &mut report);
        report.upgrades = upgrades.clone();

        let requested: BTreeSet<String> = plan.to_install_foreign.union(&upgrades.all()).cloned().collect();
        let resolution = if requested.is_empty() {
            Resolution::default()
        } else {
            resolver.resolve_closure(&requested, &sync)
        };
        for (name, e) in &resolution.failures {
            report.record(name.clone(), FailureKind::Resolution, e);
        }
        let real = |names: &BTreeSet<String>| -> BTreeSet<String> {
            names
                .iter()
                .map(|n| resolution.real_name(n).to_string())
                .filter(|n| resolution.packages.contains_key(n))
                .collect()
        };
        let targets = real(&requested);

        if opts.dry_run {
            self.dry_run(&resolution, &targets, opts, &mut report);
            return report;
        }

        // promoted packages must be explicit before their requirers go
        if let Err(e) = self.mark("mark explicit", "--asexplicit", &plan.to_promote) {
            report.record("install reasons", FailureKind::Install, e);
        }

        // remove
        let removals: Vec<String> = plan.removals().into_iter().collect();
        if !removals.is_empty()
            && let Err(e) = self.pacman("remove", &["-R", "--noconfirm"], &removals)
        {
            report.record("remove", FailureKind::Install, e);
        }

        // upgrade
        let synced = self.pacman("upgrade", &["-Syu", "--noconfirm"], &[]);
        if let Err(e) = &synced {
            report.record("upgrade", FailureKind::Install, e);
        }
        let outcome = if targets.is_empty() {
            BuildOutcome::default()
        } else {
            let mut cache = match PackageCache::open(&self.settings.cache_dir, self.settings.cache_keep) {
                Ok(c) => c,
                Err(e) => {
                    report.record("package cache", FailureKind::CacheIo, e);
                    PackageCache::open_read_only(&self.settings.cache_dir, self.settings.cache_keep)
                }
            };
            let mut pipeline = ChrootBuildPipeline::new(
                runner,
                &mut cache,
                store,
                &self.settings.build_dir,
                &self.settings.chroot_base_packages,
                &self.settings.makepkg_user,
                Self::build_options(opts),
            );
            pipeline.build(&resolution, &targets)
        };
        Self::record_build_outcome(&outcome, &mut report);
        if synced.is_ok()
            && let Err(e) = self.install_foreign(
                "upgrade foreign",
                &real(&upgrades.all()),
                None,
                &resolution,
                &outcome,
                &snapshot,
            )
        {
            report.record("upgrade foreign", FailureKind::Install, e);
        }

        // install
        let native: Vec<String> = plan.to_install.iter().cloned().collect();
        let native_installed = if native.is_empty() {
            Ok(())
        } else {
            self.pacman("install", &["-S", "--needed", "--asexplicit", "--noconfirm"], &native)
        };
        let installed = native_installed.and_then(|()| {
            self.install_foreign(
                "install foreign",
                &real(&plan.to_install_foreign),
                Some("--asexplicit"),
                &resolution,
                &outcome,
                &snapshot,
            )
        });
        if let Err(e) = installed {
            report.record("install", FailureKind::Install, e);
        }

        if let Err(e) = self.mark("mark as dependency", "--asdeps", &plan.to_demote) {
            report.record("install reasons", FailureKind::Install, e);
        }

        report
    }
}

/// What: Compare each module's package sets with the recorded ones and record the new sets.
///
/// Inputs:
/// - `store`: Persistent store holding the previous sets.
/// - `modules`: Current modules.
///
/// Output:
/// - Names of modules whose native, foreign or custom set changed. A module
///   seen for the first time counts as changed unless it contributes nothing.
pub fn record_module_sets(store: &mut Store, modules: &[&dyn Module]) -> BTreeSet<String> {
    let collect = |f: &dyn Fn(&dyn Module) -> BTreeSet<String>| -> BTreeMap<String, BTreeSet<String>> {
        modules.iter().map(|m| (m.name().to_string(), f(*m))).collect()
    };
    let sets = [
        (PACKAGES_FOR_MODULE, collect(&|m: &dyn Module| m.native_packages())),
        (AUR_PACKAGES_FOR_MODULE, collect(&|m: &dyn Module| m.foreign_packages())),
        (
            CUSTOM_PACKAGES_FOR_MODULE,
            collect(&|m: &dyn Module| m.custom_packages().into_iter().map(|p| p.name).collect()),
        ),
    ];

    let mut changed = BTreeSet::new();
    for (key, current) in sets {
        let mut recorded: BTreeMap<String, BTreeSet<String>> = store.get(key).unwrap_or_default();
        for (module, set) in current {
            let previous = recorded.get(&module).cloned().unwrap_or_default();
            if previous != set {
                tracing::debug!(module = %module, key = %key, "module package set changed");
                changed.insert(module.clone());
            }
            recorded.insert(module, set);
        }
        if let Err(e) = store.set(key, &recorded) {
            tracing::warn!(key = %key, error = %e, "[Store] could not record module package sets");
        }
    }
    changed
}

impl Plugin for PackagePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn available(&self) -> bool {
        let needs_build = !self.desired.foreign_wanted.is_empty();
        let missing: Vec<&str> = NATIVE_TOOLS
            .iter()
            .chain(BUILD_TOOLS.iter().filter(|_| needs_build))
            .copied()
            .filter(|tool| which::which(tool).is_err())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(tools = ?missing, "missing tools");
        }
        missing.is_empty()
    }

    fn process_modules(&mut self, store: &mut Store, modules: &[&dyn Module]) -> BTreeSet<String> {
        record_module_sets(store, modules)
    }

    fn apply(&mut self, store: &mut Store, opts: ApplyOptions) -> ApplyReport {
        let report = self.run(store, opts);
        tracing::info!(
            success = report.success,
            failures = report.failures.len(),
            dry_run = opts.dry_run,
            "package reconciliation finished"
        );
        report
    }
}
