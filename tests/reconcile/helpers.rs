//! Shared fixtures for reconciliation scenarios.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use decman::command::CommandOutput;
use decman::config::Settings;
use decman::modules::DesiredState;
use decman::plugin::{ApplyOptions, ApplyReport, PackagePlugin, Plugin};
use decman::store::Store;
use decman::test_utils::{FakeAur, ScriptedRunner, current_user};
use tempfile::TempDir;

/// Installed package state answered by the scripted pacman queries.
#[derive(Default)]
pub struct SystemState {
    pub explicit_native: Vec<&'static str>,
    pub explicit_foreign: Vec<(&'static str, &'static str)>,
    pub dependency_native: Vec<&'static str>,
    pub dependency_foreign: Vec<(&'static str, &'static str)>,
    pub orphan_native: Vec<&'static str>,
    pub orphan_foreign: Vec<&'static str>,
    /// `(package, space separated requirers)` for dependency-installed packages.
    pub required_by: Vec<(&'static str, &'static str)>,
    pub sync: Vec<&'static str>,
}

/// Requirer reported for dependency packages that are neither orphans nor listed in `required_by`.
pub const HOST_REQUIRER: &str = "system";

fn lines(names: &[&str]) -> String {
    names.iter().map(|n| format!("{n}\n")).collect()
}

fn versioned(pkgs: &[(&str, &str)]) -> String {
    pkgs.iter().map(|(n, v)| format!("{n} {v}\n")).collect()
}

/// What: Runner answering the installed-state queries for `state`.
///
/// Details:
/// - `pacman -Qi` answers one record per name: orphans are required by
///   nothing, other dependency packages by their `required_by` entry or
///   [`HOST_REQUIRER`], and everything else by nothing.
/// - `git clone` creates the destination with a `PKGBUILD`.
/// - Everything else succeeds with empty output unless a test adds rules.
pub fn scripted_system(state: &SystemState) -> ScriptedRunner {
    let dep_names: Vec<&str> = state.dependency_foreign.iter().map(|(n, _)| *n).collect();
    let all_foreign: Vec<(&str, &str)> = state
        .explicit_foreign
        .iter()
        .chain(&state.dependency_foreign)
        .copied()
        .collect();
    let mut requirers: BTreeMap<String, String> = state
        .dependency_native
        .iter()
        .chain(&dep_names)
        .map(|n| ((*n).to_string(), HOST_REQUIRER.to_string()))
        .collect();
    for orphan in state.orphan_native.iter().chain(&state.orphan_foreign) {
        requirers.insert((*orphan).to_string(), "None".to_string());
    }
    for (name, by) in &state.required_by {
        requirers.insert((*name).to_string(), (*by).to_string());
    }
    ScriptedRunner::new()
        .on_ok("pacman -Qeqn", &lines(&state.explicit_native))
        .on_ok("pacman -Qem", &versioned(&state.explicit_foreign))
        .on("pacman -Qi", move |argv, _| {
            let records: Vec<String> = argv
                .iter()
                .skip(2)
                .map(|name| {
                    let by = requirers.get(name).map_or("None", String::as_str);
                    format!("Name            : {name}\nRequired By     : {by}\n")
                })
                .collect();
            CommandOutput::ok(&records.join("\n"))
        })
        .on_ok("pacman -Qdqn", &lines(&state.dependency_native))
        .on_ok("pacman -Qdqm", &lines(&dep_names))
        .on_ok("pacman -Qm", &versioned(&all_foreign))
        .on_ok("pacman -Slq", &lines(&state.sync))
        .on("git clone", |argv, _| {
            let dest = PathBuf::from(argv.last().cloned().unwrap_or_default());
            std::fs::create_dir_all(&dest).expect("mkdir");
            std::fs::write(dest.join("PKGBUILD"), "pkgname=scripted").expect("write");
            CommandOutput::ok("")
        })
}

/// What: Make `makechrootpkg` produce package files for the recipe it runs in.
///
/// Inputs:
/// - `outputs`: Package base to `(name, version)` outputs.
/// - `failing`: Bases whose build exits non-zero.
pub fn with_builder(
    runner: ScriptedRunner,
    outputs: &[(&str, &str, &str)],
    failing: &[&str],
) -> ScriptedRunner {
    let mut by_base: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for (base, name, version) in outputs {
        by_base
            .entry((*base).to_string())
            .or_default()
            .push(((*name).to_string(), (*version).to_string()));
    }
    let by_base = Arc::new(by_base);
    let failing: Arc<BTreeSet<String>> = Arc::new(failing.iter().map(ToString::to_string).collect());
    runner.on("makechrootpkg", move |_, opts| {
        let Some(dir) = opts.cwd.clone() else {
            return CommandOutput::failed(2, "no working directory");
        };
        let base = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if failing.contains(&base) {
            return CommandOutput::failed(1, "==> ERROR: A failure occurred in build().");
        }
        for (name, version) in by_base.get(&base).into_iter().flatten() {
            std::fs::write(dir.join(format!("{name}-{version}-x86_64.pkg.tar.zst")), "pkg")
                .expect("write artifact");
        }
        CommandOutput::ok("==> Finished making")
    })
}

/// Temporary directories plus settings pointing into them.
pub struct Fixture {
    pub dir: TempDir,
    pub settings: Settings,
}

/// Settings rooted in a fresh temporary directory.
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        build_dir: dir.path().join("build"),
        cache_dir: dir.path().join("cache"),
        store_path: dir.path().join("store.json"),
        makepkg_user: current_user(),
        print_highlights: false,
        ..Settings::default()
    };
    Fixture { dir, settings }
}

/// Desired state from plain name lists.
pub fn desired(native: &[&str], foreign: &[&str]) -> DesiredState {
    DesiredState {
        native_wanted: native.iter().map(ToString::to_string).collect(),
        foreign_wanted: foreign.iter().map(ToString::to_string).collect(),
        ..DesiredState::default()
    }
}

/// What: Run the package plugin once.
///
/// Output:
/// - The report and the store the run wrote into.
pub fn apply(
    fixture: &Fixture,
    desired: DesiredState,
    runner: &ScriptedRunner,
    aur: FakeAur,
    opts: ApplyOptions,
) -> (ApplyReport, Store) {
    let mut store = Store::in_memory();
    let report = apply_in(fixture, desired, runner, aur, opts, &mut store);
    (report, store)
}

/// Run the package plugin once against an existing store.
pub fn apply_in(
    fixture: &Fixture,
    desired: DesiredState,
    runner: &ScriptedRunner,
    aur: FakeAur,
    opts: ApplyOptions,
    store: &mut Store,
) -> ApplyReport {
    let mut plugin = PackagePlugin::new(
        fixture.settings.clone(),
        desired,
        Box::new(runner.clone()),
        Box::new(aur),
    );
    plugin.apply(store, opts)
}

/// Commands that change package or build state.
pub fn mutating_calls(runner: &ScriptedRunner) -> Vec<String> {
    const READ_ONLY: &[&str] = &["pacman -Q", "pacman -Slq", "pacman -Sddp"];
    runner
        .calls()
        .into_iter()
        .map(|c| c.command)
        .filter(|c| !READ_ONLY.iter().any(|p| c.starts_with(p)))
        .collect()
}
