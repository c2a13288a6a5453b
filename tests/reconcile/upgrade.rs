//! Foreign package upgrades and the artifact cache.

use std::collections::{BTreeMap, BTreeSet};

use decman::cache::PackageCache;
use decman::plugin::ApplyOptions;
use decman::store::{DEVEL_REVISIONS, Store};
use decman::test_utils::{FakeAur, aur_pkg};

use super::helpers::{SystemState, apply, apply_in, desired, fixture, scripted_system, with_builder};

#[test]
/// What: A newer AUR version of an installed wanted package is built and installed.
///
/// Inputs:
/// - `explicit_foreign = {pkgA: 1.0-1}`, AUR has `pkgA 1.1-1`, `1.0-1` already cached.
///
/// Output:
/// - `pkgA` is rebuilt, its new artifact installed with the install reason kept,
///   and the old cache entry is still on disk.
fn newer_foreign_version_is_built_and_installed() {
    let fx = fixture();
    let old = fx.dir.path().join("pkgA-1.0-1-x86_64.pkg.tar.zst");
    std::fs::write(&old, "old").expect("write");
    let old_cached = PackageCache::open(&fx.settings.cache_dir, fx.settings.cache_keep)
        .expect("cache")
        .store("pkgA", "1.0-1", &old)
        .expect("store");

    let runner = with_builder(
        scripted_system(&SystemState {
            explicit_foreign: vec![("pkgA", "1.0-1")],
            ..SystemState::default()
        }),
        &[("pkgA", "pkgA", "1.1-1")],
        &[],
    );
    let aur = FakeAur::new().with(aur_pkg("pkgA", "1.1-1", &[]));

    let (report, _) = apply(&fx, desired(&[], &["pkgA"]), &runner, aur, ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    assert!(report.upgrades.explicit.contains("pkgA"));
    assert_eq!(runner.calls_matching("makechrootpkg").len(), 1);

    let installs = runner.calls_matching("pacman -U");
    assert_eq!(installs.len(), 1);
    assert!(installs[0].starts_with("pacman -U --noconfirm "));
    assert!(installs[0].ends_with("pkgA-1.1-1.pkg.tar.zst"));
    assert!(!installs[0].contains("--asexplicit"));

    let cache = PackageCache::open(&fx.settings.cache_dir, fx.settings.cache_keep).expect("cache");
    assert!(cache.lookup("pkgA", "1.1-1").is_some());
    assert_eq!(cache.lookup("pkgA", "1.0-1"), Some(old_cached.clone()));
    assert!(old_cached.exists());
}

#[test]
/// What: A package cached at the wanted version is installed without building.
fn cached_version_skips_build() {
    let fx = fixture();
    let file = fx.dir.path().join("tool.pkg.tar.zst");
    std::fs::write(&file, "pkg").expect("write");
    PackageCache::open(&fx.settings.cache_dir, fx.settings.cache_keep)
        .expect("cache")
        .store("tool", "2.0-1", &file)
        .expect("store");

    let runner = with_builder(scripted_system(&SystemState::default()), &[], &[]);
    let aur = FakeAur::new().with(aur_pkg("tool", "2.0-1", &[]));

    let (report, _) = apply(&fx, desired(&[], &["tool"]), &runner, aur, ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    assert!(runner.calls_matching("makechrootpkg").is_empty());
    assert!(runner.calls_matching("mkarchroot").is_empty());
    let installs = runner.calls_matching("pacman -U");
    assert_eq!(installs.len(), 1);
    assert!(installs[0].starts_with("pacman -U --noconfirm --asexplicit "));
}

#[test]
/// What: `force` rebuilds even when the wanted version is cached.
fn force_rebuilds_cached_version() {
    let fx = fixture();
    let file = fx.dir.path().join("tool.pkg.tar.zst");
    std::fs::write(&file, "pkg").expect("write");
    PackageCache::open(&fx.settings.cache_dir, fx.settings.cache_keep)
        .expect("cache")
        .store("tool", "2.0-1", &file)
        .expect("store");

    let runner = with_builder(scripted_system(&SystemState::default()), &[("tool", "tool", "2.0-1")], &[]);
    let aur = FakeAur::new().with(aur_pkg("tool", "2.0-1", &[]));
    let opts = ApplyOptions {
        force: true,
        ..ApplyOptions::default()
    };

    let (report, _) = apply(&fx, desired(&[], &["tool"]), &runner, aur, opts);

    assert!(report.success, "{:?}", report.failures);
    assert_eq!(runner.calls_matching("makechrootpkg").len(), 1);
}

#[test]
/// What: Only the newest K versions survive in the cache.
///
/// Inputs:
/// - Versions `1`, `2`, `3`, `4` of one name stored with K=3.
///
/// Output:
/// - `{2, 3, 4}` remain; the file for `1` is gone.
fn cache_keeps_newest_versions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("x.pkg.tar.zst");
    std::fs::write(&src, "pkg").expect("write");
    let mut cache = PackageCache::open(dir.path().join("cache"), 3).expect("cache");

    let first = cache.store("foo", "1-1", &src).expect("store");
    for v in ["2-1", "3-1", "4-1"] {
        cache.store("foo", v, &src).expect("store");
    }

    let versions: BTreeSet<&str> = ["1-1", "2-1", "3-1", "4-1"]
        .into_iter()
        .filter(|v| cache.lookup("foo", v).is_some())
        .collect();
    assert_eq!(versions, ["2-1", "3-1", "4-1"].into_iter().collect());
    assert!(!first.exists());
    assert!(cache.lookup("foo", "1-1").is_none());
}

#[test]
/// What: A cached VCS package is rebuilt only when its upstream revision moved.
///
/// Inputs:
/// - `tool-git r1-1` cached and built from revision `abc`.
/// - Runs where `git rev-parse HEAD` reports `abc`, then `def`.
///
/// Output:
/// - `abc`: the cached artifact is installed without `makechrootpkg`.
/// - `def`: one build runs and the store records `def`.
fn devel_package_rebuilds_on_new_revision() {
    let run = |head: &str| {
        let fx = fixture();
        let file = fx.dir.path().join("tool-git.pkg.tar.zst");
        std::fs::write(&file, "pkg").expect("write");
        PackageCache::open(&fx.settings.cache_dir, fx.settings.cache_keep)
            .expect("cache")
            .store("tool-git", "r1-1", &file)
            .expect("store");
        let mut store = Store::in_memory();
        let built: BTreeMap<String, String> = [("tool-git".to_string(), "abc".to_string())].into();
        store.set(DEVEL_REVISIONS, &built).expect("set");

        let runner = with_builder(
            scripted_system(&SystemState::default()),
            &[("tool-git", "tool-git", "r1-1")],
            &[],
        )
        .on_ok("git rev-parse HEAD", &format!("{head}\n"));
        let aur = FakeAur::new().with(aur_pkg("tool-git", "r1-1", &[]));
        let report = apply_in(&fx, desired(&[], &["tool-git"]), &runner, aur, ApplyOptions::default(), &mut store);
        assert!(report.success, "{:?}", report.failures);
        (runner, store)
    };

    let (runner, store) = run("abc");
    assert!(runner.calls_matching("makechrootpkg").is_empty());
    assert_eq!(runner.calls_matching("pacman -U").len(), 1);
    let revisions: BTreeMap<String, String> = store.get(DEVEL_REVISIONS).expect("revisions");
    assert_eq!(revisions.get("tool-git").map(String::as_str), Some("abc"));

    let (runner, store) = run("def");
    assert_eq!(runner.calls_matching("makechrootpkg").len(), 1);
    let revisions: BTreeMap<String, String> = store.get(DEVEL_REVISIONS).expect("revisions");
    assert_eq!(revisions.get("tool-git").map(String::as_str), Some("def"));
}
