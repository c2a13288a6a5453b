//! Dry runs compute everything and change nothing.

use decman::build::BuildDecision;
use decman::plugin::ApplyOptions;
use decman::test_utils::{FakeAur, aur_pkg};

use super::helpers::{SystemState, apply, desired, fixture, mutating_calls, scripted_system, with_builder};

fn state() -> SystemState {
    SystemState {
        explicit_native: vec!["base", "nano"],
        explicit_foreign: vec![("pkgA", "1.0-1")],
        orphan_native: vec!["libold"],
        dependency_native: vec!["libold"],
        ..SystemState::default()
    }
}

#[test]
/// What: A dry run yields the same plan as a real run without mutating commands.
///
/// Inputs:
/// - Identical system, desired state and AUR for a real and a dry run.
///
/// Output:
/// - Equal plans; the dry run issues only read-only queries and reports `pkgA`
///   as rebuilt from source.
fn dry_run_matches_real_plan_without_mutation() {
    let aur = || FakeAur::new().with(aur_pkg("pkgA", "1.1-1", &[]));
    let wanted = || desired(&["base", "vim"], &["pkgA"]);

    let real_fx = fixture();
    let real_runner = with_builder(scripted_system(&state()), &[("pkgA", "pkgA", "1.1-1")], &[]);
    let (real, _) = apply(&real_fx, wanted(), &real_runner, aur(), ApplyOptions::default());

    let dry_fx = fixture();
    let dry_runner = with_builder(scripted_system(&state()), &[("pkgA", "pkgA", "1.1-1")], &[]);
    let opts = ApplyOptions {
        dry_run: true,
        ..ApplyOptions::default()
    };
    let (dry, store) = apply(&dry_fx, wanted(), &dry_runner, aur(), opts);

    assert!(dry.success, "{:?}", dry.failures);
    assert_eq!(dry.plan, real.plan);
    assert_eq!(dry.upgrades, real.upgrades);
    assert_eq!(dry.builds.get("pkgA"), Some(&BuildDecision::Rebuild));
    assert!(mutating_calls(&dry_runner).is_empty(), "{:?}", mutating_calls(&dry_runner));
    assert!(!mutating_calls(&real_runner).is_empty());
    assert!(!dry_fx.settings.cache_dir.exists());
    assert!(!dry_fx.settings.build_dir.exists());
    assert!(store.get::<serde_json::Value>(decman::store::DEVEL_REVISIONS).is_none());
    assert!(dry.summary_lines().iter().any(|l| l == "pkgA: build from source"));
}
