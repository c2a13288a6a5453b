//! Removal, demotion, orphan and conflict handling through the package plugin.

use decman::plugin::{ApplyOptions, FailureKind};
use decman::test_utils::FakeAur;

use super::helpers::{SystemState, apply, desired, fixture, mutating_calls, scripted_system};

#[test]
/// What: An unwanted package still required by a wanted one is demoted, not removed.
///
/// Inputs:
/// - `explicit_native = {A, B}`, `native_wanted = {B}`, `A` required by `B`.
///
/// Output:
/// - `A` is marked as a dependency; no removal transaction runs.
fn required_package_is_demoted() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        explicit_native: vec!["A", "B"],
        ..SystemState::default()
    })
    .on_ok("pacman -Qi A", "Name            : A\nRequired By     : B\n");

    let (report, _) = apply(&fx, desired(&["B"], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    let plan = report.plan.expect("plan");
    assert!(plan.to_demote.contains("A"));
    assert!(!plan.to_remove.contains("A"));
    assert_eq!(runner.calls_matching("pacman -D --asdeps"), vec!["pacman -D --asdeps A"]);
    assert!(runner.calls_matching("pacman -R").is_empty());
}

#[test]
/// What: An unwanted package nothing needs is removed.
///
/// Inputs:
/// - `explicit_native = {A, B}`, `native_wanted = {B}`, `A` required by nothing.
///
/// Output:
/// - `pacman -R --noconfirm A`.
fn unrequired_package_is_removed() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        explicit_native: vec!["A", "B"],
        ..SystemState::default()
    })
    .on_ok("pacman -Qi A", "Name            : A\nRequired By     : None\n");

    let (report, _) = apply(&fx, desired(&["B"], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    assert_eq!(runner.calls_matching("pacman -R"), vec!["pacman -R --noconfirm A"]);
    assert!(runner.calls_matching("pacman -D").is_empty());
}

#[test]
/// What: A failing reverse dependency query never leads to removal.
fn failed_dependents_query_demotes() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        explicit_native: vec!["A"],
        ..SystemState::default()
    })
    .on_fail("pacman -Qi A", 1, "error: database is locked");

    let (report, _) = apply(&fx, desired(&[], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    let plan = report.plan.expect("plan");
    assert!(plan.to_demote.contains("A"));
    assert!(runner.calls_matching("pacman -R").is_empty());
}

#[test]
/// What: Orphans are removed whether or not they are wanted; wanted ones come back explicit.
///
/// Inputs:
/// - Orphans `C` (unwanted) and `D` (wanted), orphan `E` ignored.
///
/// Output:
/// - `C` and `D` removed, `D` reinstalled explicitly, `E` untouched, no promotion.
fn orphans_are_removed_and_wanted_ones_reinstalled() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        dependency_native: vec!["C", "D", "E"],
        orphan_native: vec!["C", "D", "E"],
        ..SystemState::default()
    });
    let mut wanted = desired(&["D"], &[]);
    wanted.ignored_native.insert("E".to_string());

    let (report, _) = apply(&fx, wanted, &runner, FakeAur::new(), ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    let plan = report.plan.expect("plan");
    assert!(plan.to_promote.is_empty());
    assert_eq!(runner.calls_matching("pacman -R"), vec!["pacman -R --noconfirm C D"]);
    assert_eq!(
        runner.calls_matching("pacman -S --needed --asexplicit"),
        vec!["pacman -S --needed --asexplicit --noconfirm D"]
    );

    let mutating = mutating_calls(&runner);
    let remove = mutating.iter().position(|c| c.starts_with("pacman -R"));
    let install = mutating.iter().position(|c| c.starts_with("pacman -S --needed"));
    assert!(remove < install);
}

#[test]
/// What: Wanted packages installed as dependencies are promoted, not reinstalled.
fn dependency_installed_wanted_package_is_promoted() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        dependency_native: vec!["zlib"],
        ..SystemState::default()
    });

    let (report, _) = apply(&fx, desired(&["zlib"], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    assert_eq!(runner.calls_matching("pacman -D --asexplicit"), vec!["pacman -D --asexplicit zlib"]);
    assert!(runner.calls_matching("pacman -S --needed").is_empty());
}

#[test]
/// What: A wanted dependency is marked explicit before the package requiring it is removed.
///
/// Inputs:
/// - `explicit_native = {foo}`, `git` installed as a dependency required only
///   by `foo`, `native_wanted = {git}`.
///
/// Output:
/// - `pacman -D --asexplicit git` runs before `pacman -R --noconfirm foo`, and
///   `git` is neither removed nor reinstalled.
fn promotion_precedes_removal() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        explicit_native: vec!["foo"],
        dependency_native: vec!["git"],
        required_by: vec![("git", "foo")],
        ..SystemState::default()
    });

    let (report, _) = apply(&fx, desired(&["git"], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    let plan = report.plan.expect("plan");
    assert!(plan.to_promote.contains("git"));
    assert!(plan.dependencies_to_remove.is_empty());

    let mutating = mutating_calls(&runner);
    let promote = mutating.iter().position(|c| c == "pacman -D --asexplicit git");
    let remove = mutating.iter().position(|c| c == "pacman -R --noconfirm foo");
    assert!(promote.is_some() && remove.is_some(), "{mutating:?}");
    assert!(promote < remove);
    assert!(runner.calls_matching("pacman -S --needed").is_empty());
}

#[test]
/// What: Dependencies freed by a removal go in the same transaction.
///
/// Inputs:
/// - Explicit `app` unwanted; `libfoo` required only by `app`, `glibc` also by wanted `bash`.
///
/// Output:
/// - `pacman -R --noconfirm app libfoo`; `glibc` stays.
fn removal_takes_freed_dependencies() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        explicit_native: vec!["app", "bash"],
        dependency_native: vec!["libfoo", "glibc"],
        required_by: vec![("libfoo", "app"), ("glibc", "app bash")],
        ..SystemState::default()
    });

    let (report, _) = apply(&fx, desired(&["bash"], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(report.success, "{:?}", report.failures);
    assert_eq!(runner.calls_matching("pacman -R"), vec!["pacman -R --noconfirm app libfoo"]);
    assert!(
        report
            .summary_lines()
            .iter()
            .any(|l| l == "remove unneeded dependencies: libfoo")
    );
}

#[test]
/// What: Whole orphan chains are removed, stopping at an ignored link.
///
/// Inputs:
/// - Orphan chain `top` requires `mid` requires `low`; `pacman -Qdtq` would only list `top`.
///
/// Output:
/// - Without ignores all three go in one `pacman -R`; with `mid` ignored only `top` goes.
fn orphan_chain_respects_ignored_link() {
    let state = || SystemState {
        dependency_native: vec!["top", "mid", "low"],
        orphan_native: vec!["top"],
        required_by: vec![("mid", "top"), ("low", "mid")],
        ..SystemState::default()
    };

    let fx = fixture();
    let runner = scripted_system(&state());
    let (report, _) = apply(&fx, desired(&[], &[]), &runner, FakeAur::new(), ApplyOptions::default());
    assert!(report.success, "{:?}", report.failures);
    assert_eq!(runner.calls_matching("pacman -R"), vec!["pacman -R --noconfirm low mid top"]);

    let fx = fixture();
    let runner = scripted_system(&state());
    let mut wanted = desired(&[], &[]);
    wanted.ignored_native.insert("mid".to_string());
    let (report, _) = apply(&fx, wanted, &runner, FakeAur::new(), ApplyOptions::default());
    assert!(report.success, "{:?}", report.failures);
    let plan = report.plan.expect("plan");
    assert_eq!(plan.orphans_to_remove.iter().collect::<Vec<_>>(), vec!["top"]);
    assert_eq!(runner.calls_matching("pacman -R"), vec!["pacman -R --noconfirm top"]);
}

#[test]
/// What: A name wanted from both origins is an input error and nothing is changed.
fn origin_conflict_is_reported() {
    let fx = fixture();
    let runner = scripted_system(&SystemState::default());

    let (report, _) = apply(&fx, desired(&["X"], &["X"]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(!report.success);
    assert!(report.plan.is_none());
    assert_eq!(report.failed_units(FailureKind::Plan), vec!["desired state"]);
    assert!(mutating_calls(&runner).is_empty());
}

#[test]
/// What: A failing remove transaction is reported and later steps still run.
fn failed_removal_does_not_block_install() {
    let fx = fixture();
    let runner = scripted_system(&SystemState {
        explicit_native: vec!["old"],
        ..SystemState::default()
    })
    .on_fail("pacman -R", 1, "error: failed to commit transaction");

    let (report, _) = apply(&fx, desired(&["new"], &[]), &runner, FakeAur::new(), ApplyOptions::default());

    assert!(!report.success);
    assert_eq!(report.failed_units(FailureKind::Install), vec!["remove"]);
    assert_eq!(
        runner.calls_matching("pacman -S --needed"),
        vec!["pacman -S --needed --asexplicit --noconfirm new"]
    );
}
