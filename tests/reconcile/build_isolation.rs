//! One failing base must not take down unrelated bases.

use decman::build::BuildDecision;
use decman::plugin::{ApplyOptions, FailureKind};
use decman::test_utils::{FakeAur, aur_pkg};

use super::helpers::{SystemState, apply, desired, fixture, scripted_system, with_builder};

#[test]
/// What: A failed build is reported while an unrelated base is still built and installed.
///
/// Inputs:
/// - Wanted foreign `X` and `Y`; the build of `X` exits non-zero.
///
/// Output:
/// - `Y` is installed explicitly, `X` is reported as a build failure and never installed.
fn failed_base_does_not_block_unrelated_base() {
    let fx = fixture();
    let runner = with_builder(
        scripted_system(&SystemState::default()),
        &[("X", "X", "1-1"), ("Y", "Y", "1-1")],
        &["X"],
    );
    let aur = FakeAur::new()
        .with(aur_pkg("X", "1-1", &[]))
        .with(aur_pkg("Y", "1-1", &[]));

    let (report, _) = apply(&fx, desired(&[], &["X", "Y"]), &runner, aur, ApplyOptions::default());

    assert!(!report.success);
    assert_eq!(report.failed_units(FailureKind::Build), vec!["X"]);
    assert_eq!(report.builds.get("Y"), Some(&BuildDecision::Rebuild));
    assert!(!report.builds.contains_key("X"));

    let installs = runner.calls_matching("pacman -U");
    assert_eq!(installs.len(), 1);
    assert!(installs[0].starts_with("pacman -U --noconfirm --asexplicit "));
    assert!(installs[0].ends_with("Y-1-1.pkg.tar.zst"));
    assert!(!installs[0].contains("X-1-1"));
    assert!(report.summary_lines().iter().any(|l| l.starts_with("X failed (build)")));
}

#[test]
/// What: Dependents of a failed base are skipped; its foreign dependency is installed as a dependency.
///
/// Inputs:
/// - `app` needs foreign `libfoo`; `tool` needs foreign `libbar`, whose build fails.
///
/// Output:
/// - `libfoo` goes in with `--asdeps` before `app`; `tool` is skipped with a dependency failure.
fn dependency_failure_skips_dependents() {
    let fx = fixture();
    let runner = with_builder(
        scripted_system(&SystemState::default()),
        &[
            ("app", "app", "1-1"),
            ("libfoo", "libfoo", "2-1"),
            ("tool", "tool", "1-1"),
            ("libbar", "libbar", "1-1"),
        ],
        &["libbar"],
    );
    let aur = FakeAur::new()
        .with(aur_pkg("app", "1-1", &["libfoo>=2"]))
        .with(aur_pkg("libfoo", "2-1", &[]))
        .with(aur_pkg("tool", "1-1", &["libbar"]))
        .with(aur_pkg("libbar", "1-1", &[]));

    let (report, _) = apply(&fx, desired(&[], &["app", "tool"]), &runner, aur, ApplyOptions::default());

    let mut failed = report.failed_units(FailureKind::Build);
    failed.sort_unstable();
    assert_eq!(failed, vec!["libbar", "tool"]);

    let installs = runner.calls_matching("pacman -U");
    assert_eq!(installs.len(), 2);
    assert!(installs[0].starts_with("pacman -U --asdeps --noconfirm "));
    assert!(installs[0].ends_with("libfoo-2-1.pkg.tar.zst"));
    assert!(installs[1].starts_with("pacman -U --noconfirm --asexplicit "));
    assert!(installs[1].ends_with("app-1-1.pkg.tar.zst"));

    let builds = runner.calls_matching("makechrootpkg");
    assert_eq!(builds.len(), 3);
    let app_build = builds.iter().find(|c| c.contains(" -I ")).expect("app built against libfoo");
    assert!(app_build.contains("libfoo-2-1.pkg.tar.zst"));
}
