//! Reconciliation of desired against installed package state.
//!
//! [`plan`] is pure: installed state and reverse dependencies arrive as
//! arguments, so the whole decision table is testable without a system.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::version::is_newer;
use crate::error::{PlanError, QueryError};
use crate::index::{InstalledSnapshot, unrequired};
use crate::modules::DesiredState;
use crate::sources::descriptor::is_devel;

/// Operations that bring the system in line with the desired state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Native packages to install explicitly.
    pub to_install: BTreeSet<String>,
    /// Foreign packages to build (or take from cache) and install explicitly.
    pub to_install_foreign: BTreeSet<String>,
    /// Explicit packages to remove.
    pub to_remove: BTreeSet<String>,
    /// Explicit packages still required by kept packages; marked as dependencies.
    pub to_demote: BTreeSet<String>,
    /// Dependency-installed packages that are now wanted; marked explicit.
    pub to_promote: BTreeSet<String>,
    /// Orphaned dependencies to remove, whole chains included.
    pub orphans_to_remove: BTreeSet<String>,
    /// Dependencies that only packages in `to_remove` still require.
    pub dependencies_to_remove: BTreeSet<String>,
}

impl ReconciliationPlan {
    /// True when nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty()
            && self.to_install_foreign.is_empty()
            && self.to_remove.is_empty()
            && self.to_demote.is_empty()
            && self.to_promote.is_empty()
            && self.orphans_to_remove.is_empty()
            && self.dependencies_to_remove.is_empty()
    }

    /// Everything the remove step passes to the package manager.
    #[must_use]
    pub fn removals(&self) -> BTreeSet<String> {
        self.to_remove
            .iter()
            .chain(&self.orphans_to_remove)
            .chain(&self.dependencies_to_remove)
            .cloned()
            .collect()
    }
}

/// Installed foreign packages that have a newer (or forced) build available.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ForeignUpgrades {
    /// Explicitly installed packages to rebuild.
    pub explicit: BTreeSet<String>,
    /// Dependency-installed packages to rebuild.
    pub dependency: BTreeSet<String>,
}

impl ForeignUpgrades {
    /// True when nothing needs rebuilding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.dependency.is_empty()
    }

    /// All packages to rebuild.
    #[must_use]
    pub fn all(&self) -> BTreeSet<String> {
        self.explicit.union(&self.dependency).cloned().collect()
    }
}

/// What: Reject desired states that contradict themselves.
///
/// # Errors
/// - `PlanError::OriginConflict` for names wanted as both native and foreign.
/// - `PlanError::IgnoredAndWanted` for names wanted and ignored for one origin.
pub fn validate(desired: &DesiredState) -> Result<(), PlanError> {
    let both: Vec<String> = desired
        .native_wanted
        .intersection(&desired.foreign_wanted)
        .cloned()
        .collect();
    if !both.is_empty() {
        return Err(PlanError::OriginConflict(both));
    }
    for (origin, wanted, ignored) in [
        ("native", &desired.native_wanted, &desired.ignored_native),
        ("foreign", &desired.foreign_wanted, &desired.ignored_foreign),
    ] {
        let names: Vec<String> = wanted.intersection(ignored).cloned().collect();
        if !names.is_empty() {
            return Err(PlanError::IgnoredAndWanted { origin, names });
        }
    }
    Ok(())
}

/// What: Compute the reconciliation plan.
///
/// Inputs:
/// - `desired`: Wanted and ignored names per origin.
/// - `snapshot`: Installed state captured at the start of the run.
/// - `dependents`: Oracle returning installed packages that transitively depend on a name.
///
/// Output:
/// - The plan; `dependents` is only consulted for removal candidates.
///
/// # Errors
/// - Any [`validate`] failure.
///
/// Details:
/// - A removal candidate required by a package that stays explicitly
///   installed (wanted, or ignored and installed) is demoted instead.
/// - When the oracle fails the candidate is demoted; a failed query never
///   counts as safe to remove.
/// - Orphans are removed unless ignored, even when wanted; the install step
///   reinstalls wanted ones explicitly. An ignored package keeps everything it
///   requires installed.
/// - Dependencies freed by the removals are listed explicitly so the package
///   manager never has to pick them itself; ignored and promoted ones stay.
pub fn plan<F>(
    desired: &DesiredState,
    snapshot: &InstalledSnapshot,
    mut dependents: F,
) -> Result<ReconciliationPlan, PlanError>
where
    F: FnMut(&str) -> Result<BTreeSet<String>, QueryError>,
{
    validate(desired)?;

    let explicit_foreign: BTreeSet<String> = snapshot.explicit_foreign.keys().cloned().collect();
    let keep: BTreeSet<&String> = desired
        .native_wanted
        .iter()
        .chain(&desired.foreign_wanted)
        .chain(desired.ignored_native.intersection(&snapshot.explicit_native))
        .chain(desired.ignored_foreign.intersection(&explicit_foreign))
        .collect();

    let candidates = snapshot
        .explicit_native
        .iter()
        .filter(|n| !desired.native_wanted.contains(*n) && !desired.ignored_native.contains(*n))
        .chain(
            explicit_foreign
                .iter()
                .filter(|n| !desired.foreign_wanted.contains(*n) && !desired.ignored_foreign.contains(*n)),
        );

    let mut out = ReconciliationPlan::default();
    for name in candidates {
        match dependents(name) {
            Ok(deps) if deps.iter().any(|d| keep.contains(d)) => {
                tracing::debug!(package = %name, "required by a kept package; demoting");
                out.to_demote.insert(name.clone());
            }
            Ok(_) => {
                out.to_remove.insert(name.clone());
            }
            Err(e) => {
                tracing::warn!(package = %name, error = %e, "reverse dependency query failed; demoting instead of removing");
                out.to_demote.insert(name.clone());
            }
        }
    }

    let ignored = |n: &String| desired.ignored_native.contains(n) || desired.ignored_foreign.contains(n);
    let orphan_candidates: BTreeSet<String> = snapshot
        .orphan_native
        .iter()
        .chain(&snapshot.orphan_foreign)
        .filter(|n| !ignored(n))
        .cloned()
        .collect();
    out.orphans_to_remove = unrequired(&orphan_candidates, &snapshot.required_by, &BTreeSet::new());

    let orphan = |n: &String| out.orphans_to_remove.contains(n);
    out.to_promote = desired
        .native_wanted
        .intersection(&snapshot.dependency_native)
        .chain(desired.foreign_wanted.intersection(&snapshot.dependency_foreign))
        .filter(|n| !orphan(n))
        .cloned()
        .collect();

    if !out.to_remove.is_empty() {
        let candidates: BTreeSet<String> = snapshot
            .dependency_native
            .iter()
            .chain(&snapshot.dependency_foreign)
            .filter(|n| !ignored(n) && !out.to_promote.contains(*n))
            .cloned()
            .collect();
        let leaving: BTreeSet<String> = out.to_remove.union(&out.orphans_to_remove).cloned().collect();
        out.dependencies_to_remove = unrequired(&candidates, &snapshot.required_by, &leaving)
            .difference(&out.orphans_to_remove)
            .cloned()
            .collect();
    }

    out.to_install = desired
        .native_wanted
        .iter()
        .filter(|n| !snapshot.explicit_native.contains(*n) && !out.to_promote.contains(*n))
        .cloned()
        .collect();
    out.to_install_foreign = desired
        .foreign_wanted
        .iter()
        .filter(|n| !explicit_foreign.contains(*n) && !out.to_promote.contains(*n))
        .cloned()
        .collect();

    Ok(out)
}

/// What: Select installed foreign packages to rebuild.
///
/// Inputs:
/// - `snapshot`: Installed state.
/// - `available`: Newest resolvable version per foreign name.
/// - `upgrade_devel`: Rebuild VCS packages even when the version string is unchanged.
/// - `ignored`: Foreign names never touched.
///
/// Output:
/// - Packages split by install reason so it can be preserved.
#[must_use]
pub fn foreign_upgrades(
    snapshot: &InstalledSnapshot,
    available: &BTreeMap<String, String>,
    upgrade_devel: bool,
    ignored: &BTreeSet<String>,
) -> ForeignUpgrades {
    let mut out = ForeignUpgrades::default();
    for (name, installed) in &snapshot.foreign_versions {
        if ignored.contains(name) {
            continue;
        }
        let Some(candidate) = available.get(name) else {
            continue;
        };
        if !((upgrade_devel && is_devel(name)) || is_newer(installed, candidate)) {
            continue;
        }
        tracing::debug!(package = %name, installed = %installed, candidate = %candidate, "foreign upgrade available");
        if snapshot.explicit_foreign.contains_key(name) {
            out.explicit.insert(name.clone());
        } else {
            out.dependency.insert(name.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn no_dependents(_: &str) -> Result<BTreeSet<String>, QueryError> {
        Ok(BTreeSet::new())
    }

    #[test]
    /// What: Required removal candidates are demoted, unrequired ones removed.
    ///
    /// Inputs:
    /// - `explicit_native = {A, B}`, `native_wanted = {B}`.
    ///
    /// Output:
    /// - `dependents(A) = {B}` demotes A; `dependents(A) = {}` removes A.
    fn demotion_over_removal() {
        let desired = DesiredState {
            native_wanted: set(&["B"]),
            ..DesiredState::default()
        };
        let snapshot = InstalledSnapshot {
            explicit_native: set(&["A", "B"]),
            ..InstalledSnapshot::default()
        };

        let p = plan(&desired, &snapshot, |n| Ok(if n == "A" { set(&["B"]) } else { set(&[]) }))
            .expect("plan");
        assert_eq!(p.to_demote, set(&["A"]));
        assert!(!p.to_remove.contains("A"));

        let p = plan(&desired, &snapshot, no_dependents).expect("plan");
        assert_eq!(p.to_remove, set(&["A"]));
        assert!(p.to_demote.is_empty());
    }

    #[test]
    /// What: A failing reverse-dependency query never leads to removal.
    fn query_failure_demotes() {
        let desired = DesiredState::default();
        let snapshot = InstalledSnapshot {
            explicit_native: set(&["A"]),
            ..InstalledSnapshot::default()
        };
        let p = plan(&desired, &snapshot, |n| {
            Err(QueryError::NonZero {
                query: format!("pacman -Qi {n}"),
                exit_code: Some(1),
                stderr: "error: could not lock database".into(),
            })
        })
        .expect("plan");
        assert_eq!(p.to_demote, set(&["A"]));
        assert!(p.to_remove.is_empty());
    }

    fn requirers(pairs: &[(&str, &str)]) -> BTreeMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(n, by)| ((*n).to_string(), by.split_whitespace().map(ToString::to_string).collect()))
            .collect()
    }

    #[test]
    /// What: Orphans are removed regardless of wanted sets, but never when ignored.
    fn orphans_are_removed() {
        let desired = DesiredState {
            native_wanted: set(&["wanted-orphan"]),
            ignored_native: set(&["kept-orphan"]),
            ..DesiredState::default()
        };
        let snapshot = InstalledSnapshot {
            orphan_native: set(&["stray", "wanted-orphan", "kept-orphan"]),
            dependency_native: set(&["stray", "wanted-orphan", "kept-orphan"]),
            orphan_foreign: set(&["aur-stray"]),
            dependency_foreign: set(&["aur-stray"]),
            required_by: requirers(&[("stray", ""), ("wanted-orphan", ""), ("kept-orphan", ""), ("aur-stray", "")]),
            ..InstalledSnapshot::default()
        };
        let p = plan(&desired, &snapshot, no_dependents).expect("plan");
        assert_eq!(p.orphans_to_remove, set(&["aur-stray", "stray", "wanted-orphan"]));
        assert!(p.to_install.contains("wanted-orphan"));
        assert!(p.to_promote.is_empty());
        assert!(p.dependencies_to_remove.is_empty());
    }

    #[test]
    /// What: An ignored link in an orphan chain keeps itself and everything below it.
    ///
    /// Inputs:
    /// - Orphan chain `top <- mid <- low` (`top` requires `mid`, `mid` requires `low`), `mid` ignored.
    ///
    /// Output:
    /// - Only `top` is removed; `mid` and `low` stay.
    fn ignored_orphan_link_protects_chain() {
        let desired = DesiredState {
            ignored_native: set(&["mid"]),
            ..DesiredState::default()
        };
        let snapshot = InstalledSnapshot {
            orphan_native: set(&["top", "mid", "low"]),
            dependency_native: set(&["top", "mid", "low"]),
            required_by: requirers(&[("top", ""), ("mid", "top"), ("low", "mid")]),
            ..InstalledSnapshot::default()
        };
        let p = plan(&desired, &snapshot, no_dependents).expect("plan");
        assert_eq!(p.orphans_to_remove, set(&["top"]));
        assert_eq!(p.removals(), set(&["top"]));
    }

    #[test]
    /// What: Dependencies freed by a removal are listed, except ignored and promoted ones.
    ///
    /// Inputs:
    /// - Explicit `app` removed; it alone requires `libfoo`, `libheld` (ignored)
    ///   and `git` (wanted); `libfoo` requires `libbase`; `glibc` is also required by `bash`.
    ///
    /// Output:
    /// - `libfoo` and `libbase` are removed with `app`; `git` is promoted; the others stay.
    fn removal_frees_unneeded_dependencies() {
        let desired = DesiredState {
            native_wanted: set(&["bash", "git"]),
            ignored_native: set(&["libheld"]),
            ..DesiredState::default()
        };
        let snapshot = InstalledSnapshot {
            explicit_native: set(&["app", "bash"]),
            dependency_native: set(&["libfoo", "libbase", "libheld", "git", "glibc"]),
            required_by: requirers(&[
                ("libfoo", "app"),
                ("libbase", "libfoo"),
                ("libheld", "app"),
                ("git", "app"),
                ("glibc", "app bash"),
            ]),
            ..InstalledSnapshot::default()
        };
        let p = plan(&desired, &snapshot, no_dependents).expect("plan");
        assert_eq!(p.to_remove, set(&["app"]));
        assert_eq!(p.to_promote, set(&["git"]));
        assert_eq!(p.dependencies_to_remove, set(&["libbase", "libfoo"]));
        assert!(p.orphans_to_remove.is_empty());
        assert_eq!(p.removals(), set(&["app", "libbase", "libfoo"]));
    }

    #[test]
    /// What: Contract violations are reported, not resolved.
    fn conflicting_inputs_are_errors() {
        let both = DesiredState {
            native_wanted: set(&["x"]),
            foreign_wanted: set(&["x"]),
            ..DesiredState::default()
        };
        assert_eq!(
            plan(&both, &InstalledSnapshot::default(), no_dependents),
            Err(PlanError::OriginConflict(vec!["x".into()]))
        );

        let ignored = DesiredState {
            foreign_wanted: set(&["y"]),
            ignored_foreign: set(&["y"]),
            ..DesiredState::default()
        };
        assert!(matches!(
            plan(&ignored, &InstalledSnapshot::default(), no_dependents),
            Err(PlanError::IgnoredAndWanted { origin: "foreign", .. })
        ));
    }

    #[test]
    /// What: Install, promote and foreign sets are computed independently.
    ///
    /// Inputs:
    /// - Native `vim` missing, `git` installed as a dependency; foreign `yay`
    ///   installed explicitly, `paru` missing; ignored explicit `linux-custom`.
    ///
    /// Output:
    /// - `vim` and `paru` installed, `git` promoted, `linux-custom` untouched.
    fn install_and_promote_sets() {
        let desired = DesiredState {
            native_wanted: set(&["vim", "git"]),
            foreign_wanted: set(&["yay", "paru"]),
            ignored_native: set(&["linux-custom"]),
            ..DesiredState::default()
        };
        let snapshot = InstalledSnapshot {
            explicit_native: set(&["linux-custom"]),
            dependency_native: set(&["git"]),
            explicit_foreign: [("yay".to_string(), "12-1".to_string())].into_iter().collect(),
            ..InstalledSnapshot::default()
        };
        let p = plan(&desired, &snapshot, no_dependents).expect("plan");
        assert_eq!(p.to_install, set(&["vim"]));
        assert_eq!(p.to_install_foreign, set(&["paru"]));
        assert_eq!(p.to_promote, set(&["git"]));
        assert!(p.to_remove.is_empty());
        assert!(p.to_demote.is_empty());
    }

    #[test]
    /// What: Upgrades follow vercmp, devel forcing and install reason.
    fn foreign_upgrade_selection() {
        let snapshot = InstalledSnapshot {
            explicit_foreign: [
                ("pkgA".to_string(), "1.0-1".to_string()),
                ("tool-git".to_string(), "r5.abc-1".to_string()),
            ]
            .into_iter()
            .collect(),
            foreign_versions: [
                ("pkgA".to_string(), "1.0-1".to_string()),
                ("tool-git".to_string(), "r5.abc-1".to_string()),
                ("libdep".to_string(), "2.0-1".to_string()),
                ("held".to_string(), "1-1".to_string()),
            ]
            .into_iter()
            .collect(),
            ..InstalledSnapshot::default()
        };
        let available: BTreeMap<String, String> = [
            ("pkgA", "1.1-1"),
            ("tool-git", "r5.abc-1"),
            ("libdep", "2.1-1"),
            ("held", "2-1"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        let ignored = set(&["held"]);

        let up = foreign_upgrades(&snapshot, &available, false, &ignored);
        assert_eq!(up.explicit, set(&["pkgA"]));
        assert_eq!(up.dependency, set(&["libdep"]));

        let forced = foreign_upgrades(&snapshot, &available, true, &ignored);
        assert_eq!(forced.explicit, set(&["pkgA", "tool-git"]));
    }
}
