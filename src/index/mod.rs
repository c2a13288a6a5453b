//! Read-only view of the installed package database.
//!
//! Every query is one `pacman` invocation whose line output is parsed into a
//! set or map. An empty answer is a valid state; a failing tool is a
//! [`QueryError`].

pub mod query;
pub mod reverse;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::command::CommandRunner;
use crate::error::QueryError;
use query::{parse_name_versions, parse_names, run_query};

/// Point-in-time capture of installed package state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstalledSnapshot {
    /// Explicitly installed packages from sync repositories.
    pub explicit_native: BTreeSet<String>,
    /// Explicitly installed foreign packages with their versions.
    pub explicit_foreign: BTreeMap<String, String>,
    /// Native dependencies nothing outside the orphan set requires.
    pub orphan_native: BTreeSet<String>,
    /// Foreign dependencies nothing outside the orphan set requires.
    pub orphan_foreign: BTreeSet<String>,
    /// Native packages installed as dependencies.
    pub dependency_native: BTreeSet<String>,
    /// Foreign packages installed as dependencies.
    pub dependency_foreign: BTreeSet<String>,
    /// Every installed foreign package with its version.
    pub foreign_versions: BTreeMap<String, String>,
    /// Installed packages requiring each dependency-installed package.
    pub required_by: BTreeMap<String, BTreeSet<String>>,
}

impl InstalledSnapshot {
    /// True when `name` is installed from any origin.
    #[must_use]
    pub fn is_installed(&self, name: &str) -> bool {
        self.explicit_native.contains(name)
            || self.dependency_native.contains(name)
            || self.foreign_versions.contains_key(name)
    }
}

/// What: Members of `candidates` that only packages being removed still require.
///
/// Inputs:
/// - `candidates`: Dependency-installed packages that may go.
/// - `required_by`: Requirers per installed package.
/// - `removed`: Packages already leaving the system.
///
/// Output:
/// - The largest subset whose requirers all lie in the subset or in `removed`.
///   A candidate with no `required_by` record is kept.
///
/// Details:
/// - Candidates are dropped repeatedly until nothing changes, so a whole
///   chain of orphans is found, not only its top.
#[must_use]
pub fn unrequired(
    candidates: &BTreeSet<String>,
    required_by: &BTreeMap<String, BTreeSet<String>>,
    removed: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut out = candidates.clone();
    loop {
        let pinned: Vec<String> = out
            .iter()
            .filter(|name| {
                required_by
                    .get(*name)
                    .is_none_or(|by| by.iter().any(|r| !out.contains(r) && !removed.contains(r)))
            })
            .cloned()
            .collect();
        if pinned.is_empty() {
            return out;
        }
        for name in &pinned {
            out.remove(name);
        }
    }
}

/// Queries the live package database through a [`CommandRunner`].
pub struct InstalledStateInspector<R> {
    runner: R,
    required_by: RefCell<HashMap<String, Vec<String>>>,
}

impl<R: CommandRunner> InstalledStateInspector<R> {
    /// Inspector over `runner`.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            required_by: RefCell::new(HashMap::new()),
        }
    }

    /// What: Capture the installed state.
    ///
    /// Output:
    /// - A fresh [`InstalledSnapshot`]; cached reverse dependencies are dropped.
    ///
    /// # Errors
    /// - The first failing query as `QueryError`.
    pub fn snapshot(&self) -> Result<InstalledSnapshot, QueryError> {
        self.required_by.borrow_mut().clear();
        let dependency_native = self.names(&["-Qdqn"])?;
        let dependency_foreign = self.names(&["-Qdqm"])?;
        let dependencies: BTreeSet<String> = dependency_native.union(&dependency_foreign).cloned().collect();
        let required_by = reverse::required_by_many(&self.runner, &dependencies)?;
        self.required_by.borrow_mut().extend(
            required_by
                .iter()
                .map(|(name, by)| (name.clone(), by.iter().cloned().collect())),
        );
        let orphans = unrequired(&dependencies, &required_by, &BTreeSet::new());

        let snap = InstalledSnapshot {
            explicit_native: self.names(&["-Qeqn"])?,
            explicit_foreign: parse_name_versions(&run_query(&self.runner, &["-Qem"])?),
            orphan_native: orphans.intersection(&dependency_native).cloned().collect(),
            orphan_foreign: orphans.intersection(&dependency_foreign).cloned().collect(),
            dependency_native,
            dependency_foreign,
            foreign_versions: parse_name_versions(&run_query(&self.runner, &["-Qm"])?),
            required_by,
        };
        tracing::debug!(
            explicit_native = snap.explicit_native.len(),
            explicit_foreign = snap.explicit_foreign.len(),
            orphans = snap.orphan_native.len() + snap.orphan_foreign.len(),
            "captured installed package state"
        );
        Ok(snap)
    }

    fn names(&self, args: &[&str]) -> Result<BTreeSet<String>, QueryError> {
        run_query(&self.runner, args).map(|text| parse_names(&text))
    }

    /// What: Installed packages that transitively depend on `name`.
    ///
    /// # Errors
    /// - `QueryError` when `name` itself cannot be queried.
    pub fn dependents(&self, name: &str) -> Result<BTreeSet<String>, QueryError> {
        reverse::dependents(&self.runner, name, &self.required_by)
    }
}
