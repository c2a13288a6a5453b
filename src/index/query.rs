//! Single-invocation pacman queries and their line parsers.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::command::{CommandRunner, RunOptions, argv};
use crate::error::QueryError;

/// What: Run one read-only pacman query and return its stdout.
///
/// Inputs:
/// - `runner`: Command runner.
/// - `args`: Arguments passed after `pacman`.
///
/// Output:
/// - stdout on success. An exit code of 1 with empty stderr is pacman's
///   "nothing matched" and yields an empty string.
///
/// # Errors
/// - `QueryError::Command` when pacman cannot be started.
/// - `QueryError::NonZero` for any other failing exit.
pub fn run_query<R: CommandRunner + ?Sized>(runner: &R, args: &[&str]) -> Result<String, QueryError> {
    let mut cmd = vec!["pacman"];
    cmd.extend_from_slice(args);
    let label = cmd.join(" ");
    tracing::debug!(query = %label, "running pacman query");

    let out = runner
        .run(&argv(&cmd), &RunOptions::new())
        .map_err(|source| QueryError::Command {
            query: label.clone(),
            source,
        })?;
    if out.success() {
        return Ok(out.stdout);
    }
    if out.exit_code == Some(1) && out.stderr.trim().is_empty() {
        return Ok(String::new());
    }
    Err(QueryError::NonZero {
        query: label,
        exit_code: out.exit_code,
        stderr: out.stderr.trim().to_string(),
    })
}

/// What: Parse `pacman -Q...q` output into a name set.
///
/// Details:
/// - Blank lines are skipped; only the first whitespace-separated token counts.
#[must_use]
pub fn parse_names(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(ToString::to_string)
        .collect()
}

/// What: Parse `name version` lines into a map.
///
/// Details:
/// - Lines without a version token are ignored.
#[must_use]
pub fn parse_name_versions(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some((name.to_string(), version.to_string()))
        })
        .collect()
}

/// What: Remove a version constraint from a dependency string.
///
/// Inputs:
/// - `dep`: e.g. `foo>=1.2`, `bar=3`, `baz<2`.
///
/// Output:
/// - The bare name (`foo`, `bar`, `baz`).
#[must_use]
pub fn strip_dependency(dep: &str) -> &str {
    dep.find(['=', '<', '>']).map_or(dep, |i| &dep[..i]).trim()
}

/// Answers whether a dependency can be installed from the sync repositories.
pub trait NativeIndex {
    /// True when `dep` (possibly version-constrained) is satisfied by a sync repository.
    fn is_native(&self, dep: &str) -> bool;
}

impl NativeIndex for BTreeSet<String> {
    fn is_native(&self, dep: &str) -> bool {
        self.contains(strip_dependency(dep))
    }
}

/// Sync database view built from `pacman -Slq`, resolving provides on demand.
pub struct SyncIndex<R> {
    runner: R,
    names: BTreeSet<String>,
    resolved: RefCell<HashMap<String, bool>>,
}

impl<R: CommandRunner> SyncIndex<R> {
    /// What: Load the sync package names.
    ///
    /// # Errors
    /// - `QueryError` when `pacman -Slq` fails.
    pub fn load(runner: R) -> Result<Self, QueryError> {
        let names = parse_names(&run_query(&runner, &["-Slq"])?);
        tracing::debug!(count = names.len(), "loaded sync package names");
        Ok(Self {
            runner,
            names,
            resolved: RefCell::new(HashMap::new()),
        })
    }

    /// True when a sync repository has a package with exactly this name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl<R: CommandRunner> NativeIndex for SyncIndex<R> {
    fn is_native(&self, dep: &str) -> bool {
        if self.names.contains(strip_dependency(dep)) {
            return true;
        }
        if let Some(hit) = self.resolved.borrow().get(dep) {
            return *hit;
        }
        // -Sddp resolves provides without touching the system
        let cmd = argv(&["pacman", "-Sddp", "--print-format=%n", dep]);
        let hit = match self.runner.run(&cmd, &RunOptions::new()) {
            Ok(out) => out.success() && !out.stdout.trim().is_empty(),
            Err(e) => {
                tracing::warn!(dependency = %dep, error = %e, "provides lookup failed; assuming foreign");
                false
            }
        };
        self.resolved.borrow_mut().insert(dep.to_string(), hit);
        hit
    }
}
