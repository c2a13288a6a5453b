//! Outcome of one `apply` call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::build::BuildDecision;
use crate::logic::plan::{ForeignUpgrades, ReconciliationPlan};

/// Failure taxonomy surfaced in the run summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Installed state could not be queried.
    Query,
    /// Metadata for a foreign name was unavailable.
    Resolution,
    /// A base failed to build.
    Build,
    /// A package manager transaction failed.
    Install,
    /// The artifact cache could not store or evict a file.
    CacheIo,
    /// The desired state contradicts itself.
    Plan,
}

impl FailureKind {
    /// Whether a failure of this kind makes the run unsuccessful.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::CacheIo)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Query => "query",
            Self::Resolution => "resolution",
            Self::Build => "build",
            Self::Install => "install",
            Self::CacheIo => "cache",
            Self::Plan => "plan",
        };
        f.write_str(label)
    }
}

/// One failed unit: a package, a base, or a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Package, base or step name.
    pub unit: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Rendered error.
    pub detail: String,
}

/// What: Everything `apply` learned and did.
///
/// Details:
/// - `success` is false as soon as a fatal failure is recorded.
/// - `plan` is `None` only when planning itself failed.
#[derive(Clone, Debug, Serialize)]
pub struct ApplyReport {
    /// No fatal failure occurred.
    pub success: bool,
    /// The run issued no mutating command.
    pub dry_run: bool,
    /// Computed reconciliation plan.
    pub plan: Option<ReconciliationPlan>,
    /// Installed foreign packages selected for rebuild.
    pub upgrades: ForeignUpgrades,
    /// Cache-or-rebuild decision per package base.
    pub builds: BTreeMap<String, BuildDecision>,
    /// Failures in the order they happened.
    pub failures: Vec<FailureRecord>,
}

impl ApplyReport {
    /// Empty successful report.
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            success: true,
            dry_run,
            plan: None,
            upgrades: ForeignUpgrades::default(),
            builds: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// Record a failure and log it.
    pub fn record(&mut self, unit: impl Into<String>, kind: FailureKind, detail: impl fmt::Display) {
        let unit = unit.into();
        let detail = detail.to_string();
        if kind.is_fatal() {
            tracing::error!(unit = %unit, kind = %kind, error = %detail, "operation failed");
            self.success = false;
        } else {
            tracing::warn!(unit = %unit, kind = %kind, error = %detail, "non-fatal failure");
        }
        self.failures.push(FailureRecord { unit, kind, detail });
    }

    /// Failed units of one kind.
    #[must_use]
    pub fn failed_units(&self, kind: FailureKind) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.unit.as_str())
            .collect()
    }

    /// What: Human-readable summary for the terminal.
    ///
    /// Output:
    /// - One line per non-empty plan list, one per build decision in dry
    ///   runs, then one per failure.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut list = |label: &str, names: &BTreeSet<String>| {
            if !names.is_empty() {
                let joined: Vec<&str> = names.iter().map(String::as_str).collect();
                lines.push(format!("{label}: {}", joined.join(" ")));
            }
        };
        if let Some(plan) = &self.plan {
            list("remove", &plan.to_remove);
            list("remove orphans", &plan.orphans_to_remove);
            list("remove unneeded dependencies", &plan.dependencies_to_remove);
            list("install", &plan.to_install);
            list("install foreign", &plan.to_install_foreign);
            list("mark explicit", &plan.to_promote);
            list("mark as dependency", &plan.to_demote);
        }
        list("upgrade foreign", &self.upgrades.all());
        if self.dry_run {
            for (base, decision) in &self.builds {
                let how = match decision {
                    BuildDecision::Cache => "reuse cached package",
                    BuildDecision::Rebuild => "build from source",
                };
                lines.push(format!("{base}: {how}"));
            }
        }
        for f in &self.failures {
            lines.push(format!("{} failed ({}): {}", f.unit, f.kind, f.detail));
        }
        if self.plan.as_ref().is_some_and(ReconciliationPlan::is_empty)
            && self.upgrades.is_empty()
            && self.failures.is_empty()
        {
            lines.push("system already matches the declared packages".to_string());
        }
        lines
    }
}
