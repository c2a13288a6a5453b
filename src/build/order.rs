//! Build ordering over package bases.

use std::collections::{BTreeMap, BTreeSet};

use crate::sources::ResolvedPackage;

/// Bases in build order plus whatever could not be ordered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOrder {
    /// Bases, dependencies first.
    pub order: Vec<String>,
    /// Bases on or behind a dependency cycle.
    pub cyclic: BTreeSet<String>,
    /// One edge of a cycle, for the error message.
    pub cycle_edge: Option<(String, String)>,
}

/// What: Group resolved packages by base.
#[must_use]
pub fn bases(packages: &BTreeMap<String, ResolvedPackage>) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for pkg in packages.values() {
        out.entry(pkg.desc.base.clone())
            .or_default()
            .insert(pkg.desc.name.clone());
    }
    out
}

/// What: Order the bases of `targets` so every base follows the bases it needs.
///
/// Inputs:
/// - `packages`: Resolved packages, including every foreign dependency.
/// - `targets`: Package names that must be available after the builds.
///
/// Output:
/// - Leaf-first base order covering `targets` and their foreign dependencies.
///
/// Details:
/// - Dependencies between outputs of the same base are ignored.
/// - Ties are broken by base name.
#[must_use]
pub fn build_order(packages: &BTreeMap<String, ResolvedPackage>, targets: &BTreeSet<String>) -> BuildOrder {
    let mut needed: BTreeSet<String> = BTreeSet::new();
    let mut stack: Vec<&String> = targets.iter().collect();
    while let Some(name) = stack.pop() {
        let Some(pkg) = packages.get(name) else {
            continue;
        };
        if needed.insert(name.clone()) {
            stack.extend(pkg.foreign_deps());
        }
    }

    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in &needed {
        let pkg = &packages[name];
        let entry = deps.entry(pkg.desc.base.clone()).or_default();
        for dep in pkg.foreign_deps() {
            if let Some(dep_pkg) = packages.get(dep)
                && dep_pkg.desc.base != pkg.desc.base
            {
                entry.insert(dep_pkg.desc.base.clone());
            }
        }
    }

    let mut remaining = deps;
    let mut order = Vec::new();
    loop {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|(_, d)| d.is_empty())
            .map(|(b, _)| b.clone())
            .collect();
        if ready.is_empty() {
            break;
        }
        for base in ready {
            remaining.remove(&base);
            for d in remaining.values_mut() {
                d.remove(&base);
            }
            order.push(base);
        }
    }

    let cycle_edge = remaining
        .iter()
        .find_map(|(b, d)| d.iter().next().map(|dep| (b.clone(), dep.clone())));
    if let Some((a, b)) = &cycle_edge {
        tracing::warn!(base = %a, depends_on = %b, "foreign dependency cycle");
    }
    BuildOrder {
        order,
        cyclic: remaining.into_keys().collect(),
        cycle_edge,
    }
}

/// What: Foreign packages that must be present in the build root for `base`.
///
/// Output:
/// - Names of direct foreign dependencies of the base's outputs plus the
///   runtime closure of those, excluding the base's own outputs.
#[must_use]
pub fn root_foreign_deps(packages: &BTreeMap<String, ResolvedPackage>, base: &str) -> BTreeSet<String> {
    let own: BTreeSet<&String> = packages
        .values()
        .filter(|p| p.desc.base == base)
        .map(|p| &p.desc.name)
        .collect();
    let mut out: BTreeSet<String> = BTreeSet::new();
    let mut stack: Vec<&String> = packages
        .values()
        .filter(|p| p.desc.base == base)
        .flat_map(|p| p.foreign_deps())
        .collect();
    while let Some(name) = stack.pop() {
        if own.contains(name) || !out.insert(name.clone()) {
            continue;
        }
        if let Some(pkg) = packages.get(name) {
            stack.extend(pkg.foreign_runtime.iter());
        }
    }
    out
}
