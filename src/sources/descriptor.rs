//! Normalized metadata for one foreign package output.

use std::collections::BTreeSet;
use std::fmt;

use crate::index::query::strip_dependency;

/// Name suffixes that mark continuously versioned (VCS) packages.
pub const DEVEL_SUFFIXES: &[&str] = &["-git", "-hg", "-bzr", "-svn", "-cvs", "-darcs"];

/// True when `name` tracks a moving VCS revision.
#[must_use]
pub fn is_devel(name: &str) -> bool {
    DEVEL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Where a build recipe comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    /// Looked up through the AUR RPC, cloned from the AUR git host.
    AurRpc,
    /// Cloned from a user supplied git repository.
    GitRepo,
    /// Copied from a local directory.
    LocalDir,
}

/// Recipe location.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLocation {
    /// Kind of source.
    pub kind: SourceKind,
    /// Git URL or directory path.
    pub location: String,
}

impl SourceLocation {
    /// AUR git URL for a package base.
    #[must_use]
    pub fn aur(base: &str) -> Self {
        Self {
            kind: SourceKind::AurRpc,
            location: format!("https://aur.archlinux.org/{base}.git"),
        }
    }

    /// True when the recipe is fetched with git.
    #[must_use]
    pub const fn is_git(&self) -> bool {
        matches!(self.kind, SourceKind::AurRpc | SourceKind::GitRepo)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Resolved description of a foreign package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignPackageDescriptor {
    /// Package name.
    pub name: String,
    /// Build unit; split packages share one base.
    pub base: String,
    /// `[epoch:]pkgver-pkgrel`.
    pub version: String,
    /// Runtime dependencies, possibly version-constrained.
    pub runtime_deps: BTreeSet<String>,
    /// Build-time dependencies.
    pub build_deps: BTreeSet<String>,
    /// Test-time dependencies.
    pub check_deps: BTreeSet<String>,
    /// Virtual names this package provides, possibly versioned.
    pub provides: BTreeSet<String>,
    /// Recipe location.
    pub source: SourceLocation,
}

impl ForeignPackageDescriptor {
    /// Prefix of the file makepkg writes for this package.
    #[must_use]
    pub fn file_prefix(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// True when this package is a VCS package.
    #[must_use]
    pub fn is_devel(&self) -> bool {
        is_devel(&self.name)
    }

    /// True when `dep` names this package or one of its provides.
    #[must_use]
    pub fn satisfies(&self, dep: &str) -> bool {
        let bare = strip_dependency(dep);
        self.name == bare || self.provides.iter().any(|p| strip_dependency(p) == bare)
    }

    /// Build and check dependencies together.
    pub fn make_deps(&self) -> impl Iterator<Item = &String> {
        self.build_deps.iter().chain(self.check_deps.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// What: Devel suffix detection.
    fn devel_suffixes_are_detected() {
        assert!(is_devel("neovim-git"));
        assert!(is_devel("foo-darcs"));
        assert!(!is_devel("git"));
        assert!(!is_devel("gitkraken"));
    }

    #[test]
    /// What: Provides match with and without versions.
    fn satisfies_checks_name_and_provides() {
        let d = ForeignPackageDescriptor {
            name: "foo-git".into(),
            base: "foo-git".into(),
            version: "r10.abc-1".into(),
            runtime_deps: BTreeSet::new(),
            build_deps: BTreeSet::new(),
            check_deps: BTreeSet::new(),
            provides: ["foo=1.2".to_string()].into_iter().collect(),
            source: SourceLocation::aur("foo-git"),
        };
        assert!(d.satisfies("foo-git"));
        assert!(d.satisfies("foo>=1"));
        assert!(!d.satisfies("bar"));
        assert_eq!(d.file_prefix(), "foo-git-r10.abc-1");
        assert_eq!(d.source.location, "https://aur.archlinux.org/foo-git.git");
    }
}
