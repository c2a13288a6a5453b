//! User supplied build recipes from a git repository or a local directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::descriptor::{ForeignPackageDescriptor, SourceKind, SourceLocation};
use super::srcinfo::parse_srcinfo;
use crate::command::{CommandRunner, RunOptions, argv};
use crate::error::ResolveError;

/// Where a custom recipe lives.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomSource {
    /// Git repository URL with a `PKGBUILD` at its root.
    Git(String),
    /// Local directory containing a `PKGBUILD`.
    Dir(PathBuf),
}

/// A foreign package built from a user supplied recipe.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomPackage {
    /// Package name the recipe is expected to produce.
    pub name: String,
    /// Recipe location.
    pub source: CustomSource,
}

impl CustomPackage {
    /// Location recorded on descriptors produced from this recipe.
    #[must_use]
    pub fn location(&self) -> SourceLocation {
        match &self.source {
            CustomSource::Git(url) => SourceLocation {
                kind: SourceKind::GitRepo,
                location: url.clone(),
            },
            CustomSource::Dir(dir) => SourceLocation {
                kind: SourceKind::LocalDir,
                location: dir.display().to_string(),
            },
        }
    }
}

/// What: Resolve a custom recipe into descriptors for every output it declares.
///
/// Inputs:
/// - `runner`: Command runner.
/// - `pkg`: Recipe to inspect.
/// - `user`: Unprivileged account that runs git and makepkg.
/// - `arch`: Machine architecture for `.SRCINFO` arch keys.
///
/// Output:
/// - One descriptor per `pkgname`, all sharing base, source and version.
///
/// # Errors
/// - `ResolveError::Recipe` when the recipe cannot be fetched or parsed, or
///   does not declare `pkg.name` among its outputs.
pub fn resolve_custom<R: CommandRunner + ?Sized>(
    runner: &R,
    pkg: &CustomPackage,
    user: &str,
    arch: &str,
) -> Result<Vec<ForeignPackageDescriptor>, ResolveError> {
    let location = pkg.location();
    let recipe_err = |message: String| ResolveError::Recipe {
        source_location: location.location.clone(),
        message,
    };

    // The clone must outlive the metadata command below.
    let (_clone, dir) = match &pkg.source {
        CustomSource::Dir(dir) => (None, dir.clone()),
        CustomSource::Git(url) => {
            let tmp = tempfile::Builder::new()
                .prefix("decman-recipe-")
                .tempdir()
                .map_err(|e| recipe_err(e.to_string()))?;
            crate::util::chown_recursive(tmp.path(), user).map_err(|e| recipe_err(e.to_string()))?;
            let dir = tmp.path().join(&pkg.name);
            let dest = dir.display().to_string();
            let cmd = argv(&["git", "clone", url.as_str(), dest.as_str()]);
            runner
                .run_checked(&cmd, &RunOptions::new().user(user))
                .map_err(|e| recipe_err(e.to_string()))?;
            (Some(tmp), dir)
        }
    };

    let text = print_srcinfo(runner, &dir, user).map_err(recipe_err)?;
    let descs = parse_srcinfo(&text, arch, &location).map_err(recipe_err)?;
    if !descs.iter().any(|d| d.name == pkg.name) {
        let declared: Vec<&str> = descs.iter().map(|d| d.name.as_str()).collect();
        return Err(recipe_err(format!(
            "recipe does not produce '{}' (declares: {})",
            pkg.name,
            declared.join(", ")
        )));
    }
    tracing::debug!(
        package = %pkg.name,
        source = %location,
        outputs = descs.len(),
        "resolved custom recipe"
    );
    Ok(descs)
}

fn print_srcinfo<R: CommandRunner + ?Sized>(runner: &R, dir: &Path, user: &str) -> Result<String, String> {
    if !dir.join("PKGBUILD").is_file() {
        return Err(format!("no PKGBUILD in '{}'", dir.display()));
    }
    let out = runner
        .run_checked(
            &argv(&["makepkg", "--printsrcinfo"]),
            &RunOptions::new().user(user).cwd(dir),
        )
        .map_err(|e| e.to_string())?;
    Ok(out.stdout)
}
