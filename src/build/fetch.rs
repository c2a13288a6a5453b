//! Recipe checkout into the build directory.

use std::path::{Path, PathBuf};

use crate::cache::package_extension;
use crate::command::{CommandRunner, RunOptions, argv};
use crate::error::BuildError;
use crate::sources::descriptor::SourceLocation;
use crate::util::{chown_recursive, copy_dir_recursive};

/// A recipe ready to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedRecipe {
    /// Directory containing the `PKGBUILD`.
    pub dir: PathBuf,
    /// Checked out git revision; `None` for local directories.
    pub revision: Option<String>,
}

/// What: Clone, pull or copy the recipe for `base` into `<build_dir>/pkgbuilds/<base>`.
///
/// Inputs:
/// - `runner`: Command runner.
/// - `source`: Recipe location.
/// - `base`: Package base name.
/// - `build_dir`: Scratch directory.
/// - `user`: Account that owns the checkout and runs git.
///
/// Output:
/// - The checkout with stale package files removed.
///
/// # Errors
/// - `BuildError::Sources` when git or the copy fails.
pub fn fetch_recipe<R: CommandRunner + ?Sized>(
    runner: &R,
    source: &SourceLocation,
    base: &str,
    build_dir: &Path,
    user: &str,
) -> Result<FetchedRecipe, BuildError> {
    let err = |message: String| BuildError::Sources {
        base: base.to_string(),
        message,
    };
    let parent = build_dir.join("pkgbuilds");
    let dir = parent.join(base);
    std::fs::create_dir_all(&parent).map_err(|e| err(e.to_string()))?;
    chown_recursive(&parent, user).map_err(|e| err(e.to_string()))?;

    let revision = if source.is_git() {
        let as_user = RunOptions::new().user(user);
        if dir.join(".git").is_dir() {
            tracing::debug!(base = %base, "pulling recipe");
            runner
                .run_checked(&argv(&["git", "pull", "--ff-only"]), &as_user.clone().cwd(&dir))
                .map_err(|e| err(e.to_string()))?;
        } else {
            if dir.exists() {
                std::fs::remove_dir_all(&dir).map_err(|e| err(e.to_string()))?;
            }
            tracing::debug!(base = %base, url = %source, "cloning recipe");
            let dest = dir.display().to_string();
            runner
                .run_checked(
                    &argv(&["git", "clone", source.location.as_str(), dest.as_str()]),
                    &as_user,
                )
                .map_err(|e| err(e.to_string()))?;
        }
        let out = runner
            .run_checked(&argv(&["git", "rev-parse", "HEAD"]), &as_user.cwd(&dir))
            .map_err(|e| err(e.to_string()))?;
        Some(out.stdout.trim().to_string()).filter(|r| !r.is_empty())
    } else {
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| err(e.to_string()))?;
        }
        copy_dir_recursive(Path::new(&source.location), &dir).map_err(|e| err(e.to_string()))?;
        chown_recursive(&dir, user).map_err(|e| err(e.to_string()))?;
        None
    };

    if !dir.join("PKGBUILD").is_file() {
        return Err(err(format!("no PKGBUILD in '{}'", dir.display())));
    }
    remove_package_files(&dir).map_err(|e| err(e.to_string()))?;
    Ok(FetchedRecipe { dir, revision })
}

fn remove_package_files(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if package_extension(&name.to_string_lossy()).is_some() && entry.path().is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::sources::descriptor::SourceKind;
    use crate::test_utils::{ScriptedRunner, current_user};

    #[test]
    /// What: Local recipes are copied and stale packages dropped.
    fn local_recipe_is_copied() {
        let recipe = tempfile::tempdir().expect("tempdir");
        std::fs::write(recipe.path().join("PKGBUILD"), "pkgname=tool").expect("write");
        std::fs::write(recipe.path().join("tool-0.1-1-x86_64.pkg.tar.zst"), "old").expect("write");
        let build = tempfile::tempdir().expect("tempdir");
        let user = current_user();
        let source = SourceLocation {
            kind: SourceKind::LocalDir,
            location: recipe.path().display().to_string(),
        };

        let fetched = fetch_recipe(&ScriptedRunner::new(), &source, "tool", build.path(), &user).expect("fetch");
        assert_eq!(fetched.dir, build.path().join("pkgbuilds/tool"));
        assert_eq!(fetched.revision, None);
        assert!(fetched.dir.join("PKGBUILD").is_file());
        assert!(!fetched.dir.join("tool-0.1-1-x86_64.pkg.tar.zst").exists());
    }

    #[test]
    /// What: Git recipes are cloned once, pulled afterwards, and report their revision.
    fn git_recipe_clone_then_pull() {
        let build = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new()
            .on("git clone", |argv, _| {
                let dest = PathBuf::from(argv.last().cloned().unwrap_or_default());
                std::fs::create_dir_all(dest.join(".git")).expect("mkdir");
                std::fs::write(dest.join("PKGBUILD"), "pkgname=yay").expect("write");
                CommandOutput::ok("")
            })
            .on_ok("git rev-parse HEAD", "0123abcd\n");
        let source = SourceLocation::aur("yay");
        let user = current_user();

        let first = fetch_recipe(&runner, &source, "yay", build.path(), &user).expect("clone");
        assert_eq!(first.revision.as_deref(), Some("0123abcd"));
        let second = fetch_recipe(&runner, &source, "yay", build.path(), &user).expect("pull");
        assert_eq!(second.dir, first.dir);

        assert_eq!(runner.calls_matching("git clone").len(), 1);
        let pulls = runner.calls();
        let pull = pulls
            .iter()
            .find(|c| c.command == "git pull --ff-only")
            .expect("pull issued");
        assert_eq!(pull.opts.cwd.as_deref(), Some(first.dir.as_path()));
        assert_eq!(pull.opts.as_user.as_deref(), Some(user.as_str()));
    }
}
