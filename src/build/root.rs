//! The shared build root.
//!
//! The root lives at `<build_dir>/chroot/root`; `makechrootpkg` builds in a
//! per-user working copy next to it. A marker file in `<build_dir>/chroot`
//! records the base packages the root was provisioned with. It is trusted
//! when the pipeline starts and rewritten only after a successful run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command::{CommandRunner, RunOptions, argv};
use crate::error::BuildError;

/// Marker file name inside the chroot working directory.
pub const ROOT_MARKER: &str = ".decman-root.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RootMarker {
    base_packages: BTreeSet<String>,
}

/// Handle on the build root.
#[derive(Debug)]
pub struct BuildRoot {
    chroot_wd: PathBuf,
    path: PathBuf,
    base_packages: BTreeSet<String>,
    provisioned: BTreeSet<String>,
    installed_deps: BTreeSet<String>,
    ready: bool,
}

impl BuildRoot {
    /// What: Describe the root under `build_dir` and read its marker.
    ///
    /// Inputs:
    /// - `build_dir`: Scratch directory.
    /// - `base_packages`: Packages every build root must contain.
    #[must_use]
    pub fn new(build_dir: &Path, base_packages: &[String]) -> Self {
        let chroot_wd = build_dir.join("chroot");
        let path = chroot_wd.join("root");
        let provisioned = std::fs::read_to_string(chroot_wd.join(ROOT_MARKER))
            .ok()
            .and_then(|text| match serde_json::from_str::<RootMarker>(&text) {
                Ok(m) => Some(m.base_packages),
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable build root marker; reprovisioning");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            chroot_wd,
            path,
            base_packages: base_packages.iter().cloned().collect(),
            provisioned,
            installed_deps: BTreeSet::new(),
            ready: false,
        }
    }

    /// Directory passed to `makechrootpkg -r`.
    #[must_use]
    pub fn chroot_wd(&self) -> &Path {
        &self.chroot_wd
    }

    /// The root itself.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once [`BuildRoot::prepare`] succeeded in this run.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Dependencies installed into the root during this run.
    #[must_use]
    pub const fn installed_deps(&self) -> &BTreeSet<String> {
        &self.installed_deps
    }

    fn nspawn(&self, args: &[&str]) -> Vec<String> {
        let root = self.path.display().to_string();
        let mut cmd = argv(&["arch-nspawn", root.as_str()]);
        cmd.extend(args.iter().map(ToString::to_string));
        cmd
    }

    fn root_err(&self, message: impl Into<String>) -> BuildError {
        BuildError::Root {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    /// What: Create the root, or bring an existing one up to date.
    ///
    /// # Errors
    /// - `BuildError::Root` when creation, upgrade or base package installation fails.
    ///
    /// Details:
    /// - Creation runs `mkarchroot` without `GNUPGHOME` so the root gets its own keyring.
    /// - An existing root is upgraded and receives base packages added since it was provisioned.
    pub fn prepare<R: CommandRunner + ?Sized>(&mut self, runner: &R) -> Result<(), BuildError> {
        if self.ready {
            return Ok(());
        }
        if self.path.is_dir() {
            tracing::info!(root = %self.path.display(), "reusing build root");
            runner
                .run_checked(&self.nspawn(&["pacman", "-Syu", "--noconfirm"]), &RunOptions::new().pty(true))
                .map_err(|e| self.root_err(e.to_string()))?;
            let missing: Vec<&str> = self
                .base_packages
                .difference(&self.provisioned)
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                let mut args = vec!["pacman", "-S", "--needed", "--noconfirm"];
                args.extend(missing);
                runner
                    .run_checked(&self.nspawn(&args), &RunOptions::new().pty(true))
                    .map_err(|e| self.root_err(e.to_string()))?;
            }
        } else {
            tracing::info!(root = %self.path.display(), "creating build root");
            std::fs::create_dir_all(&self.chroot_wd).map_err(|e| self.root_err(e.to_string()))?;
            let root = self.path.display().to_string();
            let mut cmd = argv(&["mkarchroot", root.as_str()]);
            cmd.extend(self.base_packages.iter().cloned());
            runner
                .run_checked(&cmd, &RunOptions::new().without_env("GNUPGHOME").pty(true))
                .map_err(|e| self.root_err(e.to_string()))?;
        }
        self.provisioned.clone_from(&self.base_packages);
        self.ready = true;
        Ok(())
    }

    /// What: Install dependencies into the root, skipping ones already installed this run.
    ///
    /// Inputs:
    /// - `deps`: Real package names.
    ///
    /// # Errors
    /// - The pacman failure rendered as a message.
    pub fn install_deps<R: CommandRunner + ?Sized>(
        &mut self,
        runner: &R,
        deps: &BTreeSet<String>,
    ) -> Result<(), String> {
        let pending: Vec<&str> = deps
            .iter()
            .filter(|d| !self.installed_deps.contains(*d) && !self.provisioned.contains(*d))
            .map(String::as_str)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let mut args = vec!["pacman", "-S", "--needed", "--noconfirm", "--asdeps"];
        args.extend(pending.iter().copied());
        runner
            .run_checked(&self.nspawn(&args), &RunOptions::new().pty(true))
            .map_err(|e| e.to_string())?;
        self.installed_deps
            .extend(pending.into_iter().map(ToString::to_string));
        Ok(())
    }

    /// What: Name of the package that satisfies `dep` according to the root's own databases.
    ///
    /// Output:
    /// - `None` when the root's pacman cannot resolve it.
    pub fn resolve_real_name<R: CommandRunner + ?Sized>(&self, runner: &R, dep: &str) -> Option<String> {
        let cmd = self.nspawn(&["pacman", "-Sddp", "--print-format=%n", dep]);
        match runner.run(&cmd, &RunOptions::new()) {
            Ok(out) if out.success() => out
                .stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(ToString::to_string),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(dependency = %dep, error = %e, "could not resolve dependency inside build root");
                None
            }
        }
    }

    /// What: Remove every dependency installed during this run.
    ///
    /// # Errors
    /// - The pacman failure rendered as a message; the tracked set is kept.
    pub fn remove_installed_deps<R: CommandRunner + ?Sized>(&mut self, runner: &R) -> Result<(), String> {
        if self.installed_deps.is_empty() {
            return Ok(());
        }
        let mut args = vec!["pacman", "-Rsu", "--noconfirm"];
        args.extend(self.installed_deps.iter().map(String::as_str));
        let cmd = self.nspawn(&args);
        runner
            .run_checked(&cmd, &RunOptions::new().pty(true))
            .map_err(|e| e.to_string())?;
        self.installed_deps.clear();
        Ok(())
    }

    /// What: Persist the marker.
    ///
    /// # Errors
    /// - I/O or serialization failure.
    pub fn save_marker(&self) -> std::io::Result<()> {
        let marker = RootMarker {
            base_packages: self.provisioned.clone(),
        };
        let text = serde_json::to_string_pretty(&marker).map_err(std::io::Error::other)?;
        std::fs::create_dir_all(&self.chroot_wd)?;
        std::fs::write(self.chroot_wd.join(ROOT_MARKER), text)
    }
}
