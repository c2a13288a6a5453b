//! Bounded on-disk cache of built foreign package files.
//!
//! Artifacts live in one directory next to a small JSON index. Each package
//! name keeps at most `keep` files, chosen as the newest by version ordering.
//! A file stored by the current call is never the one evicted.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::logic::version::compare_versions;

/// File name of the cache index inside the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Suffixes makepkg may produce for a package file.
pub const PACKAGE_EXTENSIONS: &[&str] = &[
    ".pkg.tar",
    ".pkg.tar.gz",
    ".pkg.tar.bz2",
    ".pkg.tar.xz",
    ".pkg.tar.zst",
    ".pkg.tar.lzo",
    ".pkg.tar.lrz",
    ".pkg.tar.lz4",
    ".pkg.tar.lz",
    ".pkg.tar.Z",
];

/// What: Find the package extension of a file name.
///
/// Inputs:
/// - `file_name`: Bare file name, e.g. `foo-1.0-1-x86_64.pkg.tar.zst`.
///
/// Output:
/// - The longest matching entry of [`PACKAGE_EXTENSIONS`], or `None`.
#[must_use]
pub fn package_extension(file_name: &str) -> Option<&'static str> {
    PACKAGE_EXTENSIONS
        .iter()
        .filter(|ext| file_name.ends_with(*ext))
        .max_by_key(|ext| ext.len())
        .copied()
}

/// One cached artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Package name the artifact installs.
    pub package_name: String,
    /// Full version of the artifact.
    pub version: String,
    /// Location of the file inside the cache directory.
    pub artifact_path: PathBuf,
    /// Monotonic creation order, used to break version ties.
    pub seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    next_seq: u64,
    entries: BTreeMap<String, Vec<CacheEntry>>,
}

/// Filesystem-backed artifact cache.
#[derive(Debug)]
pub struct PackageCache {
    dir: PathBuf,
    keep: usize,
    index: CacheIndex,
}

impl PackageCache {
    /// What: Open (and create if needed) a cache directory.
    ///
    /// Inputs:
    /// - `dir`: Cache directory.
    /// - `keep`: Number of versions retained per package name; `0` is treated as `1`.
    ///
    /// Output:
    /// - Cache with the index loaded from disk; an unreadable index starts empty.
    ///
    /// Details:
    /// - Every name is pruned on open, retrying deletions that failed earlier
    ///   and applying a lowered `keep`.
    ///
    /// # Errors
    /// - `CacheError::Io` when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, keep: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        let index = Self::load_index(&dir.join(INDEX_FILE));
        let mut cache = Self {
            dir,
            keep: keep.max(1),
            index,
        };
        let names: Vec<String> = cache.index.entries.keys().cloned().collect();
        for name in names {
            if let Err(e) = cache.prune(&name) {
                tracing::warn!(package = %name, error = %e, "failed to prune package cache");
            }
        }
        Ok(cache)
    }

    /// What: Open a cache for reading only, without creating anything on disk.
    ///
    /// Details:
    /// - Used by dry runs; a missing directory yields an empty cache.
    #[must_use]
    pub fn open_read_only(dir: impl Into<PathBuf>, keep: usize) -> Self {
        let dir = dir.into();
        let index = Self::load_index(&dir.join(INDEX_FILE));
        Self {
            dir,
            keep: keep.max(1),
            index,
        }
    }

    fn load_index(path: &Path) -> CacheIndex {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "cache index is corrupt; starting empty");
                CacheIndex::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cache index unreadable; starting empty");
                CacheIndex::default()
            }
        }
    }

    /// What: Copy a built artifact into the cache and prune older versions.
    ///
    /// Inputs:
    /// - `name`: Package name.
    /// - `version`: Full package version.
    /// - `artifact`: Freshly built file.
    ///
    /// Output:
    /// - Path of the cached file. When the same name and version is already cached
    ///   and its file exists, the new file is skipped and the existing path returned.
    ///
    /// # Errors
    /// - `CacheError` when the copy or the index write fails. Pruning failures
    ///   are logged only.
    pub fn store(&mut self, name: &str, version: &str, artifact: &Path) -> Result<PathBuf, CacheError> {
        if let Some(existing) = self.lookup(name, version) {
            tracing::debug!(
                package = %name,
                version = %version,
                path = %existing.display(),
                "version already cached; skipping"
            );
            return Ok(existing);
        }

        let ext = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(package_extension)
            .unwrap_or(".pkg.tar.zst");
        let dest = self.dir.join(format!("{name}-{version}{ext}"));
        fs::copy(artifact, &dest).map_err(|source| CacheError::Io {
            path: dest.clone(),
            source,
        })?;

        let seq = self.index.next_seq;
        self.index.next_seq += 1;
        let entries = self.index.entries.entry(name.to_string()).or_default();
        // drop a stale record whose file vanished
        entries.retain(|e| e.version != version);
        entries.push(CacheEntry {
            package_name: name.to_string(),
            version: version.to_string(),
            artifact_path: dest.clone(),
            seq,
        });
        self.save()?;
        tracing::info!(package = %name, version = %version, path = %dest.display(), "cached package");

        if let Err(e) = self.evict(name, Some(seq)) {
            tracing::warn!(package = %name, error = %e, "failed to prune package cache");
        }
        Ok(dest)
    }

    /// What: Delete every entry of `name` beyond the newest `keep` versions.
    ///
    /// Output:
    /// - Paths that were removed.
    ///
    /// # Errors
    /// - `CacheError` when the index cannot be written afterwards.
    ///
    /// Details:
    /// - Entries are ordered by version, newest first, and by creation order on ties.
    /// - A file that cannot be deleted keeps its entry so the next run retries.
    pub fn prune(&mut self, name: &str) -> Result<Vec<PathBuf>, CacheError> {
        self.evict(name, None)
    }

    /// Prune `name`, never evicting the entry created with sequence `protect`.
    fn evict(&mut self, name: &str, protect: Option<u64>) -> Result<Vec<PathBuf>, CacheError> {
        let Some(entries) = self.index.entries.get_mut(name) else {
            return Ok(Vec::new());
        };
        if entries.len() <= self.keep {
            return Ok(Vec::new());
        }

        entries.sort_by(|a, b| {
            compare_versions(&b.version, &a.version).then_with(|| b.seq.cmp(&a.seq))
        });
        // an older version stored just now is about to be installed
        if let Some(pos) = entries.iter().position(|e| Some(e.seq) == protect)
            && pos >= self.keep
        {
            let fresh = entries.remove(pos);
            entries.insert(self.keep - 1, fresh);
        }
        let excess = entries.split_off(self.keep);
        let mut removed = Vec::new();
        for entry in excess {
            match fs::remove_file(&entry.artifact_path) {
                Ok(()) => removed.push(entry.artifact_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    removed.push(entry.artifact_path);
                }
                Err(e) => {
                    tracing::warn!(
                        package = %name,
                        path = %entry.artifact_path.display(),
                        error = %e,
                        "could not remove old cached package; remove it manually"
                    );
                    entries.push(entry);
                }
            }
        }
        for path in &removed {
            tracing::debug!(package = %name, path = %path.display(), "evicted cached package");
        }
        self.save()?;
        Ok(removed)
    }

    /// What: Find the cached file for an exact version.
    ///
    /// Output:
    /// - The path when an entry exists and its file is still on disk.
    #[must_use]
    pub fn lookup(&self, name: &str, version: &str) -> Option<PathBuf> {
        self.index
            .entries
            .get(name)?
            .iter()
            .filter(|e| e.version == version)
            .map(|e| e.artifact_path.clone())
            .find(|p| p.is_file())
    }

    fn save(&self) -> Result<(), CacheError> {
        let path = self.dir.join(INDEX_FILE);
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.index)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
