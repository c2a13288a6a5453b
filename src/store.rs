//! Cross-run key-value bookkeeping persisted as a single JSON object.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Key holding each module's native package set.
pub const PACKAGES_FOR_MODULE: &str = "packages_for_module";
/// Key holding each module's AUR package set.
pub const AUR_PACKAGES_FOR_MODULE: &str = "aur_packages_for_module";
/// Key holding each module's custom package set.
pub const CUSTOM_PACKAGES_FOR_MODULE: &str = "custom_packages_for_module";
/// Key mapping package base to the last built git revision.
pub const DEVEL_REVISIONS: &str = "devel_revisions";

/// JSON-backed store.
#[derive(Debug, Default)]
pub struct Store {
    path: Option<PathBuf>,
    data: Map<String, Value>,
}

impl Store {
    /// What: Load the store from `path`.
    ///
    /// Inputs:
    /// - `path`: Store file; a missing file yields an empty store.
    ///
    /// Output:
    /// - Store bound to `path`.
    ///
    /// # Errors
    /// - `StoreError::Io` when the file exists but cannot be read.
    /// - `StoreError::Json` when it is not a JSON object.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "[Store] no store file yet");
                Map::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path: Some(path),
            data,
        })
    }

    /// Store that lives only in memory; `save` is a no-op.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File the store is saved to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// What: Read and deserialize a value.
    ///
    /// Output:
    /// - `None` when the key is absent or holds a value of another shape.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.data.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "[Store] ignoring value with unexpected shape");
                None
            }
        }
    }

    /// What: Serialize and set a value.
    ///
    /// # Errors
    /// - `StoreError::Json` when `value` cannot be represented as JSON.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// What: Write the store atomically.
    ///
    /// # Errors
    /// - `StoreError` when the temporary file cannot be written or renamed.
    ///
    /// Details:
    /// - Writes a sibling temporary file and renames it over the target.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_err)?;
        let json = serde_json::to_vec_pretty(&self.data)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        tracing::debug!(path = %path.display(), bytes = json.len(), "[Store] saved");
        Ok(())
    }
}
