//! Error taxonomy shared by the reconciliation core.
//!
//! Each concern owns one enum so callers can decide how far a failure
//! propagates: per-package failures are recorded and skipped, failures that
//! touch shared mutable state abort the remainder of their step.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the command execution primitive itself.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The executable could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that was being started.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The requested user does not exist in the passwd database.
    #[error("user '{0}' does not exist")]
    UserNotFound(String),
    /// Setting up a pseudo-terminal failed.
    #[error("pseudo-terminal error: {0}")]
    Pty(String),
    /// The command ran but exited unsuccessfully while success was required.
    #[error("command '{command}' exited with {}", exit_label(.exit_code))]
    Failed {
        /// Shell-like rendering of the argv.
        command: String,
        /// Exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Combined output retained for diagnostics.
        output: String,
    },
    /// An empty argv was passed to the runner.
    #[error("empty command")]
    Empty,
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
}

/// Installed-state query could not be executed or parsed (QueryFailure).
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query command could not be run.
    #[error("query '{query}' could not run: {source}")]
    Command {
        /// Short label of the query.
        query: String,
        /// Underlying runner error.
        #[source]
        source: CommandError,
    },
    /// The query exited non-zero with diagnostics on stderr.
    #[error("query '{query}' exited with {exit_code:?}: {stderr}")]
    NonZero {
        /// Short label of the query.
        query: String,
        /// Exit code reported by the tool.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Metadata for one foreign package could not be resolved (ResolutionFailure).
#[derive(Clone, Debug, Error)]
pub enum ResolveError {
    /// The AUR RPC request failed, timed out or returned an invalid payload.
    #[error("AUR RPC request to '{url}' failed: {message}")]
    Rpc {
        /// Requested URL.
        url: String,
        /// Human readable reason.
        message: String,
    },
    /// The package is unknown to the AUR and to the custom sources.
    #[error("'{0}' was not found in the AUR or in custom packages")]
    NotFound(String),
    /// A custom recipe could not be turned into metadata.
    #[error("failed to parse build recipe from '{source_location}': {message}")]
    Recipe {
        /// Git URL or directory of the recipe.
        source_location: String,
        /// Human readable reason.
        message: String,
    },
    /// Foreign packages depend on each other in a loop.
    #[error(
        "foreign package dependency cycle involving '{0}' and '{1}'; build dependencies cannot be cyclic"
    )]
    DependencyCycle(String, String),
    /// A dependency has no resolvable provider, or its provider failed.
    #[error("dependency '{dependency}' of '{package}' cannot be satisfied")]
    Unsatisfiable {
        /// Package that declared the dependency.
        package: String,
        /// Dependency string as declared.
        dependency: String,
    },
}

/// One package base failed to build (BuildFailure).
#[derive(Debug, Error)]
pub enum BuildError {
    /// The shared build root could not be created or prepared.
    #[error("build root at '{path}' is unusable: {message}")]
    Root {
        /// Root directory.
        path: PathBuf,
        /// Human readable reason.
        message: String,
    },
    /// Cloning, pulling or copying the recipe failed.
    #[error("failed to fetch sources for '{base}': {message}")]
    Sources {
        /// Package base.
        base: String,
        /// Human readable reason.
        message: String,
    },
    /// Installing build dependencies into the root failed.
    #[error("failed to install build dependencies for '{base}': {message}")]
    Dependencies {
        /// Package base.
        base: String,
        /// Human readable reason.
        message: String,
    },
    /// The build command exited unsuccessfully.
    #[error("build of '{base}' failed with exit code {exit_code:?}")]
    Build {
        /// Package base.
        base: String,
        /// Exit code of the build command.
        exit_code: Option<i32>,
        /// Captured build output.
        output: String,
    },
    /// The produced artifact could not be identified.
    #[error("could not determine the package file for '{name}'; candidates: {candidates:?}")]
    Artifact {
        /// Package name.
        name: String,
        /// Files that matched partially.
        candidates: Vec<PathBuf>,
    },
    /// A base this one depends on failed earlier in the run.
    #[error("skipped '{base}' because dependency base '{dependency}' failed")]
    DependencyFailed {
        /// Package base that was skipped.
        base: String,
        /// Failed base it depended on.
        dependency: String,
    },
    /// Local filesystem error inside the build directory.
    #[error("I/O error while building '{base}': {source}")]
    Io {
        /// Package base.
        base: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A package-manager mutation returned non-zero (InstallFailure).
#[derive(Debug, Error)]
#[error("{operation} failed for [{}]: {source}", .packages.join(", "))]
pub struct InstallError {
    /// Operation label, e.g. "install" or "remove".
    pub operation: String,
    /// Packages involved in the failed batch.
    pub packages: Vec<String>,
    /// Underlying command error.
    #[source]
    pub source: CommandError,
}

/// The artifact cache could not complete a store or eviction (CacheIOFailure).
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error on a cache path.
    #[error("cache I/O error on '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The cache index could not be serialized.
    #[error("cache index error: {0}")]
    Index(#[from] serde_json::Error),
}

/// Input contract violations detected by the planner.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Names wanted both as native and as foreign packages.
    #[error("packages declared both as native and foreign: {}", .0.join(", "))]
    OriginConflict(Vec<String>),
    /// Names that are wanted and ignored for the same origin.
    #[error("packages declared both as wanted and ignored ({origin}): {}", .names.join(", "))]
    IgnoredAndWanted {
        /// "native" or "foreign".
        origin: &'static str,
        /// Offending names.
        names: Vec<String>,
    },
}

/// Persistent key-value store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the store file failed.
    #[error("store I/O error on '{path}': {source}")]
    Io {
        /// Store path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The store content is not valid JSON or has an unexpected shape.
    #[error("store content is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration and desired-state loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The desired-state file is not valid TOML for the expected schema.
    #[error("invalid desired-state file '{path}': {source}")]
    Toml {
        /// File path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
    /// A custom package entry is malformed.
    #[error("custom package '{0}' must set exactly one of 'git' or 'dir'")]
    CustomSource(String),
}
