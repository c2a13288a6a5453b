//! Test doubles shared by unit and integration tests.
//!
//! [`ScriptedRunner`] answers commands from prefix rules and records every
//! call; [`FakeAur`] serves descriptors from memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::{CommandOutput, CommandRunner, RunOptions, display_command};
use crate::error::{CommandError, ResolveError};
use crate::sources::aur::AurLookup;
use crate::sources::descriptor::{ForeignPackageDescriptor, SourceLocation};

type Handler = Arc<dyn Fn(&[String], &RunOptions) -> CommandOutput + Send + Sync>;

#[derive(Clone)]
enum Response {
    Output(CommandOutput),
    Dynamic(Handler),
}

/// One recorded invocation.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// Rendered command line.
    pub command: String,
    /// Options the command was run with.
    pub opts: RunOptions,
}

#[derive(Default)]
struct Inner {
    rules: Vec<(String, Response)>,
    calls: Vec<RecordedCall>,
}

/// What: In-memory [`CommandRunner`] driven by prefix rules.
///
/// Details:
/// - A rule matches when the rendered command starts with its pattern; the
///   longest matching pattern wins, later rules win ties.
/// - Commands without a matching rule succeed with empty output.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedRunner {
    /// Runner with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(self, pattern: &str, response: Response) -> Self {
        self.lock().rules.push((pattern.to_string(), response));
        self
    }

    /// Answer commands starting with `pattern` with exit 0 and `stdout`.
    #[must_use]
    pub fn on_ok(self, pattern: &str, stdout: &str) -> Self {
        self.push(pattern, Response::Output(CommandOutput::ok(stdout)))
    }

    /// Answer commands starting with `pattern` with a failing exit.
    #[must_use]
    pub fn on_fail(self, pattern: &str, code: i32, stderr: &str) -> Self {
        self.push(pattern, Response::Output(CommandOutput::failed(code, stderr)))
    }

    /// Answer commands starting with `pattern` by calling `handler`.
    #[must_use]
    pub fn on<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&[String], &RunOptions) -> CommandOutput + Send + Sync + 'static,
    {
        self.push(pattern, Response::Dynamic(Arc::new(handler)))
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Rendered commands starting with `prefix`.
    #[must_use]
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.command.starts_with(prefix))
            .map(|c| c.command.clone())
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError> {
        if argv.is_empty() {
            return Err(CommandError::Empty);
        }
        let command = display_command(argv);
        let response = {
            let mut inner = self.lock();
            inner.calls.push(RecordedCall {
                command: command.clone(),
                opts: opts.clone(),
            });
            inner
                .rules
                .iter()
                .filter(|(p, _)| command.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len())
                .map(|(_, r)| r.clone())
        };
        Ok(match response {
            Some(Response::Output(out)) => out,
            Some(Response::Dynamic(handler)) => handler(argv, opts),
            None => CommandOutput::ok(""),
        })
    }
}

/// What: In-memory [`AurLookup`].
///
/// Details:
/// - `info` fails as a whole when any requested name is marked failing,
///   mirroring one bad HTTP request.
#[derive(Clone, Default)]
pub struct FakeAur {
    packages: BTreeMap<String, ForeignPackageDescriptor>,
    providers: BTreeMap<String, Vec<String>>,
    failing: BTreeSet<String>,
}

impl FakeAur {
    /// Empty AUR.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a descriptor.
    #[must_use]
    pub fn with(mut self, desc: ForeignPackageDescriptor) -> Self {
        for p in &desc.provides {
            let bare = crate::index::query::strip_dependency(p).to_string();
            self.providers.entry(bare).or_default().push(desc.name.clone());
        }
        self.packages.insert(desc.name.clone(), desc);
        self
    }

    /// Make lookups of `name` fail with an RPC error.
    #[must_use]
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

impl AurLookup for FakeAur {
    fn info(&self, names: &[String]) -> Result<Vec<ForeignPackageDescriptor>, ResolveError> {
        if let Some(bad) = names.iter().find(|n| self.failing.contains(*n)) {
            return Err(ResolveError::Rpc {
                url: format!("fake://info/{bad}"),
                message: "operation timed out".to_string(),
            });
        }
        Ok(names
            .iter()
            .filter_map(|n| self.packages.get(n).cloned())
            .collect())
    }

    fn search_provides(&self, dep: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self.providers.get(dep).cloned().unwrap_or_default())
    }
}

/// What: Name of the account running the tests.
///
/// Details:
/// - Used as the build user so ownership changes succeed when tests run as root.
#[must_use]
pub fn current_user() -> String {
    #[cfg(unix)]
    {
        nix::unistd::User::from_uid(nix::unistd::geteuid())
            .ok()
            .flatten()
            .map_or_else(|| "root".to_string(), |u| u.name)
    }
    #[cfg(not(unix))]
    {
        "builder".to_string()
    }
}

/// What: Build an AUR descriptor for tests.
///
/// Inputs:
/// - `name`: Package and base name.
/// - `version`: Full version string.
/// - `depends`: Runtime dependencies.
#[must_use]
pub fn aur_pkg(name: &str, version: &str, depends: &[&str]) -> ForeignPackageDescriptor {
    ForeignPackageDescriptor {
        name: name.to_string(),
        base: name.to_string(),
        version: version.to_string(),
        runtime_deps: depends.iter().map(ToString::to_string).collect(),
        build_deps: BTreeSet::new(),
        check_deps: BTreeSet::new(),
        provides: BTreeSet::new(),
        source: SourceLocation::aur(name),
    }
}
