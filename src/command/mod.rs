//! External command execution primitive.
//!
//! Everything that touches the live system goes through [`CommandRunner`], so
//! the reconciliation core can be driven by a scripted runner in tests and
//! by [`system::SystemRunner`] in production.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::CommandError;

pub mod system;

pub use system::SystemRunner;

/// Options for a single command invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run the command as this user instead of the current one.
    pub as_user: Option<String>,
    /// Environment variables set or replaced for the child.
    pub env_overrides: BTreeMap<String, String>,
    /// Environment variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    /// Working directory of the child.
    pub cwd: Option<PathBuf>,
    /// Attach the child to a pseudo-terminal.
    pub pty: bool,
}

impl RunOptions {
    /// What: Start from default options.
    ///
    /// Output:
    /// - Options running as the current user, in the current directory, without a pty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run as `user`.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.as_user = Some(user.into());
        self
    }

    /// Run inside `dir`.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Attach to a pseudo-terminal when `pty` is true.
    #[must_use]
    pub const fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    /// Remove `key` from the child's environment.
    #[must_use]
    pub fn without_env(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }
}

/// Captured result of a finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output (pty output when run in a pty).
    pub stdout: String,
    /// Captured standard error (empty when run in a pty).
    pub stderr: String,
}

impl CommandOutput {
    /// What: Build a successful output with the given stdout.
    ///
    /// Inputs:
    /// - `stdout`: Text the command printed.
    ///
    /// Output:
    /// - `CommandOutput` with exit code 0 and empty stderr.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// What: Build a failed output.
    ///
    /// Inputs:
    /// - `code`: Exit code to report.
    /// - `stderr`: Diagnostic text.
    ///
    /// Output:
    /// - `CommandOutput` with empty stdout.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True when the process exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// What: Convert a non-zero exit into [`CommandError::Failed`].
    ///
    /// Inputs:
    /// - `argv`: The command that produced this output, for the error message.
    ///
    /// Output:
    /// - `Ok(self)` on success; `Err` carrying stdout and stderr otherwise.
    ///
    /// # Errors
    /// - Returns `CommandError::Failed` when the exit code is not 0.
    pub fn check(self, argv: &[String]) -> Result<Self, CommandError> {
        if self.success() {
            return Ok(self);
        }
        let mut output = self.stdout;
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        Err(CommandError::Failed {
            command: display_command(argv),
            exit_code: self.exit_code,
            output,
        })
    }
}

/// Runs external commands on behalf of the core.
pub trait CommandRunner {
    /// What: Run `argv` to completion and capture its output.
    ///
    /// Inputs:
    /// - `argv`: Program followed by its arguments.
    /// - `opts`: User, environment, working directory and pty options.
    ///
    /// Output:
    /// - Captured output; a non-zero exit is not an error at this level.
    ///
    /// # Errors
    /// - Returns `CommandError` when the process cannot be started at all.
    fn run(&self, argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError>;

    /// What: Run `argv` and require a zero exit code.
    ///
    /// # Errors
    /// - Returns `CommandError::Failed` on non-zero exit, or any spawn error.
    fn run_checked(&self, argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError> {
        self.run(argv, opts)?.check(argv)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError> {
        (**self).run(argv, opts)
    }
}

/// What: Render an argv the way a user would type it.
///
/// Inputs:
/// - `argv`: Program and arguments.
///
/// Output:
/// - Space separated string; arguments containing whitespace or quotes are single-quoted.
#[must_use]
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.is_empty() || a.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                format!("'{}'", a.replace('\'', "'\"'\"'"))
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// What: Build an owned argv from string slices.
///
/// Inputs:
/// - `parts`: Program and arguments.
///
/// Output:
/// - `Vec<String>` suitable for [`CommandRunner::run`].
#[must_use]
pub fn argv<S: AsRef<str>>(parts: &[S]) -> Vec<String> {
    parts.iter().map(|p| p.as_ref().to_string()).collect()
}
