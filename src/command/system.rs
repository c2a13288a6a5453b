//! Process-backed [`CommandRunner`] used outside of tests.

use std::io::{Read, Write};
use std::process::{Command, Stdio};

use super::{CommandOutput, CommandRunner, RunOptions, display_command};
use crate::error::CommandError;

/// Runs commands as real child processes.
///
/// Locale is forced to `C` so the line-oriented parsers see stable output.
/// Pty mode mirrors the child's output to our stdout while capturing it.
#[derive(Clone, Debug, Default)]
pub struct SystemRunner {
    /// Echo pty output to stdout while it is captured.
    pub echo_pty: bool,
}

impl SystemRunner {
    /// What: Create a runner.
    ///
    /// Inputs:
    /// - `echo_pty`: Whether pty-attached commands stream their output to the terminal.
    ///
    /// Output:
    /// - A `SystemRunner`.
    #[must_use]
    pub const fn new(echo_pty: bool) -> Self {
        Self { echo_pty }
    }

    fn run_piped(argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .env("LC_ALL", "C")
            .env("LANG", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in &opts.env_remove {
            cmd.env_remove(key);
        }
        cmd.envs(&opts.env_overrides);
        if let Some(dir) = &opts.cwd {
            cmd.current_dir(dir);
        }
        if let Some(user) = &opts.as_user {
            switch_user(&mut cmd, user)?;
        }

        let out = cmd.output().map_err(|source| CommandError::Spawn {
            program: argv[0].clone(),
            source,
        })?;
        let exit_code = out.status.code();
        if exit_code.is_none() {
            tracing::warn!(command = %display_command(argv), "command terminated by a signal");
        }
        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    fn run_pty(&self, argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError> {
        use portable_pty::{CommandBuilder, PtySize, native_pty_system};

        // portable-pty cannot change credentials itself
        let full: Vec<String> = match &opts.as_user {
            Some(user) => ["runuser", "-u", user.as_str(), "--"]
                .iter()
                .map(ToString::to_string)
                .chain(argv.iter().cloned())
                .collect(),
            None => argv.to_vec(),
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 120,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CommandError::Pty(e.to_string()))?;

        let mut builder = CommandBuilder::new(&full[0]);
        builder.args(&full[1..]);
        builder.env("LC_ALL", "C");
        for key in &opts.env_remove {
            builder.env_remove(key);
        }
        for (key, value) in &opts.env_overrides {
            builder.env(key, value);
        }
        if let Some(dir) = &opts.cwd {
            builder.cwd(dir);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| CommandError::Spawn {
                program: full[0].clone(),
                source: std::io::Error::other(e.to_string()),
            })?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CommandError::Pty(e.to_string()))?;
        let mut captured = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    captured.extend_from_slice(&buf[..n]);
                    if self.echo_pty {
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                // Linux reports a closed pty as EIO
                Err(_) => break,
            }
        }

        let status = child
            .wait()
            .map_err(|e| CommandError::Pty(e.to_string()))?;
        let exit_code = if status.signal().is_some() {
            tracing::warn!(command = %display_command(argv), "pty command terminated by a signal");
            None
        } else {
            i32::try_from(status.exit_code()).ok()
        };
        let text = strip_ansi_escapes::strip_str(String::from_utf8_lossy(&captured));
        Ok(CommandOutput {
            exit_code,
            stdout: text.replace("\r\n", "\n"),
            stderr: String::new(),
        })
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], opts: &RunOptions) -> Result<CommandOutput, CommandError> {
        if argv.is_empty() {
            return Err(CommandError::Empty);
        }
        tracing::debug!(
            command = %display_command(argv),
            user = ?opts.as_user,
            cwd = ?opts.cwd,
            pty = opts.pty,
            "running command"
        );
        if opts.pty {
            self.run_pty(argv, opts)
        } else {
            Self::run_piped(argv, opts)
        }
    }
}

/// What: Configure `cmd` to run with the credentials of `user`.
///
/// Inputs:
/// - `cmd`: Command being prepared.
/// - `user`: Login name from the passwd database.
///
/// Output:
/// - Sets uid, gid, `HOME`, `USER` and `LOGNAME` on the command.
///
/// # Errors
/// - `CommandError::UserNotFound` when the user does not exist.
#[cfg(unix)]
fn switch_user(cmd: &mut Command, user: &str) -> Result<(), CommandError> {
    use std::os::unix::process::CommandExt;

    let entry = nix::unistd::User::from_name(user)
        .map_err(|errno| CommandError::Spawn {
            program: "getpwnam".to_string(),
            source: std::io::Error::from(errno),
        })?
        .ok_or_else(|| CommandError::UserNotFound(user.to_string()))?;
    cmd.uid(entry.uid.as_raw())
        .gid(entry.gid.as_raw())
        .env("HOME", &entry.dir)
        .env("USER", user)
        .env("LOGNAME", user);
    Ok(())
}

#[cfg(not(unix))]
fn switch_user(_cmd: &mut Command, user: &str) -> Result<(), CommandError> {
    Err(CommandError::UserNotFound(user.to_string()))
}
