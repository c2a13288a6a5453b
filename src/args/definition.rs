//! Command-line argument definition.

use std::path::PathBuf;

use clap::Parser;

/// decman - declarative package management for Arch Linux
#[derive(Parser, Debug)]
#[command(name = "decman")]
#[command(version)]
#[command(about = "Bring installed packages in line with a declared package set", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Args {
    /// Print what would change without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Rebuild VCS packages (-git, -hg, ...) even when their version did not change
    #[arg(long)]
    pub upgrade_devel: bool,

    /// Rebuild foreign packages even when the wanted version is cached
    #[arg(long)]
    pub force: bool,

    /// Configuration directory (default: $XDG_CONFIG_HOME/decman, then /etc/decman)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Desired-state file (default: <config>/packages.toml)
    #[arg(long)]
    pub packages: Option<PathBuf>,

    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output (equivalent to --log-level debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not stream pacman and build output to the terminal
    #[arg(short, long)]
    pub quiet: bool,

    /// Run only these plugins (comma-separated or space-separated)
    #[arg(long, num_args = 1..)]
    pub only: Vec<String>,
}
