//! decman binary entrypoint kept minimal. The run itself lives in `args::apply`.

mod args;

use std::fmt;
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::Parser;

struct DecmanTimer;

impl tracing_subscriber::fmt::time::FormatTime for DecmanTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let ts = chrono::Local::now().format("%Y-%m-%d-T %H:%M:%S").to_string();
        w.write_str(&ts)
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

/// Log to `<state dir>/logs/decman.log`, or to stderr when the file cannot be opened.
fn init_logging(level: &str) {
    let dir = decman::config::paths::logs_dir();
    let log_path = dir.join("decman.log");
    let file = std::fs::create_dir_all(&dir).and_then(|()| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
    });
    match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(level))
                .with_target(false)
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_timer(DecmanTimer)
                .init();
            let _ = LOG_GUARD.set(guard);
            tracing::info!(path = %log_path.display(), "logging initialized");
        }
        Err(e) => {
            // Fallback: stderr logger so the run still proceeds
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(level))
                .with_target(false)
                .with_ansi(true)
                .with_writer(std::io::stderr)
                .with_timer(DecmanTimer)
                .init();
            tracing::warn!(error = %e, "failed to open log file; using stderr");
        }
    }
}

fn main() -> ExitCode {
    let args = args::Args::parse();
    init_logging(&args::determine_log_level(&args));

    tracing::info!(dry_run = args.dry_run, "decman starting");
    let success = args::apply::handle_apply(&args);
    tracing::info!(success, "decman exited");
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
