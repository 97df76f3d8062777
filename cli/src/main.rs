//! klog-ls binary: stdio transport and logging bootstrap.
//!
//! The editor host talks to the server over stdin/stdout, so logs must
//! never touch either stream: tracing writes to a file when one can be
//! opened and is otherwise disabled entirely.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use klog_ls_server::Session;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No usable log file: prefer "no logs" over corrupting the protocol
    // stream.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: the platform data dir, e.g. ~/.local/share/klog-ls/logs/.
    if let Some(data_dir) = dirs::data_local_dir() {
        candidates.push(data_dir.join("klog-ls").join("logs").join("klog-ls.log"));
    }

    // Fallback: a relative path, useful in constrained environments.
    candidates.push(PathBuf::from(".klog-ls").join("logs").join("klog-ls.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "klog-ls starting");

    let result = Session::run(tokio::io::stdin(), tokio::io::stdout()).await;

    match &result {
        Ok(()) => tracing::info!("session ended"),
        Err(e) => tracing::error!("session ended with error: {e:#}"),
    }
    result
}
