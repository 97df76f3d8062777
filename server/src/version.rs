//! One-off validator version compatibility check.
//!
//! Runs `<executable> version` the first time an executable path is used and
//! compares the reported version against this platform's minimum. Purely
//! advisory: the outcome is logged, never blocks a validation cycle.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use klog_ls_types::KlogVersion;
use tokio::process::Command;

const VERSION_TIMEOUT_SECS: u64 = 5;

pub(crate) async fn check_compatibility(executable: PathBuf) {
    let output = match query(&executable).await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(executable = %executable.display(), error = %e, "version query failed");
            return;
        }
    };

    match KlogVersion::parse(&output) {
        None => tracing::warn!(
            executable = %executable.display(),
            "could not determine klog version; continuing anyway"
        ),
        Some(version) if !version.is_supported() => tracing::warn!(
            %version,
            minimum = %KlogVersion::minimum_supported(),
            "klog executable is older than the minimum supported version"
        ),
        Some(version) => tracing::debug!(%version, "klog version check passed"),
    }
}

async fn query(executable: &Path) -> io::Result<String> {
    let run = Command::new(executable)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(VERSION_TIMEOUT_SECS), run).await {
        Ok(result) => result.map(|output| String::from_utf8_lossy(&output.stdout).into_owned()),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "version query timed out",
        )),
    }
}
