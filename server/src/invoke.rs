//! Running the external validator over one document.
//!
//! One subprocess per invocation: spawn `<executable> json`, feed the whole
//! document to stdin exactly once, close the stream, and collect stdout to
//! EOF. Feeding and collecting run concurrently so a validator that starts
//! writing before it finishes reading cannot deadlock the pipes. The whole
//! exchange is bounded by a fixed ceiling; a validator that never closes its
//! output is killed and reported like a spawn failure.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

pub(crate) const VALIDATOR_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvokeError {
    #[error("failed to spawn validator: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("validator pipe error: {0}")]
    Pipe(#[source] std::io::Error),
    #[error("validator exposed no stdio pipes")]
    MissingPipe,
    #[error("validator did not finish within {VALIDATOR_TIMEOUT_SECS} seconds")]
    TimedOut,
}

/// Run the validator and return everything it wrote to stdout, concatenated
/// in arrival order. The exit status is deliberately ignored: the validator
/// exits non-zero for invalid documents while still printing a well-formed
/// report, so the output alone decides the outcome.
pub(crate) async fn invoke(executable: &Path, document_text: &str) -> Result<String, InvokeError> {
    let mut child = Command::new(executable)
        .arg("json")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(InvokeError::Spawn)?;

    let mut stdin = child.stdin.take().ok_or(InvokeError::MissingPipe)?;
    let mut stdout = child.stdout.take().ok_or(InvokeError::MissingPipe)?;

    let exchange = async {
        let feed = async {
            stdin.write_all(document_text.as_bytes()).await?;
            stdin.shutdown().await?;
            drop(stdin);
            Ok::<_, std::io::Error>(())
        };
        let collect = async {
            let mut raw = Vec::new();
            stdout.read_to_end(&mut raw).await?;
            Ok::<_, std::io::Error>(raw)
        };
        tokio::try_join!(feed, collect).map(|((), raw)| raw)
    };

    match tokio::time::timeout(Duration::from_secs(VALIDATOR_TIMEOUT_SECS), exchange).await {
        Ok(Ok(raw)) => {
            let _ = child.wait().await;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
        Ok(Err(e)) => {
            let _ = child.kill().await;
            Err(InvokeError::Pipe(e))
        }
        Err(_) => {
            let _ = child.kill().await;
            Err(InvokeError::TimedOut)
        }
    }
}
