//! Decoding raw validator output into a typed report.
//!
//! The decode is total: anything the subprocess prints that is not exactly
//! one arm of the report schema becomes an [`InterpretError`] value, which
//! the orchestrator renders as a single synthetic diagnostic. Nothing here
//! can take the session down.

use klog_ls_types::ValidatorReport;

#[derive(Debug, thiserror::Error)]
#[error("could not parse validator output")]
pub(crate) struct InterpretError(#[source] serde_json::Error);

pub(crate) fn interpret(raw: &str) -> Result<ValidatorReport, InterpretError> {
    serde_json::from_str(raw).map_err(InterpretError)
}
