//! Mapping validator errors onto LSP diagnostics.

use klog_ls_types::ValidationError;

use crate::protocol::{
    Diagnostic, DiagnosticRelatedInformation, Location, Position, Range, SEVERITY_ERROR,
};

pub(crate) const DIAGNOSTIC_SOURCE: &str = "klog";

/// Width of the sentinel range used for diagnostics that have no real
/// position (configuration problems, unreadable validator output).
const SENTINEL_SPAN: u32 = 99;

/// Convert one validator error into a diagnostic.
///
/// The validator reports 1-based line/column with a column-count length that
/// never crosses a line break; the diagnostic range is 0-based and
/// half-open. The error's `title` becomes the message; the longer `details`
/// text is attached as related information only when the client declared
/// that capability, and is dropped otherwise.
pub(crate) fn from_validation_error(
    error: &ValidationError,
    uri: &str,
    related_information: bool,
) -> Diagnostic {
    let line = error.line.saturating_sub(1);
    let column = error.column.saturating_sub(1);
    let range = Range::new(
        Position::new(line, column),
        Position::new(line, column + error.length),
    );

    let related_information = related_information.then(|| {
        vec![DiagnosticRelatedInformation {
            location: Location {
                uri: uri.to_string(),
                range,
            },
            message: error.details.clone(),
        }]
    });

    Diagnostic {
        range,
        severity: SEVERITY_ERROR,
        source: DIAGNOSTIC_SOURCE,
        message: error.title.clone(),
        related_information,
    }
}

/// A single diagnostic pinned to the top of the document, for cycle-level
/// failures that have no position of their own.
pub(crate) fn synthetic(message: String) -> Diagnostic {
    Diagnostic {
        range: Range::new(Position::new(0, 0), Position::new(0, SENTINEL_SPAN)),
        severity: SEVERITY_ERROR,
        source: DIAGNOSTIC_SOURCE,
        message,
        related_information: None,
    }
}
