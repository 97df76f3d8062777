//! The validator's structured output.
//!
//! `klog <file> json` (here: fed over stdin) prints exactly one JSON object,
//! either `{"records": [...], "errors": null}` on success or
//! `{"records": null, "errors": [...]}` on failure. The raw wire shape (two
//! nullable fields) stays private; deserialization resolves it into
//! [`ValidatorReport`] at the parse boundary, rejecting anything that does
//! not populate exactly one arm.

use serde::Deserialize;
use serde_json::Value;

/// One structured violation reported by the validator.
///
/// `line` and `column` are 1-based; `length` is a column count within that
/// line (the validator never reports a span crossing a line break).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidationError {
    pub line: u32,
    pub column: u32,
    pub length: u32,
    pub title: String,
    pub details: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReportShapeError {
    #[error("validator output has both records and errors populated")]
    BothArms,
    #[error("validator output has neither records nor errors")]
    NeitherArm,
}

#[derive(Deserialize)]
struct RawReport {
    records: Option<Vec<Value>>,
    errors: Option<Vec<ValidationError>>,
}

/// Decoded validator output: exactly one arm.
///
/// Records are opaque to this server; they are carried but never consumed.
/// Errors are kept verbatim (order preserved, duplicates preserved).
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawReport")]
pub enum ValidatorReport {
    Valid { records: Vec<Value> },
    Invalid { errors: Vec<ValidationError> },
}

impl TryFrom<RawReport> for ValidatorReport {
    type Error = ReportShapeError;

    fn try_from(raw: RawReport) -> Result<Self, Self::Error> {
        match (raw.records, raw.errors) {
            (Some(records), None) => Ok(Self::Valid { records }),
            (None, Some(errors)) => Ok(Self::Invalid { errors }),
            (Some(_), Some(_)) => Err(ReportShapeError::BothArms),
            (None, None) => Err(ReportShapeError::NeitherArm),
        }
    }
}

impl ValidatorReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Errors of the `Invalid` arm; empty for a valid document.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            Self::Valid { .. } => &[],
            Self::Invalid { errors } => errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: serde_json::Value) -> Result<ValidatorReport, serde_json::Error> {
        serde_json::from_value(json)
    }

    #[test]
    fn success_arm_decodes() {
        let report = decode(serde_json::json!({
            "records": [{"date": "2023-01-01", "total_mins": 60}],
            "errors": null
        }))
        .unwrap();
        assert!(report.is_valid());
        assert!(report.errors().is_empty());
    }

    #[test]
    fn failure_arm_decodes_verbatim() {
        let report = decode(serde_json::json!({
            "records": null,
            "errors": [
                {"line": 2, "column": 3, "length": 5, "title": "Bad entry", "details": "Expected time range"},
                {"line": 2, "column": 3, "length": 5, "title": "Bad entry", "details": "Expected time range"},
                {"line": 1, "column": 1, "length": 0, "title": "Later in the list", "details": ""}
            ]
        }))
        .unwrap();
        // Order and duplicates preserved, no normalization.
        let errors = report.errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], errors[1]);
        assert_eq!(errors[2].title, "Later in the list");
    }

    #[test]
    fn both_arms_rejected() {
        let result = decode(serde_json::json!({
            "records": [],
            "errors": []
        }));
        assert!(result.is_err());
    }

    #[test]
    fn neither_arm_rejected() {
        assert!(decode(serde_json::json!({ "records": null, "errors": null })).is_err());
        assert!(decode(serde_json::json!({ "foo": 1 })).is_err());
        assert!(decode(serde_json::json!({})).is_err());
    }

    #[test]
    fn wrong_field_types_rejected() {
        assert!(decode(serde_json::json!({ "records": null, "errors": "oops" })).is_err());
        assert!(decode(serde_json::json!({
            "records": null,
            "errors": [{"line": "two", "column": 3, "length": 5, "title": "t", "details": "d"}]
        }))
        .is_err());
    }

    #[test]
    fn error_entry_requires_all_fields() {
        assert!(decode(serde_json::json!({
            "records": null,
            "errors": [{"line": 2, "column": 3, "length": 5, "title": "no details"}]
        }))
        .is_err());
    }

    #[test]
    fn empty_error_list_is_still_invalid_arm() {
        let report = decode(serde_json::json!({ "records": null, "errors": [] })).unwrap();
        assert!(!report.is_valid());
        assert!(report.errors().is_empty());
    }
}
