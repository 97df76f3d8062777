//! Effective validation settings for a document.
//!
//! These mirror the host's `klog` configuration section. The host is free to
//! send anything (or nothing) over the wire, so every field carries a serde
//! default and a malformed payload degrades to [`KlogSettings::default`] at
//! the resolution boundary rather than failing the cycle.

use serde::Deserialize;

/// When a document's validation cycle runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidateTrigger {
    /// Validate when the document is saved.
    #[default]
    Save,
    /// Validate on every content change (and on open).
    Edit,
}

/// Resolved settings for one document (or the process-wide fallback when the
/// host lacks scoped configuration).
///
/// Wire shape, configuration section `"klog"`:
/// `{ "enabled": bool, "path": string, "validateOn": "save" | "edit" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KlogSettings {
    enabled: bool,
    path: String,
    #[serde(rename = "validateOn")]
    validate_trigger: ValidateTrigger,
}

impl Default for KlogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: String::new(),
            validate_trigger: ValidateTrigger::Save,
        }
    }
}

impl KlogSettings {
    #[must_use]
    pub fn new(enabled: bool, path: String, validate_trigger: ValidateTrigger) -> Self {
        Self {
            enabled,
            path,
            validate_trigger,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Configured validator executable. May be blank (unset) or a bare
    /// command name to be resolved against `PATH`.
    #[must_use]
    pub fn executable_path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn validate_trigger(&self) -> ValidateTrigger {
        self.validate_trigger
    }

    /// Whether a validator can be spawned at all: enabled with a non-blank
    /// executable path.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.enabled && !self.path.trim().is_empty()
    }
}
