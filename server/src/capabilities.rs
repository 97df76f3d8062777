//! Client capability flags read once at initialization.
//!
//! The three flags the server cares about are snapshotted out of
//! `InitializeParams` into one immutable value that is shared by reference
//! for the lifetime of the session. Nothing mutates it after the handshake.

use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ClientCapabilities {
    /// `workspace/configuration` requests are supported; settings are
    /// resolved per document instead of from one process-wide value.
    pub scoped_configuration: bool,
    /// The client manages workspace folders.
    pub workspace_folders: bool,
    /// Diagnostics may carry `relatedInformation`.
    pub related_information: bool,
}

impl ClientCapabilities {
    /// Extract the flags from raw `initialize` params. Absent or non-`true`
    /// values read as unsupported.
    pub fn from_initialize(params: &Value) -> Self {
        let flag = |pointer: &str| params.pointer(pointer).and_then(Value::as_bool) == Some(true);
        Self {
            scoped_configuration: flag("/capabilities/workspace/configuration"),
            workspace_folders: flag("/capabilities/workspace/workspaceFolders"),
            related_information: flag(
                "/capabilities/textDocument/publishDiagnostics/relatedInformation",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_flags_read_from_full_params() {
        let params = serde_json::json!({
            "processId": 1,
            "capabilities": {
                "workspace": {
                    "configuration": true,
                    "workspaceFolders": true
                },
                "textDocument": {
                    "publishDiagnostics": { "relatedInformation": true }
                }
            }
        });
        let caps = ClientCapabilities::from_initialize(&params);
        assert!(caps.scoped_configuration);
        assert!(caps.workspace_folders);
        assert!(caps.related_information);
    }

    #[test]
    fn missing_sections_read_as_unsupported() {
        let caps = ClientCapabilities::from_initialize(&serde_json::json!({ "capabilities": {} }));
        assert_eq!(caps, ClientCapabilities::default());

        let caps = ClientCapabilities::from_initialize(&serde_json::json!({}));
        assert_eq!(caps, ClientCapabilities::default());
    }

    #[test]
    fn explicit_false_reads_as_unsupported() {
        let params = serde_json::json!({
            "capabilities": {
                "workspace": { "configuration": false },
                "textDocument": { "publishDiagnostics": { "relatedInformation": false } }
            }
        });
        let caps = ClientCapabilities::from_initialize(&params);
        assert!(!caps.scoped_configuration);
        assert!(!caps.related_information);
    }

    #[test]
    fn non_boolean_values_read_as_unsupported() {
        let params = serde_json::json!({
            "capabilities": { "workspace": { "configuration": { "nested": true } } }
        });
        assert!(!ClientCapabilities::from_initialize(&params).scoped_configuration);
    }
}
