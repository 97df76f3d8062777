//! JSON-RPC and LSP message serde types, seen from the server side.
//!
//! Incoming traffic is classified by [`parse_incoming`]: client requests
//! (carry an id and a method), client notifications (method only), and
//! responses to the server's own requests (id plus result/error). Outgoing
//! frames are built from [`Request`], [`Notification`] and [`Response`].
//!
//! Positions are 0-based with UTF-16 column units; ranges are half-open,
//! per the protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const SERVER_NOT_INITIALIZED: i64 = -32002;

/// A request sent by the server to the client.
#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// A notification sent by the server to the client.
#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// The server's answer to a client request. The id is echoed back verbatim
/// (clients may use numbers or strings).
#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(serde_json::json!({
                "code": code,
                "message": message.into(),
            })),
        }
    }
}

/// One classified incoming frame.
#[derive(Debug)]
pub(crate) enum IncomingFrame {
    /// A client request the server must answer.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// The client's response to one of the server's requests.
    Response { id: u64, body: Value },
    /// A client notification.
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Classify a frame, or `None` for something that is not JSON-RPC shaped.
pub(crate) fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), Some(method), _) => Some(IncomingFrame::Request {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (Some(id), None, true) => Some(IncomingFrame::Response {
            // The server only issues numeric ids.
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

// ── Text document positions and diagnostics ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiagnosticRelatedInformation {
    pub location: Location,
    pub message: String,
}

/// LSP numeric severity for errors; the only tier this server emits.
pub(crate) const SEVERITY_ERROR: u32 = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Diagnostic {
    pub range: Range,
    pub severity: u32,
    pub source: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_information: Option<Vec<DiagnosticRelatedInformation>>,
}

// ── Incoming lifecycle params ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentItem {
    pub uri: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: String,
}

/// One entry of `contentChanges`: a ranged splice, or a full replacement
/// when `range` is absent.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentChange {
    pub range: Option<Range>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidChangeParams {
    pub text_document: TextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidSaveParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidCloseParams {
    pub text_document: TextDocumentIdentifier,
}

// ── Outgoing param builders ────────────────────────────────────────────────

pub(crate) fn initialize_result(workspace_folders: bool) -> Value {
    let mut result = serde_json::json!({
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                "change": 2,
                "save": true
            }
        }
    });
    if workspace_folders {
        result["capabilities"]["workspace"] = serde_json::json!({
            "workspaceFolders": { "supported": true }
        });
    }
    result
}

pub(crate) fn publish_diagnostics_params(uri: &str, diagnostics: &[Diagnostic]) -> Value {
    serde_json::json!({
        "uri": uri,
        "diagnostics": diagnostics,
    })
}

/// Params for `workspace/configuration`, scoped to one document.
pub(crate) fn configuration_params(scope_uri: &str) -> Value {
    serde_json::json!({
        "items": [{ "scopeUri": scope_uri, "section": "klog" }]
    })
}

/// Params for `client/registerCapability`: subscribe to configuration
/// change notifications.
pub(crate) fn configuration_registration_params() -> Value {
    serde_json::json!({
        "registrations": [{
            "id": "klog-configuration",
            "method": "workspace/didChangeConfiguration"
        }]
    })
}
