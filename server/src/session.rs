//! The session: transport loop and validation orchestration.
//!
//! One task reads client frames; validation cycles run as spawned tasks so
//! a cycle awaiting a configuration round-trip or a subprocess never stalls
//! the loop. All outgoing traffic funnels through a single writer task, so
//! concurrent cycles cannot interleave partial frames. Every per-cycle
//! failure is contained in that cycle: it surfaces as a diagnostic or a log
//! line, never as session death.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};

use klog_ls_types::{KlogSettings, ValidateTrigger};

use crate::capabilities::ClientCapabilities;
use crate::codec::{FrameReader, FrameWriter};
use crate::diagnostics;
use crate::document::DocumentStore;
use crate::interpret;
use crate::invoke;
use crate::protocol::{self, Diagnostic, IncomingFrame, Notification, Request, Response};
use crate::settings::SettingsResolver;
use crate::version;

const REQUEST_TIMEOUT_SECS: u64 = 30;

const WRITER_CHANNEL_CAPACITY: usize = 64;

pub(crate) enum WriterCommand {
    Send(Value),
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum RequestError {
    #[error("encoding request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("client channel closed")]
    ChannelClosed,
    #[error("request timed out")]
    TimedOut,
    #[error("client rejected request: {0}")]
    Rejected(String),
}

/// Server-to-client communication handle, shared with every cycle task.
///
/// Owns the request id counter and the pending-response map; the session
/// loop routes client responses back through [`ClientHandle::complete`].
#[derive(Clone)]
pub(crate) struct ClientHandle {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientHandle {
    pub fn new(writer_tx: mpsc::Sender<WriterCommand>) -> Self {
        Self {
            writer_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send a request and await the client's result.
    pub async fn request(&self, method: &'static str, params: Value) -> Result<Value, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = match serde_json::to_value(Request::new(id, method, Some(params))) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e.into());
            }
        };
        if self.writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::ChannelClosed);
        }

        let body = match tokio::time::timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(RequestError::ChannelClosed);
            }
            Err(_) => {
                // Timed out: drop the pending entry so repeated failures
                // don't grow the map.
                self.pending.lock().await.remove(&id);
                return Err(RequestError::TimedOut);
            }
        };

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(RequestError::Rejected(message.to_string()));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Route a client response to whichever request is waiting on its id.
    pub async fn complete(&self, id: u64, body: Value) {
        let waiter = self.pending.lock().await.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => tracing::trace!(id, "response for an unknown or expired request id"),
        }
    }

    pub async fn notify(&self, method: &'static str, params: Value) {
        match serde_json::to_value(Notification::new(method, Some(params))) {
            Ok(frame) => {
                if self.writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
                    tracing::warn!(method, "client channel closed; notification dropped");
                }
            }
            Err(e) => tracing::warn!(method, error = %e, "failed to encode notification"),
        }
    }

    pub async fn respond(&self, response: Response) {
        match serde_json::to_value(&response) {
            Ok(frame) => {
                if self.writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
                    tracing::warn!("client channel closed; response dropped");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode response"),
        }
    }

    pub async fn publish_diagnostics(&self, uri: &str, diagnostics: &[Diagnostic]) {
        self.notify(
            "textDocument/publishDiagnostics",
            protocol::publish_diagnostics_params(uri, diagnostics),
        )
        .await;
    }

    async fn shutdown_writer(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }
}

/// Per-document monotonic cycle counter.
///
/// Only the most recently started cycle for a document may publish; a
/// closed document has no entry, so nothing publishes to it at all.
#[derive(Default)]
pub(crate) struct CycleGuard {
    latest: StdMutex<HashMap<String, u64>>,
    counter: AtomicU64,
}

impl CycleGuard {
    pub fn begin(&self, uri: &str) -> u64 {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest
            .lock()
            .expect("cycle guard poisoned")
            .insert(uri.to_string(), seq);
        seq
    }

    pub fn is_current(&self, uri: &str, seq: u64) -> bool {
        self.latest
            .lock()
            .expect("cycle guard poisoned")
            .get(uri)
            .is_some_and(|latest| *latest == seq)
    }

    pub fn close(&self, uri: &str) {
        self.latest.lock().expect("cycle guard poisoned").remove(uri);
    }
}

/// Everything a spawned validation cycle needs from the session.
#[derive(Clone)]
struct CycleContext {
    capabilities: ClientCapabilities,
    resolver: Arc<SettingsResolver>,
    guard: Arc<CycleGuard>,
    client: ClientHandle,
    version_checked: Arc<StdMutex<HashSet<PathBuf>>>,
}

/// A running language-server session over one pair of byte streams.
pub struct Session;

impl Session {
    /// Serve LSP over the given streams until the client disconnects or
    /// sends `exit`.
    pub async fn run<R, W>(input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(output);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let client = ClientHandle::new(writer_tx);
        let mut reader = FrameReader::new(input);

        let result = Self::serve(&mut reader, &client).await;

        client.shutdown_writer().await;
        let _ = writer_task.await;
        result
    }

    async fn serve<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
        client: &ClientHandle,
    ) -> Result<()> {
        let Some(capabilities) = Self::await_initialize(reader, client).await? else {
            tracing::info!("client went away before initialize");
            return Ok(());
        };
        tracing::info!(?capabilities, "session initialized");

        let ctx = CycleContext {
            capabilities,
            resolver: Arc::new(SettingsResolver::new(capabilities.scoped_configuration)),
            guard: Arc::default(),
            client: client.clone(),
            version_checked: Arc::default(),
        };
        let mut docs = DocumentStore::new();

        loop {
            let Some(frame) = reader.read_frame().await.context("reading client frame")? else {
                tracing::info!("client closed the stream");
                return Ok(());
            };
            let Some(incoming) = protocol::parse_incoming(&frame) else {
                tracing::trace!("ignoring a frame that is not JSON-RPC shaped");
                continue;
            };

            match incoming {
                IncomingFrame::Response { id, body } => ctx.client.complete(id, body).await,
                IncomingFrame::Request { id, method, .. } => match method.as_str() {
                    "shutdown" => {
                        tracing::info!("shutdown requested");
                        ctx.client.respond(Response::ok(id, Value::Null)).await;
                    }
                    other => {
                        tracing::debug!(method = other, "unsupported client request");
                        ctx.client
                            .respond(Response::error(
                                id,
                                protocol::METHOD_NOT_FOUND,
                                format!("method not found: {other}"),
                            ))
                            .await;
                    }
                },
                IncomingFrame::Notification { method, params } => {
                    if method == "exit" {
                        tracing::info!("exit received");
                        return Ok(());
                    }
                    Self::handle_notification(&ctx, &mut docs, &method, params);
                }
            }
        }
    }

    /// Pre-initialization loop: everything except `initialize` (answered
    /// with the server capabilities) and `exit` is refused or ignored.
    async fn await_initialize<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
        client: &ClientHandle,
    ) -> Result<Option<ClientCapabilities>> {
        loop {
            let Some(frame) = reader.read_frame().await.context("reading handshake frame")? else {
                return Ok(None);
            };
            match protocol::parse_incoming(&frame) {
                Some(IncomingFrame::Request { id, method, params }) => {
                    if method == "initialize" {
                        let params = params.unwrap_or(Value::Null);
                        let capabilities = ClientCapabilities::from_initialize(&params);
                        client
                            .respond(Response::ok(
                                id,
                                protocol::initialize_result(capabilities.workspace_folders),
                            ))
                            .await;
                        return Ok(Some(capabilities));
                    }
                    client
                        .respond(Response::error(
                            id,
                            protocol::SERVER_NOT_INITIALIZED,
                            "server not initialized",
                        ))
                        .await;
                }
                Some(IncomingFrame::Notification { method, .. }) if method == "exit" => {
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn handle_notification(
        ctx: &CycleContext,
        docs: &mut DocumentStore,
        method: &str,
        params: Option<Value>,
    ) {
        match method {
            "initialized" => {
                if ctx.capabilities.scoped_configuration {
                    Self::register_for_configuration_changes(ctx);
                }
            }
            "workspace/didChangeConfiguration" => {
                if ctx.capabilities.scoped_configuration {
                    ctx.resolver.invalidate_all();
                } else {
                    let inline = params
                        .as_ref()
                        .and_then(|p| p.pointer("/settings/klog"))
                        .cloned();
                    ctx.resolver.replace_global(inline);
                }
                // Re-validate everything that is open, bypassing the
                // trigger gate.
                for uri in docs.open_uris() {
                    Self::schedule(ctx, docs, &uri, None);
                }
            }
            "textDocument/didOpen" => {
                let Some(p) = decode_params::<protocol::DidOpenParams>(method, params) else {
                    return;
                };
                let uri = p.text_document.uri;
                docs.open(uri.clone(), p.text_document.text);
                Self::schedule(ctx, docs, &uri, Some(ValidateTrigger::Edit));
            }
            "textDocument/didChange" => {
                let Some(p) = decode_params::<protocol::DidChangeParams>(method, params) else {
                    return;
                };
                let uri = p.text_document.uri;
                if docs.apply_changes(&uri, &p.content_changes) {
                    Self::schedule(ctx, docs, &uri, Some(ValidateTrigger::Edit));
                } else {
                    tracing::warn!(%uri, "didChange for a document that is not open");
                }
            }
            "textDocument/didSave" => {
                let Some(p) = decode_params::<protocol::DidSaveParams>(method, params) else {
                    return;
                };
                Self::schedule(ctx, docs, &p.text_document.uri, Some(ValidateTrigger::Save));
            }
            "textDocument/didClose" => {
                let Some(p) = decode_params::<protocol::DidCloseParams>(method, params) else {
                    return;
                };
                let uri = p.text_document.uri;
                docs.close(&uri);
                ctx.resolver.remove(&uri);
                ctx.guard.close(&uri);
            }
            "workspace/didChangeWorkspaceFolders" => {
                tracing::debug!("workspace folder change received");
            }
            other => tracing::trace!(method = other, "ignoring notification"),
        }
    }

    fn register_for_configuration_changes(ctx: &CycleContext) {
        let client = ctx.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client
                .request(
                    "client/registerCapability",
                    protocol::configuration_registration_params(),
                )
                .await
            {
                tracing::debug!(error = %e, "configuration change registration failed");
            }
        });
    }

    /// Start a validation cycle for one document. `gate` carries the
    /// trigger this event corresponds to; `None` bypasses the gate
    /// (configuration-change re-validation).
    fn schedule(
        ctx: &CycleContext,
        docs: &DocumentStore,
        uri: &str,
        gate: Option<ValidateTrigger>,
    ) {
        let Some(text) = docs.text(uri) else { return };
        let seq = ctx.guard.begin(uri);
        let task = run_cycle(ctx.clone(), uri.to_string(), text.to_string(), seq, gate);
        tokio::spawn(task);
    }
}

/// Whether the event that started this cycle matches the configured trigger.
fn trigger_matches(settings: &KlogSettings, gate: Option<ValidateTrigger>) -> bool {
    gate.is_none_or(|trigger| settings.validate_trigger() == trigger)
}

async fn run_cycle(
    ctx: CycleContext,
    uri: String,
    text: String,
    seq: u64,
    gate: Option<ValidateTrigger>,
) {
    let settings = match ctx.resolver.resolve(&ctx.client, &uri).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(%uri, error = %e, "configuration unavailable; skipping validation");
            return;
        }
    };

    if !trigger_matches(&settings, gate) {
        return;
    }
    // Disabled or unset: skip quietly, leaving prior diagnostics alone.
    if !settings.is_runnable() {
        return;
    }

    let diagnostics = match which::which(settings.executable_path()) {
        Err(_) => {
            vec![diagnostics::synthetic(format!(
                "Invalid klog path '{}'",
                settings.executable_path()
            ))]
        }
        Ok(executable) => {
            maybe_check_version(&ctx, &executable);
            validate_text(&ctx, &uri, &executable, &text).await
        }
    };

    if ctx.guard.is_current(&uri, seq) {
        ctx.client.publish_diagnostics(&uri, &diagnostics).await;
    } else {
        tracing::debug!(%uri, seq, "discarding the result of a superseded cycle");
    }
}

async fn validate_text(
    ctx: &CycleContext,
    uri: &str,
    executable: &Path,
    text: &str,
) -> Vec<Diagnostic> {
    let raw = match invoke::invoke(executable, text).await {
        Ok(raw) => raw,
        Err(e) => return vec![diagnostics::synthetic(format!("Failed to run klog: {e}"))],
    };
    match interpret::interpret(&raw) {
        Ok(report) => report
            .errors()
            .iter()
            .map(|error| {
                diagnostics::from_validation_error(error, uri, ctx.capabilities.related_information)
            })
            .collect(),
        Err(e) => vec![diagnostics::synthetic(e.to_string())],
    }
}

fn maybe_check_version(ctx: &CycleContext, executable: &Path) {
    let newly_seen = ctx
        .version_checked
        .lock()
        .expect("version set poisoned")
        .insert(executable.to_path_buf());
    if newly_seen {
        tokio::spawn(version::check_compatibility(executable.to_path_buf()));
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(method: &str, params: Option<Value>) -> Option<T> {
    match serde_json::from_value(params.unwrap_or(Value::Null)) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(method, error = %e, "discarding notification with malformed params");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(trigger: ValidateTrigger) -> KlogSettings {
        KlogSettings::new(true, "klog".to_string(), trigger)
    }

    #[test]
    fn edit_events_only_run_with_edit_trigger() {
        assert!(trigger_matches(
            &settings(ValidateTrigger::Edit),
            Some(ValidateTrigger::Edit)
        ));
        assert!(!trigger_matches(
            &settings(ValidateTrigger::Save),
            Some(ValidateTrigger::Edit)
        ));
    }

    #[test]
    fn save_events_only_run_with_save_trigger() {
        assert!(trigger_matches(
            &settings(ValidateTrigger::Save),
            Some(ValidateTrigger::Save)
        ));
        assert!(!trigger_matches(
            &settings(ValidateTrigger::Edit),
            Some(ValidateTrigger::Save)
        ));
    }

    #[test]
    fn forced_cycles_bypass_the_gate() {
        assert!(trigger_matches(&settings(ValidateTrigger::Save), None));
        assert!(trigger_matches(&settings(ValidateTrigger::Edit), None));
    }

    #[test]
    fn newest_cycle_wins() {
        let guard = CycleGuard::default();
        let first = guard.begin("file:///a.klg");
        let second = guard.begin("file:///a.klg");

        assert!(!guard.is_current("file:///a.klg", first));
        assert!(guard.is_current("file:///a.klg", second));
    }

    #[test]
    fn documents_do_not_share_cycle_counters() {
        let guard = CycleGuard::default();
        let a = guard.begin("file:///a.klg");
        let _b = guard.begin("file:///b.klg");

        assert!(guard.is_current("file:///a.klg", a));
    }

    #[test]
    fn closed_documents_never_publish() {
        let guard = CycleGuard::default();
        let seq = guard.begin("file:///a.klg");
        guard.close("file:///a.klg");

        assert!(!guard.is_current("file:///a.klg", seq));
    }

    #[tokio::test]
    async fn request_resolves_with_the_routed_result() {
        let (writer_tx, mut writer_rx) = mpsc::channel(8);
        let client = ClientHandle::new(writer_tx);

        let task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("workspace/configuration", serde_json::json!({"items": []}))
                    .await
            })
        };

        let frame = match writer_rx.recv().await.unwrap() {
            WriterCommand::Send(frame) => frame,
            WriterCommand::Shutdown => panic!("expected Send"),
        };
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["method"], "workspace/configuration");
        let id = frame["id"].as_u64().unwrap();

        client
            .complete(
                id,
                serde_json::json!({"jsonrpc": "2.0", "id": id, "result": [{"enabled": true}]}),
            )
            .await;

        let result = task.await.unwrap().unwrap();
        assert_eq!(result[0]["enabled"], true);
    }

    #[tokio::test]
    async fn request_with_error_body_is_rejected() {
        let (writer_tx, mut writer_rx) = mpsc::channel(8);
        let client = ClientHandle::new(writer_tx);

        let task = {
            let client = client.clone();
            tokio::spawn(
                async move { client.request("client/registerCapability", Value::Null).await },
            )
        };

        let frame = match writer_rx.recv().await.unwrap() {
            WriterCommand::Send(frame) => frame,
            WriterCommand::Shutdown => panic!("expected Send"),
        };
        let id = frame["id"].as_u64().unwrap();
        client
            .complete(
                id,
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32600, "message": "nope"}
                }),
            )
            .await;

        match task.await.unwrap() {
            Err(RequestError::Rejected(message)) => assert_eq!(message, "nope"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn responses_for_unknown_ids_are_dropped() {
        let (writer_tx, _writer_rx) = mpsc::channel(8);
        let client = ClientHandle::new(writer_tx);
        client.complete(999, serde_json::json!({"result": null})).await;
    }

    #[tokio::test]
    async fn publish_diagnostics_builds_the_notification() {
        let (writer_tx, mut writer_rx) = mpsc::channel(8);
        let client = ClientHandle::new(writer_tx);

        client.publish_diagnostics("file:///t.klg", &[]).await;

        let frame = match writer_rx.recv().await.unwrap() {
            WriterCommand::Send(frame) => frame,
            WriterCommand::Shutdown => panic!("expected Send"),
        };
        assert_eq!(frame["method"], "textDocument/publishDiagnostics");
        assert_eq!(frame["params"]["uri"], "file:///t.klg");
        assert_eq!(frame["params"]["diagnostics"], serde_json::json!([]));
        assert!(frame.get("id").is_none());
    }
}
