//! Per-document settings resolution and caching.
//!
//! The cache is the only shared mutable state in the server and it is owned
//! entirely by this type: insert on resolution, clear on a host-wide
//! configuration change, remove on document close. Nothing else touches the
//! backing map. When the host lacks scoped configuration the resolver
//! degrades to one process-wide value replaced from inline change payloads.

use std::collections::HashMap;
use std::sync::Mutex;

use klog_ls_types::KlogSettings;
use serde_json::Value;

use crate::protocol;
use crate::session::{ClientHandle, RequestError};

pub(crate) struct SettingsResolver {
    scoped: bool,
    cache: Mutex<HashMap<String, KlogSettings>>,
    global: Mutex<KlogSettings>,
}

impl SettingsResolver {
    pub fn new(scoped: bool) -> Self {
        Self {
            scoped,
            cache: Mutex::new(HashMap::new()),
            global: Mutex::new(KlogSettings::default()),
        }
    }

    /// Effective settings for a document.
    ///
    /// Scoped hosts are asked via `workspace/configuration` on a cache miss;
    /// a malformed or missing configuration item resolves (and caches) as
    /// the defaults. A rejected or timed-out round-trip is the caller's
    /// problem: the cycle is skipped, the server stays up.
    pub async fn resolve(
        &self,
        client: &ClientHandle,
        uri: &str,
    ) -> Result<KlogSettings, RequestError> {
        if !self.scoped {
            return Ok(self.global.lock().expect("settings lock poisoned").clone());
        }

        if let Some(cached) = self.cache.lock().expect("settings lock poisoned").get(uri) {
            return Ok(cached.clone());
        }

        let result = client
            .request("workspace/configuration", protocol::configuration_params(uri))
            .await?;
        let settings = decode_item(result.get(0));
        self.cache
            .lock()
            .expect("settings lock poisoned")
            .insert(uri.to_string(), settings.clone());
        Ok(settings)
    }

    /// Drop every cached entry; the next resolve per document re-queries.
    pub fn invalidate_all(&self) {
        self.cache.lock().expect("settings lock poisoned").clear();
    }

    /// Forget one document (closed).
    pub fn remove(&self, uri: &str) {
        self.cache.lock().expect("settings lock poisoned").remove(uri);
    }

    /// Replace the process-wide value from an inline change payload
    /// (non-scoped hosts). Absent or malformed payloads fall back to the
    /// defaults.
    pub fn replace_global(&self, payload: Option<Value>) {
        let settings = payload.map_or_else(KlogSettings::default, decode_value);
        *self.global.lock().expect("settings lock poisoned") = settings;
    }
}

fn decode_item(item: Option<&Value>) -> KlogSettings {
    item.cloned().map_or_else(KlogSettings::default, decode_value)
}

fn decode_value(value: Value) -> KlogSettings {
    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "malformed klog settings payload; using defaults");
        KlogSettings::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WriterCommand;
    use klog_ls_types::ValidateTrigger;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_client() -> (ClientHandle, mpsc::Receiver<WriterCommand>) {
        let (writer_tx, writer_rx) = mpsc::channel(16);
        (ClientHandle::new(writer_tx), writer_rx)
    }

    /// Pull the next outgoing request frame and answer it.
    async fn answer_next_request(
        client: &ClientHandle,
        writer_rx: &mut mpsc::Receiver<WriterCommand>,
        result: Value,
    ) {
        let frame = match writer_rx.recv().await.unwrap() {
            WriterCommand::Send(frame) => frame,
            WriterCommand::Shutdown => panic!("expected Send, got Shutdown"),
        };
        assert_eq!(frame["method"], "workspace/configuration");
        assert_eq!(frame["params"]["items"][0]["section"], "klog");
        let id = frame["id"].as_u64().unwrap();
        client
            .complete(
                id,
                serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            )
            .await;
    }

    #[tokio::test]
    async fn non_scoped_resolution_returns_the_global_value() {
        let (client, mut writer_rx) = test_client();
        let resolver = SettingsResolver::new(false);

        let settings = resolver.resolve(&client, "file:///a.klg").await.unwrap();
        assert_eq!(settings, KlogSettings::default());
        assert!(writer_rx.try_recv().is_err(), "no round-trip expected");
    }

    #[tokio::test]
    async fn replace_global_takes_effect_and_falls_back_on_garbage() {
        let (client, _writer_rx) = test_client();
        let resolver = SettingsResolver::new(false);

        resolver.replace_global(Some(serde_json::json!({
            "enabled": false,
            "path": "/opt/klog",
            "validateOn": "edit"
        })));
        let settings = resolver.resolve(&client, "file:///a.klg").await.unwrap();
        assert!(!settings.enabled());
        assert_eq!(settings.executable_path(), "/opt/klog");
        assert_eq!(settings.validate_trigger(), ValidateTrigger::Edit);

        resolver.replace_global(Some(serde_json::json!("not an object")));
        let settings = resolver.resolve(&client, "file:///a.klg").await.unwrap();
        assert_eq!(settings, KlogSettings::default());

        resolver.replace_global(None);
        let settings = resolver.resolve(&client, "file:///a.klg").await.unwrap();
        assert_eq!(settings, KlogSettings::default());
    }

    #[tokio::test]
    async fn scoped_resolution_queries_then_caches() {
        let (client, mut writer_rx) = test_client();
        let resolver = Arc::new(SettingsResolver::new(true));

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(
            &client,
            &mut writer_rx,
            serde_json::json!([{ "enabled": true, "path": "klog", "validateOn": "edit" }]),
        )
        .await;

        let settings = task.await.unwrap().unwrap();
        assert_eq!(settings.executable_path(), "klog");

        // Second resolution is served from the cache: no new frame.
        let settings = resolver.resolve(&client, "file:///a.klg").await.unwrap();
        assert_eq!(settings.executable_path(), "klog");
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalidate_all_forces_a_requery() {
        let (client, mut writer_rx) = test_client();
        let resolver = Arc::new(SettingsResolver::new(true));

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(
            &client,
            &mut writer_rx,
            serde_json::json!([{ "path": "old-klog" }]),
        )
        .await;
        assert_eq!(task.await.unwrap().unwrap().executable_path(), "old-klog");

        resolver.invalidate_all();

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(
            &client,
            &mut writer_rx,
            serde_json::json!([{ "path": "new-klog" }]),
        )
        .await;
        assert_eq!(task.await.unwrap().unwrap().executable_path(), "new-klog");
    }

    #[tokio::test]
    async fn removed_document_is_requeried_later() {
        let (client, mut writer_rx) = test_client();
        let resolver = Arc::new(SettingsResolver::new(true));

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(&client, &mut writer_rx, serde_json::json!([{}])).await;
        task.await.unwrap().unwrap();

        resolver.remove("file:///a.klg");

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(&client, &mut writer_rx, serde_json::json!([{}])).await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_configuration_item_resolves_to_defaults() {
        let (client, mut writer_rx) = test_client();
        let resolver = Arc::new(SettingsResolver::new(true));

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(&client, &mut writer_rx, serde_json::json!([42])).await;
        assert_eq!(task.await.unwrap().unwrap(), KlogSettings::default());

        // An empty result array behaves the same.
        resolver.invalidate_all();
        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///b.klg").await })
        };
        answer_next_request(&client, &mut writer_rx, serde_json::json!([])).await;
        assert_eq!(task.await.unwrap().unwrap(), KlogSettings::default());
    }

    #[tokio::test]
    async fn rejected_round_trip_propagates_and_is_not_cached() {
        let (client, mut writer_rx) = test_client();
        let resolver = Arc::new(SettingsResolver::new(true));

        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
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
                    "error": { "code": -32601, "message": "no configuration support after all" }
                }),
            )
            .await;
        assert!(task.await.unwrap().is_err());

        // The failure must not have been cached as a value: the next resolve
        // issues a fresh request.
        let task = {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            tokio::spawn(async move { resolver.resolve(&client, "file:///a.klg").await })
        };
        answer_next_request(&client, &mut writer_rx, serde_json::json!([{}])).await;
        assert!(task.await.unwrap().is_ok());
    }
}
