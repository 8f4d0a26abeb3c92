//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Communicates with a Chrome instance via its debugging WebSocket
//! endpoint: commands go out with auto-incrementing ids, responses come
//! back correlated through oneshot channels. Unsolicited protocol events
//! are ignored; all page observation in this system goes through
//! `Runtime.evaluate`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use wabridge_core::{Error, Result};

const COMMAND_TIMEOUT_SECS: u64 = 30;

/// A CDP WebSocket client bound to a single page target.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Handles to the reader/writer tasks so we can abort on drop.
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        // Channel for outgoing messages
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from the channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches command responses, drops events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = pending_clone.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("send {}: {}", method, e)))?;

        let timeout =
            tokio::time::timeout(std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS), rx);
        match timeout.await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("{}: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp("response channel closed".to_string())),
            Err(_) => {
                // Remove from pending
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Cdp(format!(
                    "command '{}' timed out after {}s",
                    method, COMMAND_TIMEOUT_SECS
                )))
            }
        }
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "DOM").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Navigate the page target to a URL.
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({"url": url}))
            .await
    }

    /// Reload the page target.
    pub async fn reload(&self) -> Result<()> {
        self.send_command("Page.reload", json!({})).await?;
        Ok(())
    }

    /// Evaluate JavaScript in the page context and return the raw
    /// `Runtime.evaluate` result object.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value> {
        self.send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await
    }

    /// Evaluate JavaScript and extract the by-value result, if any.
    pub async fn eval_value(&self, expression: &str) -> Result<Value> {
        let result = self.evaluate_js(expression).await?;
        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .unwrap_or("unknown exception");
            return Err(Error::Cdp(format!("page exception: {}", text)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Register a script that runs in every new document before page
    /// scripts (used to mask automation markers).
    pub async fn add_init_script(&self, source: &str) -> Result<()> {
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": source}),
        )
        .await?;
        Ok(())
    }

    /// Insert text into the focused element (bypasses key events).
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send_command("Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }

    /// Dispatch a raw key event via the Input domain.
    pub async fn dispatch_key_event(&self, event_type: &str, key: &str, code: &str) -> Result<()> {
        let mut params = json!({
            "type": event_type,
            "key": key,
            "code": code,
        });
        // For printable characters, set text
        if event_type == "keyDown" && key.len() == 1 {
            params["text"] = json!(key);
        }
        self.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    /// Press and release a key (e.g. "Enter").
    pub async fn press_key(&self, key: &str, code: &str) -> Result<()> {
        self.dispatch_key_event("keyDown", key, code).await?;
        self.dispatch_key_event("keyUp", key, code).await?;
        Ok(())
    }

    /// Set viewport metrics.
    pub async fn set_viewport(&self, width: i32, height: i32) -> Result<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    /// Ask the browser to shut down gracefully.
    pub async fn browser_close(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}
