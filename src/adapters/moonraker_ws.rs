//! Moonraker websocket subscription for host notifications.
//!
//! Moonraker pushes JSON-RPC notifications to every connected websocket
//! client. We only care about two of them:
//! - `notify_klippy_ready`
//! - `notify_active_spool_set` with params `[{"spool_id": N | null}]`
//!
//! Klipper may already be ready when we connect, so each connection also
//! asks `server.info` and reports a ready notification when
//! `klippy_state == "ready"`.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::BusNotification;
use crate::domain::SpoolId;

/// Base delay between reconnection attempts (exponential backoff).
const RECONNECT_BASE_DELAY_SECS: u64 = 2;

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

const IDENTIFY_REQUEST_ID: u64 = 1;
const SERVER_INFO_REQUEST_ID: u64 = 2;

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// Any message Moonraker sends: a response or a notification
#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

/// Websocket notification source
pub struct MoonrakerEvents {
    ws_url: String,
}

/// Handle to a running subscription task
pub struct BusHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl BusHandle {
    /// Stop the subscription and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

impl MoonrakerEvents {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    /// Start the connection task. Notifications are sent on `tx` until the
    /// receiver is dropped or the handle is stopped.
    pub fn spawn(self, tx: mpsc::Sender<BusNotification>) -> BusHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(connection_loop(self.ws_url, tx, shutdown_rx));
        BusHandle { shutdown_tx, task }
    }
}

/// Connection loop with reconnection logic.
///
/// The engine lives as long as the process, so reconnects never give up.
async fn connection_loop(
    ws_url: String,
    tx: mpsc::Sender<BusNotification>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut failed_attempts = 0u32;

    loop {
        let result = tokio::select! {
            result = run_connection(&ws_url, &tx) => result,
            _ = shutdown_rx.recv() => break,
        };

        match result {
            Ok(()) => failed_attempts = 0,
            Err(e) => {
                failed_attempts += 1;
                warn!(url = %ws_url, attempt = failed_attempts, error = %e, "Moonraker websocket connection failed");
            }
        }

        if tx.is_closed() {
            break;
        }

        let delay = calculate_backoff_delay(failed_attempts);
        debug!(delay_secs = delay.as_secs(), "Reconnecting to Moonraker");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("Moonraker subscription stopped");
}

/// Calculate exponential backoff delay.
pub fn calculate_backoff_delay(failed_attempts: u32) -> Duration {
    let secs = std::cmp::min(
        RECONNECT_BASE_DELAY_SECS.saturating_mul(1 << failed_attempts.min(6)),
        MAX_RECONNECT_DELAY_SECS,
    );
    Duration::from_secs(secs)
}

/// Run a single websocket connection until it closes.
///
/// Only failures before the connection is established are returned as
/// errors; a dropped stream ends the connection normally.
async fn run_connection(ws_url: &str, tx: &mpsc::Sender<BusNotification>) -> Result<()> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("Failed to connect to {}", ws_url))?;

    let (mut write, mut read) = ws_stream.split();

    let identify = RpcRequest {
        jsonrpc: "2.0",
        method: "server.connection.identify",
        params: serde_json::json!({
            "client_name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "type": "other",
            "url": "",
        }),
        id: IDENTIFY_REQUEST_ID,
    };
    write
        .send(Message::Text(serde_json::to_string(&identify)?.into()))
        .await
        .context("Failed to send identify request")?;

    let server_info = RpcRequest {
        jsonrpc: "2.0",
        method: "server.info",
        params: serde_json::json!({}),
        id: SERVER_INFO_REQUEST_ID,
    };
    write
        .send(Message::Text(serde_json::to_string(&server_info)?.into()))
        .await
        .context("Failed to send server.info request")?;

    info!(url = %ws_url, "Connected to Moonraker");
    if tx.send(BusNotification::Connected).await.is_err() {
        return Ok(());
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(notification) = parse_message(text.as_str()) {
                    if tx.send(notification).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Err(e) => {
                warn!(error = %e, "Moonraker websocket error");
                break;
            }
            _ => {}
        }
    }

    info!("Disconnected from Moonraker");
    let _ = tx.send(BusNotification::Disconnected).await;
    Ok(())
}

/// Translate one websocket text frame into a notification, if relevant
pub fn parse_message(text: &str) -> Option<BusNotification> {
    let message: RpcMessage = serde_json::from_str(text).ok()?;

    if let Some(method) = message.method.as_deref() {
        return match method {
            "notify_klippy_ready" => Some(BusNotification::KlippyReady),
            "notify_active_spool_set" => parse_active_spool(message.params.as_ref()),
            _ => None,
        };
    }

    match message.id {
        Some(SERVER_INFO_REQUEST_ID) => {
            if let Some(error) = message.error {
                warn!(error = %error.message, "server.info request failed");
                return None;
            }
            let state = message
                .result
                .as_ref()
                .and_then(|r| r.get("klippy_state"))
                .and_then(Value::as_str);
            debug!(klippy_state = ?state, "Received server info");
            (state == Some("ready")).then_some(BusNotification::KlippyReady)
        }
        Some(IDENTIFY_REQUEST_ID) => {
            if let Some(error) = message.error {
                warn!(error = %error.message, "Connection identify failed");
            }
            None
        }
        _ => None,
    }
}

fn parse_active_spool(params: Option<&Value>) -> Option<BusNotification> {
    let payload = params.and_then(|p| p.get(0))?;
    let Some(spool_id) = payload.get("spool_id") else {
        warn!(%payload, "Active spool notification without spool_id");
        return None;
    };

    if spool_id.is_null() {
        return Some(BusNotification::ActiveSpoolSet(None));
    }

    match spool_id.as_u64() {
        Some(id) => Some(BusNotification::ActiveSpoolSet(Some(SpoolId(id)))),
        None => {
            warn!(%spool_id, "Active spool notification with invalid spool_id");
            None
        }
    }
}
