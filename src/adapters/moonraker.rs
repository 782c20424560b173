//! Moonraker HTTP client.
//!
//! Endpoints:
//! - POST /printer/gcode/script (run SET_GCODE_VARIABLE)
//! - GET /server/spoolman/spool_id (currently active spool)
//!
//! Auth: optional `X-Api-Key` header

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ActiveSpoolSource, GcodeError, GcodeSink};
use crate::domain::SpoolId;

/// Moonraker HTTP client
#[derive(Clone)]
pub struct MoonrakerClient {
    /// Base URL without trailing slash, e.g. `http://localhost:7125`
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// Standard Moonraker result envelope
#[derive(Debug, Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct SpoolIdResult {
    #[serde(default)]
    spool_id: Option<u64>,
}

impl MoonrakerClient {
    /// Create a new client
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Websocket endpoint derived from the HTTP base URL
    pub fn websocket_url(&self) -> String {
        let rest = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{}/websocket", rest)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }
}

/// Pull the human-readable message out of a Moonraker error body
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Classify a Klipper error message for a SET_GCODE_VARIABLE script.
///
/// Klipper rejects an unknown MACRO value with "The value 'X' is not valid
/// for MACRO"; when no macro defines variables at all, the command itself is
/// unknown. An unknown *variable* means the macro exists.
pub fn classify_gcode_error(message: &str) -> GcodeError {
    let lower = message.to_lowercase();

    let macro_missing = lower.contains("not valid for macro")
        || (lower.contains("unknown command") && lower.contains("set_gcode_variable"))
        || (lower.contains("unknown gcode_macro") && !lower.contains("variable"));

    if macro_missing {
        GcodeError::TargetMissing(message.to_string())
    } else {
        GcodeError::Failed(message.to_string())
    }
}

#[async_trait]
impl GcodeSink for MoonrakerClient {
    async fn run_gcode(&self, script: &str) -> Result<(), GcodeError> {
        let request = self
            .client
            .post(self.url("/printer/gcode/script"))
            .json(&serde_json::json!({ "script": script }));

        let response = self
            .with_auth(request)
            .send()
            .await
            .map_err(|e| GcodeError::Failed(format!("Request to Moonraker failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        if message.is_empty() {
            return Err(GcodeError::Failed(format!("HTTP {}", status)));
        }
        Err(classify_gcode_error(&message))
    }
}

#[async_trait]
impl ActiveSpoolSource for MoonrakerClient {
    async fn active_spool_id(&self) -> Result<Option<SpoolId>> {
        let request = self.client.get(self.url("/server/spoolman/spool_id"));

        let response = self
            .with_auth(request)
            .send()
            .await
            .context("Failed to query active spool from Moonraker")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Moonraker error ({}): {}", status, error_message(&body));
        }

        let envelope: ResultEnvelope<SpoolIdResult> = response
            .json()
            .await
            .context("Failed to decode active spool response")?;

        Ok(envelope.result.spool_id.map(SpoolId))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        let client = MoonrakerClient::new("http://printer.local:7125/", None);
        assert_eq!(client.base_url(), "http://printer.local:7125");
        assert_eq!(client.websocket_url(), "ws://printer.local:7125/websocket");

        let secure = MoonrakerClient::new("https://printer.example", None);
        assert_eq!(secure.websocket_url(), "wss://printer.example/websocket");
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"code": 400, "message": "Unknown gcode_macro variable 'id'", "traceback": ""}}"#;
        assert_eq!(error_message(body), "Unknown gcode_macro variable 'id'");
        assert_eq!(error_message("  plain text  "), "plain text");
    }

    #[test]
    fn test_missing_macro_is_target_missing() {
        let err = classify_gcode_error("The value 'SPOOLMAN_VARS' is not valid for MACRO");
        assert!(matches!(err, GcodeError::TargetMissing(_)));

        let err = classify_gcode_error("Unknown command:\"SET_GCODE_VARIABLE\"");
        assert!(matches!(err, GcodeError::TargetMissing(_)));
    }

    #[test]
    fn test_missing_variable_is_plain_failure() {
        let err = classify_gcode_error("Unknown gcode_macro variable 'vendor'");
        assert!(matches!(err, GcodeError::Failed(_)));

        let err = classify_gcode_error("Klippy Disconnected");
        assert!(matches!(err, GcodeError::Failed(_)));
    }

    #[test]
    fn test_spool_id_envelope() {
        let parsed: ResultEnvelope<SpoolIdResult> =
            serde_json::from_str(r#"{"result": {"spool_id": 4}}"#).unwrap();
        assert_eq!(parsed.result.spool_id, Some(4));

        let parsed: ResultEnvelope<SpoolIdResult> =
            serde_json::from_str(r#"{"result": {"spool_id": null}}"#).unwrap();
        assert_eq!(parsed.result.spool_id, None);
    }
}
