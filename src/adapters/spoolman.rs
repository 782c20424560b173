//! Spoolman REST client.
//!
//! Endpoint: GET /api/v1/spool/{id}
//!
//! The interesting part of the response is the nested `filament` object,
//! which carries the temperatures, material, name and vendor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::warn;

use super::{FetchError, InventoryApi};
use crate::domain::{SpoolId, SpoolRecord};

/// Spoolman HTTP client
pub struct SpoolmanClient {
    /// Base URL without trailing slash, e.g. `http://localhost:7912`
    base_url: String,
    client: reqwest::Client,
}

/// Subset of the spool response we care about
#[derive(Debug, Deserialize)]
pub struct SpoolResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub filament: Option<FilamentResponse>,
}

#[derive(Debug, Deserialize)]
pub struct FilamentResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub settings_extruder_temp: Option<Number>,
    #[serde(default)]
    pub settings_bed_temp: Option<Number>,
    /// Usually an object with a `name`, but not guaranteed
    #[serde(default)]
    pub vendor: Option<Value>,
}

impl SpoolmanClient {
    /// Create a new client
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the URL for one spool
    fn spool_url(&self, id: SpoolId) -> String {
        format!("{}/api/v1/spool/{}", self.base_url, id)
    }
}

/// Map an HTTP status to a fetch error (`None` for success)
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    let error = match status {
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::Transient(format!("HTTP {}", status))
        }
        s if s.is_server_error() => FetchError::Transient(format!("HTTP {}", s)),
        s => FetchError::Rejected(format!("HTTP {}", s)),
    };
    Some(error)
}

/// Convert a decoded response into a record
pub fn record_from_response(spool_id: SpoolId, response: SpoolResponse) -> SpoolRecord {
    let Some(filament) = response.filament else {
        warn!(%spool_id, "No filament data found for spool");
        return SpoolRecord::empty();
    };

    let vendor = filament
        .vendor
        .as_ref()
        .and_then(Value::as_object)
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    SpoolRecord {
        id: filament.id,
        hotend_temp: filament.settings_extruder_temp,
        bed_temp: filament.settings_bed_temp,
        material: filament.material,
        name: filament.name,
        vendor,
    }
}

/// Parse a raw response body
pub fn parse_spool(spool_id: SpoolId, body: &str) -> Result<SpoolRecord, FetchError> {
    let response: SpoolResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Rejected(format!("Undecodable spool response: {}", e)))?;
    Ok(record_from_response(spool_id, response))
}

#[async_trait]
impl InventoryApi for SpoolmanClient {
    fn name(&self) -> &str {
        "spoolman"
    }

    async fn fetch_spool(&self, id: SpoolId) -> Result<SpoolRecord, FetchError> {
        let response = self
            .client
            .get(self.spool_url(id))
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("Request to Spoolman failed: {}", e)))?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to read Spoolman response: {}", e)))?;

        parse_spool(id, &body)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/v1/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach Spoolman")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Spoolman health check failed ({})", status);
        }

        Ok(())
    }
}
