//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the three services the engine
//! talks to: the Spoolman inventory (read-only), Moonraker's HTTP API
//! (G-code scripts and the active spool lookup) and Moonraker's websocket
//! notification stream.

pub mod moonraker;
pub mod moonraker_ws;
pub mod spoolman;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{SpoolId, SpoolRecord};

// Re-export the concrete adapters
pub use moonraker::MoonrakerClient;
pub use moonraker_ws::{BusHandle, MoonrakerEvents};
pub use spoolman::SpoolmanClient;

/// Errors from the inventory read API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The spool does not exist (deleted or never created)
    #[error("Spool not found")]
    NotFound,

    /// Network failure, timeout or server-side error; worth retrying
    #[error("Transient inventory error: {0}")]
    Transient(String),

    /// The request will not succeed on retry
    #[error("Inventory rejected request: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Errors from running a G-code script on the host
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcodeError {
    /// The target macro is not defined on the host
    #[error("Macro target missing: {0}")]
    TargetMissing(String),

    /// Any other failure
    #[error("G-code command failed: {0}")]
    Failed(String),
}

/// Read access to the filament inventory
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Fetch one spool record
    async fn fetch_spool(&self, id: SpoolId) -> Result<SpoolRecord, FetchError>;

    /// Health check
    async fn health_check(&self) -> Result<()>;
}

/// Write-only sink for G-code scripts
#[async_trait]
pub trait GcodeSink: Send + Sync {
    async fn run_gcode(&self, script: &str) -> Result<(), GcodeError>;
}

/// Lookup of the spool currently marked active on the host
#[async_trait]
pub trait ActiveSpoolSource: Send + Sync {
    async fn active_spool_id(&self) -> Result<Option<SpoolId>>;
}

/// Notifications delivered by the host's event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusNotification {
    /// Connection to the bus established
    Connected,

    /// Connection to the bus lost
    Disconnected,

    /// Klipper reported it is ready
    KlippyReady,

    /// The active spool changed; `None` means it was cleared
    ActiveSpoolSet(Option<SpoolId>),
}
