//! spoolsync - Keep Klipper macro variables in sync with the active Spoolman spool
//!
//! Listens to Moonraker for "Klipper ready" and "active spool changed"
//! notifications, fetches the spool from Spoolman, and writes six variables
//! (`id`, `hotend_temp`, `bed_temp`, `material`, `name`, `vendor`) to a
//! `gcode_macro` via `SET_GCODE_VARIABLE`.
//!
//! # Architecture
//!
//! Data flows left to right:
//! - `EventListener`: numbers each relevant notification with a sequence
//! - `Reconciler`: fetches the record for each event and applies only
//!   results that are not older than the last applied one
//! - `VariableWriter`: issues one `SET_GCODE_VARIABLE` per field
//!
//! # Modules
//!
//! - `adapters`: External system integrations (Spoolman, Moonraker)
//! - `core`: Listener, reconciler, writer, retry policy
//! - `domain`: Data structures (ChangeEvent, SpoolRecord, ResolvedSchema)
//! - `config`: Config file and environment resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the sync engine
//! spoolsync run
//!
//! # Preview what a spool resolves to
//! spoolsync show 12
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{EventListener, Reconciler, RetryPolicy, VariableWriter};
pub use crate::domain::{ChangeEvent, ChangeKind, ResolvedSchema, SpoolId, SpoolRecord};
