//! Domain types for spoolsync.
//!
//! This module contains the core data structures:
//! - Events: Sequenced change notifications consumed by the reconciler
//! - Spool: Inventory records and the fixed variable schema written to Klipper

pub mod events;
pub mod spool;

// Re-export commonly used types
pub use events::{ChangeEvent, ChangeKind, SpoolId};
pub use spool::{FieldValue, ResolvedSchema, SchemaField, SpoolRecord};
