//! Synchronization engine.
//!
//! This module contains:
//! - Listener: Turns bus notifications into sequenced change events
//! - Reconciler: Fetches spool records and applies the newest result
//! - Writer: Writes resolved schemas to the macro variables
//! - Retry: Backoff policy shared by fetches and lookups

pub mod listener;
pub mod reconciler;
pub mod retry;
pub mod writer;

// Re-export commonly used types
pub use listener::EventListener;
pub use reconciler::{fetch_record, Disposition, FetchOutcome, Phase, Reconciler, ReconcilerState};
pub use retry::RetryPolicy;
pub use writer::{encode_value, scripts_for, set_variable_script, VariableWriter, WriteReport};
