//! In-memory fakes for the adapter traits.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use spoolsync::adapters::{ActiveSpoolSource, FetchError, GcodeError, GcodeSink, InventoryApi};
use spoolsync::{Reconciler, RetryPolicy, SpoolId, SpoolRecord, VariableWriter};

pub const MACRO: &str = "SPOOLMAN_VARS";

/// Policy with short, deterministic delays
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 100,
        max_delay_ms: 1000,
        backoff_multiplier: 2.0,
        jitter: 0.0,
        attempt_timeout_ms: 1000,
    }
}

pub fn record(id: u64, hotend_temp: i64, material: &str) -> SpoolRecord {
    SpoolRecord {
        id: Some(id),
        hotend_temp: Some(hotend_temp.into()),
        material: Some(material.to_string()),
        ..Default::default()
    }
}

struct Plan {
    delay: Duration,
    /// Replies per attempt; the last one repeats
    replies: Vec<Result<SpoolRecord, FetchError>>,
}

/// Scripted inventory. Unknown ids answer NotFound.
#[derive(Default)]
pub struct FakeInventory {
    plans: Mutex<HashMap<SpoolId, Plan>>,
    calls: Mutex<Vec<SpoolId>>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: u64, delay_ms: u64, reply: Result<SpoolRecord, FetchError>) -> Self {
        self.with_replies(id, delay_ms, vec![reply])
    }

    pub fn with_replies(
        self,
        id: u64,
        delay_ms: u64,
        replies: Vec<Result<SpoolRecord, FetchError>>,
    ) -> Self {
        self.plans.lock().unwrap().insert(
            SpoolId(id),
            Plan {
                delay: Duration::from_millis(delay_ms),
                replies,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<SpoolId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, id: u64) -> usize {
        self.calls().iter().filter(|c| **c == SpoolId(id)).count()
    }
}

#[async_trait]
impl InventoryApi for FakeInventory {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_spool(&self, id: SpoolId) -> Result<SpoolRecord, FetchError> {
        self.calls.lock().unwrap().push(id);

        let (delay, reply) = {
            let mut plans = self.plans.lock().unwrap();
            match plans.get_mut(&id) {
                Some(plan) => {
                    let reply = if plan.replies.len() > 1 {
                        plan.replies.remove(0)
                    } else {
                        plan.replies[0].clone()
                    };
                    (plan.delay, reply)
                }
                None => (Duration::ZERO, Err(FetchError::NotFound)),
            }
        };

        tokio::time::sleep(delay).await;
        reply
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Records every script; can simulate a missing macro or a failing variable
#[derive(Default)]
pub struct RecordingSink {
    scripts: Mutex<Vec<String>>,
    missing_macro: bool,
    failing_variable: Option<&'static str>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_macro() -> Self {
        Self {
            missing_macro: true,
            ..Default::default()
        }
    }

    pub fn failing_on(variable: &'static str) -> Self {
        Self {
            failing_variable: Some(variable),
            ..Default::default()
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// The most recent six scripts
    pub fn last_write(&self) -> Vec<String> {
        let scripts = self.scripts();
        scripts[scripts.len().saturating_sub(6)..].to_vec()
    }
}

#[async_trait]
impl GcodeSink for RecordingSink {
    async fn run_gcode(&self, script: &str) -> Result<(), GcodeError> {
        self.scripts.lock().unwrap().push(script.to_string());

        if self.missing_macro {
            return Err(GcodeError::TargetMissing(format!(
                "The value '{}' is not valid for MACRO",
                MACRO
            )));
        }
        if let Some(variable) = self.failing_variable {
            if script.contains(&format!("VARIABLE={} ", variable)) {
                return Err(GcodeError::Failed(format!(
                    "Unknown gcode_macro variable '{}'",
                    variable
                )));
            }
        }
        Ok(())
    }
}

/// Host that accepts scripts and never answers
#[derive(Default)]
pub struct HangingSink {
    scripts: Mutex<Vec<String>>,
}

impl HangingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GcodeSink for HangingSink {
    async fn run_gcode(&self, script: &str) -> Result<(), GcodeError> {
        self.scripts.lock().unwrap().push(script.to_string());
        std::future::pending().await
    }
}

/// Active spool lookup answering from a queue of replies; the last repeats
pub struct FakeActiveSpool {
    replies: Mutex<Vec<Result<Option<SpoolId>, String>>>,
    calls: Mutex<usize>,
}

impl FakeActiveSpool {
    pub fn new(replies: Vec<Result<Option<SpoolId>, String>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(0),
        }
    }

    pub fn fixed(id: Option<u64>) -> Self {
        Self::new(vec![Ok(id.map(SpoolId))])
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ActiveSpoolSource for FakeActiveSpool {
    async fn active_spool_id(&self) -> Result<Option<SpoolId>> {
        *self.calls.lock().unwrap() += 1;
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        };
        reply.map_err(|e| anyhow::anyhow!(e))
    }
}

pub fn reconciler(inventory: Arc<FakeInventory>, sink: Arc<RecordingSink>) -> Reconciler {
    let writer = VariableWriter::new(sink, MACRO);
    Reconciler::new(inventory, writer, fast_policy())
}
