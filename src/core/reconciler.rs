//! Reconciler: the sequence-guarded fetch-and-apply state machine.
//!
//! Every change event starts its own fetch; older fetches are never
//! cancelled. When a fetch completes, its result is applied only if its
//! sequence is not older than the last applied one. This monotonic guard
//! is the only ordering mechanism: concurrent fetches may finish in any
//! order, but once a result is applied nothing older can replace it.
//!
//! All state lives in one task. Fetches are polled from a
//! `FuturesUnordered` on the same loop that receives events, so the state
//! is only touched between suspension points and needs no locks.

use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{FetchError, InventoryApi};
use crate::domain::{ChangeEvent, ResolvedSchema, SpoolId, SpoolRecord};

use super::retry::RetryPolicy;
use super::writer::{VariableWriter, WriteReport};

/// What the reconciler is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No fetch outstanding
    Idle,

    /// At least one fetch outstanding; carries the newest sequence
    Fetching(u64),

    /// Writing the result of this sequence
    Applying(u64),
}

/// Reconciler bookkeeping. Lives for the process lifetime; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerState {
    /// Sequence of the last applied result (0 before the first apply)
    pub last_applied_sequence: u64,

    /// Record id of the last applied result
    pub last_applied_record_id: Option<SpoolId>,

    /// Newest sequence whose fetch was launched and is still outstanding
    pub in_flight_sequence: Option<u64>,

    pub phase: Phase,
}

impl Default for ReconcilerState {
    fn default() -> Self {
        Self {
            last_applied_sequence: 0,
            last_applied_record_id: None,
            in_flight_sequence: None,
            phase: Phase::Idle,
        }
    }
}

/// A finished fetch, tagged with the event that triggered it
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub event: ChangeEvent,

    /// `Ok(None)` means there is no record: no spool selected, or not found
    pub result: Result<Option<SpoolRecord>, FetchError>,

    /// Attempts made (0 when no fetch was needed)
    pub attempts: u32,
}

/// What happened to a completed fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The result was written to the macro variables
    Applied(WriteReport),

    /// A newer result was already applied; discarded
    Stale,

    /// The fetch failed for good; previous state left untouched
    Abandoned,
}

/// Fetch a record, retrying transient failures.
///
/// Not-found resolves to `Ok(None)` immediately. Returns the number of
/// attempts alongside the result.
pub async fn fetch_record(
    inventory: &dyn InventoryApi,
    policy: &RetryPolicy,
    id: SpoolId,
) -> (Result<Option<SpoolRecord>, FetchError>, u32) {
    let timeout = policy.attempt_timeout();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(timeout, inventory.fetch_spool(id)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "attempt timed out after {:?}",
                timeout
            ))),
        };

        match result {
            Ok(record) => return (Ok(Some(record)), attempt),
            Err(FetchError::NotFound) => {
                info!(
                    adapter = inventory.name(),
                    spool_id = %id,
                    "Spool not found, treating as no spool"
                );
                return (Ok(None), attempt);
            }
            Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.jittered_delay(attempt, &mut rand::thread_rng());
                warn!(
                    adapter = inventory.name(),
                    spool_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Spool fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

/// The synchronization core
pub struct Reconciler {
    inventory: Arc<dyn InventoryApi>,
    writer: VariableWriter,
    policy: RetryPolicy,
    state: ReconcilerState,
    applied: Option<ResolvedSchema>,
    in_flight: FuturesUnordered<BoxFuture<'static, FetchOutcome>>,
}

enum Step {
    Event(Option<ChangeEvent>),
    Completed(FetchOutcome),
}

impl Reconciler {
    pub fn new(inventory: Arc<dyn InventoryApi>, writer: VariableWriter, policy: RetryPolicy) -> Self {
        Self {
            inventory,
            writer,
            policy,
            state: ReconcilerState::default(),
            applied: None,
            in_flight: FuturesUnordered::new(),
        }
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    /// Last schema written, if any
    pub fn applied(&self) -> Option<&ResolvedSchema> {
        self.applied.as_ref()
    }

    pub fn writer(&self) -> &VariableWriter {
        &self.writer
    }

    /// Number of fetches still outstanding
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Start a fetch for an event. The newest event always becomes the
    /// in-flight marker; older fetches keep running.
    pub fn submit(&mut self, event: ChangeEvent) {
        let seq = event.sequence;
        debug!(seq, spool_id = ?event.record_id, kind = ?event.kind, "Launching fetch");

        self.state.in_flight_sequence = Some(seq);
        self.state.phase = Phase::Fetching(seq);

        let fetch = match event.record_id {
            None => future::ready(FetchOutcome {
                event,
                result: Ok(None),
                attempts: 0,
            })
            .boxed(),
            Some(id) => {
                let inventory = Arc::clone(&self.inventory);
                let policy = self.policy.clone();
                async move {
                    let (result, attempts) = fetch_record(inventory.as_ref(), &policy, id).await;
                    FetchOutcome {
                        event,
                        result,
                        attempts,
                    }
                }
                .boxed()
            }
        };

        self.in_flight.push(fetch);
    }

    /// Wait for the next outstanding fetch; `None` when nothing is in flight
    pub async fn next_outcome(&mut self) -> Option<FetchOutcome> {
        self.in_flight.next().await
    }

    /// Decide what to do with a finished fetch
    pub async fn complete(&mut self, outcome: FetchOutcome) -> Disposition {
        let seq = outcome.event.sequence;

        if seq < self.state.last_applied_sequence {
            debug!(
                seq,
                last_applied = self.state.last_applied_sequence,
                "Discarding stale fetch result"
            );
            self.settle();
            return Disposition::Stale;
        }

        let (schema, record_id) = match outcome.result {
            Ok(record) => (ResolvedSchema::resolve(record.as_ref()), outcome.event.record_id),
            Err(e) if outcome.event.is_ready() && self.state.last_applied_sequence == 0 => {
                warn!(
                    seq,
                    attempts = outcome.attempts,
                    error = %e,
                    "Initial spool load failed, clearing macro variables"
                );
                (ResolvedSchema::all_null(), None)
            }
            Err(e) => {
                error!(
                    seq,
                    spool_id = ?outcome.event.record_id,
                    attempts = outcome.attempts,
                    error = %e,
                    "Spool fetch abandoned, keeping last applied state"
                );
                self.settle();
                return Disposition::Abandoned;
            }
        };

        self.state.phase = Phase::Applying(seq);
        let report = self.writer.write(&schema).await;

        self.state.last_applied_sequence = seq;
        self.state.last_applied_record_id = record_id;
        self.applied = Some(schema);
        info!(seq, spool_id = ?record_id, "Applied spool state");

        self.settle();
        Disposition::Applied(report)
    }

    /// Return to `Idle`, or back to `Fetching` if fetches are outstanding
    fn settle(&mut self) {
        match self.state.in_flight_sequence {
            Some(seq) if !self.in_flight.is_empty() => self.state.phase = Phase::Fetching(seq),
            _ => {
                self.state.in_flight_sequence = None;
                self.state.phase = Phase::Idle;
            }
        }
    }

    /// Process events until the stream closes and outstanding fetches have
    /// drained. Returns the reconciler so callers can inspect final state.
    #[instrument(skip_all, name = "reconciler")]
    pub async fn run(mut self, mut events: mpsc::Receiver<ChangeEvent>) -> Self {
        let mut open = true;

        loop {
            let step = tokio::select! {
                event = events.recv(), if open => Step::Event(event),
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    Step::Completed(outcome)
                }
                else => break,
            };

            match step {
                Step::Event(Some(event)) => self.submit(event),
                Step::Event(None) => {
                    debug!(pending = self.in_flight.len(), "Event stream closed, draining fetches");
                    open = false;
                }
                Step::Completed(outcome) => {
                    self.complete(outcome).await;
                }
            }
        }

        info!(
            last_applied_sequence = self.state.last_applied_sequence,
            "Reconciler stopped"
        );
        self
    }
}
