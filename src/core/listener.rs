//! Event listener: turns bus notifications into sequenced change events.
//!
//! The listener assigns sequence numbers starting at 1 and never
//! deduplicates; ordering and staleness are the reconciler's job.
//!
//! - The first *klippy ready* becomes `Ready`, carrying the active spool
//!   looked up from the host.
//! - Later *klippy ready* notifications (Klipper restart, reconnect) become
//!   `RecordChanged` with a fresh lookup, so the variables are re-pushed.
//! - Every *active spool set* becomes `RecordChanged`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ActiveSpoolSource, BusNotification};
use crate::domain::{ChangeEvent, SpoolId};

use super::retry::RetryPolicy;

/// Outcome of looking up the active spool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Found(Option<SpoolId>),
    Failed,
}

/// Sequences notifications from the event bus
pub struct EventListener {
    active: Arc<dyn ActiveSpoolSource>,
    policy: RetryPolicy,
    last_sequence: u64,
    ready_emitted: bool,
}

impl EventListener {
    pub fn new(active: Arc<dyn ActiveSpoolSource>, policy: RetryPolicy) -> Self {
        Self {
            active,
            policy,
            last_sequence: 0,
            ready_emitted: false,
        }
    }

    /// Last sequence number handed out (0 before the first event)
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    /// Translate one notification; `None` when it produces no event
    pub async fn handle(&mut self, notification: BusNotification) -> Option<ChangeEvent> {
        match notification {
            BusNotification::KlippyReady => {
                let lookup = self.lookup_active_spool().await;

                if !self.ready_emitted {
                    self.ready_emitted = true;
                    // A failed startup lookup still emits Ready; the reconciler
                    // then clears the variables.
                    let record_id = match lookup {
                        Lookup::Found(id) => id,
                        Lookup::Failed => None,
                    };
                    let event = ChangeEvent::ready(self.next_sequence(), record_id);
                    info!(seq = event.sequence, spool_id = ?record_id, "Klippy ready");
                    return Some(event);
                }

                match lookup {
                    Lookup::Found(record_id) => {
                        let event = ChangeEvent::record_changed(self.next_sequence(), record_id);
                        info!(seq = event.sequence, spool_id = ?record_id, "Klippy ready again, re-syncing");
                        Some(event)
                    }
                    Lookup::Failed => {
                        warn!("Skipping re-sync, active spool unknown");
                        None
                    }
                }
            }
            BusNotification::ActiveSpoolSet(record_id) => {
                let event = ChangeEvent::record_changed(self.next_sequence(), record_id);
                match record_id {
                    Some(id) => info!(seq = event.sequence, spool_id = %id, "Active spool set"),
                    None => info!(seq = event.sequence, "Active spool cleared"),
                }
                Some(event)
            }
            BusNotification::Connected | BusNotification::Disconnected => {
                debug!(?notification, "Bus connection state changed");
                None
            }
        }
    }

    /// Query the active spool, retrying transient failures
    async fn lookup_active_spool(&self) -> Lookup {
        let timeout = self.policy.attempt_timeout();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match tokio::time::timeout(timeout, self.active.active_spool_id()).await {
                Ok(Ok(id)) => return Lookup::Found(id),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", timeout),
            };

            if !self.policy.should_retry(attempt) {
                warn!(attempt, %error, "Active spool lookup failed");
                return Lookup::Failed;
            }

            let delay = self.policy.jittered_delay(attempt, &mut rand::thread_rng());
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Active spool lookup failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Forward events until the bus or the reconciler goes away
    #[instrument(skip_all, name = "listener")]
    pub async fn run(
        mut self,
        mut notifications: mpsc::Receiver<BusNotification>,
        events: mpsc::Sender<ChangeEvent>,
    ) {
        while let Some(notification) = notifications.recv().await {
            if let Some(event) = self.handle(notification).await {
                if events.send(event).await.is_err() {
                    debug!("Reconciler gone, stopping listener");
                    break;
                }
            }
        }
        info!(last_sequence = self.last_sequence, "Listener stopped");
    }
}
