//! Egress path: session → broker.
//!
//! Every producer (acceptor, inbound relays, registry actor) pushes onto one
//! unbounded FIFO; a single publisher task drains it into the broker, so
//! events from one session reach the broker in the order they were emitted.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use kingdom_shared::time::Clock;
use tokio::sync::mpsc;

use crate::domain::{EgressEvent, EventPublisher, EventType, Session};

/// Log every n-th consecutive publish failure after the first
const FAILURE_LOG_EVERY: u64 = 50;

/// Cloneable producer handle for egress events.
#[derive(Clone)]
pub struct EgressQueue {
    tx: mpsc::UnboundedSender<EgressEvent>,
    client_kind: Arc<str>,
    clock: Arc<dyn Clock>,
    /// Highest timestamp handed out so far
    last_stamp: Arc<AtomicI64>,
}

impl EgressQueue {
    pub fn new(
        client_kind: impl Into<Arc<str>>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<EgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            client_kind: client_kind.into(),
            clock,
            last_stamp: Arc::new(AtomicI64::new(i64::MIN)),
        };
        (queue, rx)
    }

    /// Build and enqueue an event for `session`.
    ///
    /// Returns `false` once the publisher is gone.
    pub fn emit(&self, session: &Session, event_type: EventType, content: Option<String>) -> bool {
        let event = EgressEvent::new(
            self.stamp(),
            self.client_kind.as_ref(),
            session,
            event_type,
            content,
        );
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    "Egress queue closed, dropping {:?} for {}",
                    e.0.event_type,
                    session.id
                );
                false
            }
        }
    }

    /// Unix seconds, never lower than a previously issued stamp.
    fn stamp(&self) -> i64 {
        let now = self.clock.now_unix_secs();
        let previous = self.last_stamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}

/// Drain the egress FIFO into the broker until every producer is dropped.
///
/// Publish failures drop the event; the relay keeps serving clients while
/// the broker is down.
pub async fn run_publisher(
    mut rx: mpsc::UnboundedReceiver<EgressEvent>,
    publisher: Arc<dyn EventPublisher>,
) {
    let mut failures: u64 = 0;

    while let Some(event) = rx.recv().await {
        match publisher.publish(&event).await {
            Ok(()) => {
                if failures > 0 {
                    tracing::info!("Broker accepting egress again after {} failures", failures);
                    failures = 0;
                }
            }
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
                    tracing::warn!(
                        "Dropping {:?} event for {} (failure #{}): {}",
                        event.event_type,
                        event.session_id,
                        failures,
                        e
                    );
                }
            }
        }
    }

    tracing::debug!("Egress publisher stopped");
}
