//! Outbound bridge: broker → sessions.
//!
//! Runs on its own OS thread because polling the broker blocks. The bridge
//! never touches sockets or the session map; it turns each ingress event
//! into `Deliver` / `Disconnect` commands for the registry actor, which
//! applies them in the order they were posted.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crate::domain::{DisconnectReason, EventSource, IngressEvent, Instruction};

use super::registry::RegistryHandle;

/// Log every n-th consecutive failed poll after the first
const OUTAGE_LOG_EVERY: u64 = 30;

pub struct OutboundBridge {
    source: Box<dyn EventSource>,
    registry: RegistryHandle,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl OutboundBridge {
    pub fn new(
        source: Box<dyn EventSource>,
        registry: RegistryHandle,
        shutdown: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            shutdown,
            poll_timeout,
        }
    }

    /// Run the bridge on a dedicated thread named `outbound-bridge`.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("outbound-bridge".to_string())
            .spawn(move || self.run())
    }

    /// Poll until the shutdown flag is raised or the registry stops.
    ///
    /// The flag is checked before every poll, so shutdown latency is bounded
    /// by the poll timeout.
    pub fn run(mut self) {
        tracing::info!("Outbound bridge started");
        let mut failures: u64 = 0;

        while !self.shutdown.load(Ordering::Acquire) && !self.registry.is_closed() {
            match self.source.poll(self.poll_timeout) {
                Ok(event) => {
                    if failures > 0 {
                        tracing::info!("Broker reachable again after {} failed poll(s)", failures);
                        failures = 0;
                    }
                    if let Some(event) = event {
                        self.dispatch(event);
                    }
                }
                Err(e) if e.is_payload_error() => {
                    tracing::warn!("Skipping malformed ingress event: {}", e);
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 || failures % OUTAGE_LOG_EVERY == 0 {
                        tracing::warn!("Broker poll failed ({} in a row): {}", failures, e);
                    }
                    thread::sleep(self.poll_timeout);
                }
            }
        }

        tracing::info!("Outbound bridge stopped");
    }

    /// Turn one ingress event into registry commands; returns the number of addressed ids.
    ///
    /// Content is queued before a disconnect so the last words still reach the client.
    pub fn dispatch(&self, event: IngressEvent) -> usize {
        let ids = event.session_id.session_ids();
        if ids.is_empty() {
            tracing::debug!("Ingress event addresses no session, ignoring");
            return 0;
        }

        if let Some(content) = event.content {
            tracing::debug!("Delivering to {} session(s)", ids.len());
            self.registry.deliver(ids.clone(), content);
        }
        if event.instruction == Instruction::Disconnect {
            for id in &ids {
                self.registry.disconnect(*id, DisconnectReason::Broker);
            }
        }
        ids.len()
    }
}
