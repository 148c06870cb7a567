//! Broker seams.
//!
//! The broker exposes two FIFO lists. The relay pushes egress events onto one
//! and pops ingress events from the other. Concrete implementations live in
//! the infrastructure layer.

use std::time::Duration;

use async_trait::async_trait;

use super::{BrokerError, EgressEvent, IngressEvent};

/// Producer side of the egress list.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Append one event to the egress list.
    async fn publish(&self, event: &EgressEvent) -> Result<(), BrokerError>;
}

/// Consumer side of the ingress list.
///
/// `poll` blocks the calling thread for at most `timeout`; it is only ever
/// called from the dedicated bridge thread.
#[cfg_attr(test, mockall::automock)]
pub trait EventSource: Send {
    /// Pop the next ingress event, or `Ok(None)` when the timeout elapses.
    fn poll(&mut self, timeout: Duration) -> Result<Option<IngressEvent>, BrokerError>;
}
