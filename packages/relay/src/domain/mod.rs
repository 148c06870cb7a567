//! Domain model: sessions, broker events and the broker seams.

pub mod broker;
pub mod error;
pub mod event;
pub mod session;

pub use broker::{EventPublisher, EventSource};
#[cfg(test)]
pub use broker::MockEventSource;
pub use error::{BrokerError, RelayError, SessionIdError};
pub use event::{EgressEvent, EventType, IngressEvent, Instruction, Target};
pub use session::{DisconnectReason, Session, SessionId};
