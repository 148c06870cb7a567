//! Connection lifecycle and cross-thread relay engine.
//!
//! ## Execution contexts
//!
//! - tokio runtime: acceptor, per-session inbound and writer tasks, the
//!   registry actor and the egress publisher.
//! - `outbound-bridge` thread: blocking broker polls. It only posts
//!   commands to the registry actor and never touches sockets.
//!
//! The registry actor is the single owner of session state. Every mutation,
//! delivery and finalization goes through its command queue.

pub mod acceptor;
pub mod bridge;
pub mod egress;
pub mod inbound;
pub mod registry;
pub mod writer;

pub use acceptor::{SessionContext, run_acceptor};
pub use bridge::OutboundBridge;
pub use egress::{EgressQueue, run_publisher};
pub use inbound::InboundRelay;
pub use registry::{RegistryCommand, RegistryHandle, SessionEntry, SessionRegistry, spawn_registry};
pub use writer::{CLOSE_DRAIN_GRACE, LINE_TERMINATOR, OutboundFrame, run_writer};

use tokio::sync::watch;

/// Resolve once the flag behind `rx` is raised or its sender is gone.
pub(crate) async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}
