//! Telnet-style relay between TCP clients and a game server reached through a message broker.
//!
//! Each accepted connection becomes a session. Lines typed by the client are
//! forwarded to the broker as egress events; ingress events popped from the
//! broker are written back to the addressed sessions.

// layers
pub mod domain;
pub mod infrastructure;
pub mod relay;
pub mod ui;

pub mod config;

pub use config::RelayConfig;
pub use ui::{Server, run_server};
