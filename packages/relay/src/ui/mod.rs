//! Outer surface: the relay server, its shutdown signal and the admin HTTP API.

mod handler;
mod server;
mod signal;
pub mod state;

pub use server::{Server, run_server};
pub use signal::shutdown_signal;
