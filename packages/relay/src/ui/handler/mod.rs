//! HTTP handlers of the admin API.

pub mod http;

pub use http::{get_session, health_check, list_sessions};
