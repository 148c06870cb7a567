//! Shared state of the admin HTTP API.

use crate::relay::RegistryHandle;

/// Shared application state
pub struct AppState {
    /// Registry actor handle; every read goes through it
    pub registry: RegistryHandle,
}
