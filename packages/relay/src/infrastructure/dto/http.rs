//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};

/// One connected session as reported by `/api/sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDto {
    pub id: String,
    pub remote_address: String,
    pub remote_port: u16,
    pub active: bool,
    pub authenticated: bool,
    /// RFC 3339, UTC
    pub connected_at: String,
    pub last_activity_at: String,
    pub last_command_at: Option<String>,
}

/// Body of `/api/sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionListDto {
    pub count: usize,
    pub sessions: Vec<SessionDto>,
}
