//! Mapping from registry sessions to admin API DTOs.

use kingdom_shared::time::to_rfc3339;

use crate::domain::Session;
use crate::infrastructure::dto::http as dto;

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&Session> for dto::SessionDto {
    fn from(model: &Session) -> Self {
        Self {
            id: model.id.to_string(),
            remote_address: model.remote_address().to_string(),
            remote_port: model.remote_port(),
            active: model.active,
            authenticated: model.authenticated,
            connected_at: to_rfc3339(model.connected_at),
            last_activity_at: to_rfc3339(model.last_activity_at),
            last_command_at: model.last_command_at.map(to_rfc3339),
        }
    }
}

impl From<Vec<Session>> for dto::SessionListDto {
    fn from(mut sessions: Vec<Session>) -> Self {
        sessions.sort_by_key(|s| (s.connected_at, s.id.to_string()));
        let sessions: Vec<dto::SessionDto> = sessions.iter().map(dto::SessionDto::from).collect();
        Self {
            count: sessions.len(),
            sessions,
        }
    }
}
