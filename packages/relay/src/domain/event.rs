//! Broker events.
//!
//! Egress events flow from a session toward the broker; ingress events flow
//! from the broker toward one or more sessions. Both travel as JSON.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::session::{Session, SessionId};

/// Egress event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewConnection,
    GameCommand,
    Disconnect,
}

/// Session → broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressEvent {
    /// Unix seconds
    pub timestamp: i64,
    /// Identifies this relay instance
    pub client_type: String,
    pub client_ip: IpAddr,
    pub session_id: SessionId,
    pub content: Option<String>,
    pub event_type: EventType,
}

impl EgressEvent {
    pub fn new(
        timestamp: i64,
        client_type: impl Into<String>,
        session: &Session,
        event_type: EventType,
        content: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            client_type: client_type.into(),
            client_ip: session.remote_address(),
            session_id: session.id,
            content,
            event_type,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Instruction carried by an ingress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    #[default]
    Message,
    Disconnect,
}

/// Addressee of an ingress event: one id, or an explicit list for fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    One(String),
    Many(Vec<String>),
}

impl Target {
    /// Resolve to well-formed session ids, dropping duplicates and malformed entries.
    ///
    /// Matching is by exact id equality; no substring or prefix matching.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let raw: Vec<&str> = match self {
            Target::One(id) => vec![id.as_str()],
            Target::Many(ids) => ids.iter().map(String::as_str).collect(),
        };

        let mut ids: Vec<SessionId> = Vec::with_capacity(raw.len());
        for candidate in raw {
            match candidate.parse::<SessionId>() {
                Ok(id) if !ids.contains(&id) => ids.push(id),
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring ingress target: {}", e),
            }
        }
        ids
    }
}

/// Broker → session(s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressEvent {
    #[serde(alias = "user_id")]
    pub session_id: Target,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub instruction: Instruction,
}

impl IngressEvent {
    pub fn message(target: SessionId, content: impl Into<String>) -> Self {
        Self {
            session_id: Target::One(target.to_string()),
            content: Some(content.into()),
            instruction: Instruction::Message,
        }
    }

    pub fn disconnect(target: SessionId) -> Self {
        Self {
            session_id: Target::One(target.to_string()),
            content: None,
            instruction: Instruction::Disconnect,
        }
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
