//! Error types for the relay.

use thiserror::Error;

/// Broker access errors
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Redis command or connection failure
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload could not be encoded or decoded
    #[error("malformed broker payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Broker is not reachable
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    /// Whether the error concerns a single payload rather than the broker itself.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, BrokerError::Decode(_))
    }
}

/// Top-level relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Listener could not be bound; fatal at startup
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure outside a single session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bridge thread could not be started or joined
    #[error("outbound bridge error: {0}")]
    Bridge(String),
}

impl RelayError {
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        RelayError::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// Session id parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("invalid session id '{0}'")]
    Invalid(String),
}
