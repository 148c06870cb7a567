//! Session: server-side state for one accepted TCP connection.

use std::{fmt, net::SocketAddr, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SessionIdError;

/// Opaque session identifier, generated at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SessionIdError::Invalid(s.to_string()))
    }
}

/// Why a session was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the stream
    PeerClosed,
    /// Read side failed
    ReadError,
    /// Write side failed
    WriteError,
    /// Broker sent a disconnect instruction
    Broker,
    /// Relay is shutting down
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::PeerClosed => "peer closed",
            DisconnectReason::ReadError => "read error",
            DisconnectReason::WriteError => "write error",
            DisconnectReason::Broker => "broker instruction",
            DisconnectReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Per-connection state.
///
/// Mutated only by the registry actor; other tasks hold copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Peer address captured at accept time
    pub remote: SocketAddr,
    /// Cleared once the session is finalized
    pub active: bool,
    /// Reserved for a login flow; always false for now
    pub authenticated: bool,
    pub connected_at: DateTime<Utc>,
    /// Updated on every inbound line, blank lines included
    pub last_activity_at: DateTime<Utc>,
    /// Updated on every forwarded command
    pub last_command_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(remote: SocketAddr, connected_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            remote,
            active: true,
            authenticated: false,
            connected_at,
            last_activity_at: connected_at,
            last_command_at: None,
        }
    }

    pub fn remote_address(&self) -> std::net::IpAddr {
        self.remote.ip()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote.port()
    }

    /// Record inbound activity. `command` marks a forwarded (non-blank) line.
    ///
    /// Timestamps never move backwards.
    pub fn touch(&mut self, at: DateTime<Utc>, command: bool) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
        if command {
            self.last_command_at = Some(match self.last_command_at {
                Some(prev) if prev > at => prev,
                _ => at,
            });
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn peer() -> SocketAddr {
        "203.0.113.7:50123".parse().unwrap()
    }

    #[test]
    fn test_new_session_is_active_and_unauthenticated() {
        // テスト項目: 新しいセッションは有効かつ未認証で作成される
        // given (前提条件):
        let now = Utc::now();

        // when (操作):
        let session = Session::new(peer(), now);

        // then (期待する結果):
        assert!(session.active);
        assert!(!session.authenticated);
        assert_eq!(session.remote_address().to_string(), "203.0.113.7");
        assert_eq!(session.remote_port(), 50123);
        assert_eq!(session.last_activity_at, now);
        assert_eq!(session.last_command_at, None);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        // テスト項目: セッション ID が一意に生成される
        // given (前提条件):
        let now = Utc::now();

        // when (操作):
        let a = Session::new(peer(), now);
        let b = Session::new(peer(), now);

        // then (期待する結果):
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_session_id_round_trips_through_string() {
        // テスト項目: 文字列表現から同じ ID が復元できる
        // given (前提条件):
        let id = SessionId::generate();

        // when (操作):
        let parsed: SessionId = id.to_string().parse().unwrap();

        // then (期待する結果):
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        // テスト項目: UUID でない文字列は拒否される
        let result = "abc".parse::<SessionId>();
        assert_eq!(result, Err(SessionIdError::Invalid("abc".to_string())));
    }

    #[test]
    fn test_touch_updates_activity_and_command_time() {
        // テスト項目: touch で最終アクティビティとコマンド時刻が更新される
        // given (前提条件):
        let start = Utc::now();
        let mut session = Session::new(peer(), start);
        let later = start + Duration::seconds(5);

        // when (操作):
        session.touch(later, false);
        let after_blank = session.clone();
        session.touch(later + Duration::seconds(1), true);

        // then (期待する結果):
        assert_eq!(after_blank.last_activity_at, later);
        assert_eq!(after_blank.last_command_at, None);
        assert_eq!(session.last_command_at, Some(later + Duration::seconds(1)));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        // テスト項目: 過去の時刻で touch しても時刻は巻き戻らない
        // given (前提条件):
        let start = Utc::now();
        let mut session = Session::new(peer(), start);

        // when (操作):
        session.touch(start - Duration::seconds(10), true);

        // then (期待する結果):
        assert_eq!(session.last_activity_at, start);
        assert_eq!(session.last_command_at, Some(start - Duration::seconds(10)));
    }
}
