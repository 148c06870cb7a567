//! Wall-clock access behind a trait so session timestamps can be pinned in tests.

use chrono::{DateTime, TimeZone, Utc};

/// Source of "now" for session activity and egress timestamps
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix timestamp in seconds
    fn now_unix_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Reads the host clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock at the given Unix timestamp (seconds).
    ///
    /// Out-of-range values clamp to the Unix epoch.
    pub fn from_unix_secs(secs: i64) -> Self {
        let at = Utc
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}

/// Convert a UTC instant to RFC 3339 with second precision
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
