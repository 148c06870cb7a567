//! Redis-backed broker lists.
//!
//! Egress events are `LPUSH`ed and ingress events `BRPOP`ed, so both lists
//! behave as FIFOs. Connections are opened lazily and dropped after any
//! command error; the next call reconnects.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Commands, aio::MultiplexedConnection};
use tokio::sync::Mutex;

use crate::domain::{BrokerError, EgressEvent, EventPublisher, EventSource, IngressEvent};

/// Smallest blocking window sent to `BRPOP`; zero would block forever.
const MIN_BLOCK_SECS: f64 = 0.1;

/// Grace on top of the poll timeout before the socket read gives up.
const READ_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

/// Upper bound for connecting and for one `LPUSH` round trip
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes egress events onto a Redis list.
pub struct RedisPublisher {
    client: redis::Client,
    key: String,
    connection: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisPublisher {
    pub fn new(url: &str, key: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            key: key.into(),
            connection: Mutex::new(None),
            timeout: PUBLISH_TIMEOUT,
        })
    }

    /// Override the connect and command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        let mut guard = self.connection.lock().await;
        if let Some(con) = guard.as_ref() {
            return Ok(con.clone());
        }
        let connecting = self.client.get_multiplexed_async_connection();
        let con = tokio::time::timeout(self.timeout, connecting)
            .await
            .map_err(|_| {
                BrokerError::Unavailable(format!("connect timed out after {:?}", self.timeout))
            })??;
        tracing::info!("Redis: egress connection established");
        *guard = Some(con.clone());
        Ok(con)
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: &EgressEvent) -> Result<(), BrokerError> {
        let payload = event.to_json()?;
        let mut con = self.connection().await?;

        let pushed: Result<redis::RedisResult<()>, _> =
            tokio::time::timeout(self.timeout, con.lpush(&self.key, payload)).await;
        let result = match pushed {
            Ok(result) => result.map_err(BrokerError::from),
            Err(_) => Err(BrokerError::Unavailable(format!(
                "LPUSH timed out after {:?}",
                self.timeout
            ))),
        };
        if result.is_err() {
            self.connection.lock().await.take();
        }
        result
    }
}

/// Pops ingress events from a Redis list with a blocking connection.
pub struct RedisSource {
    client: redis::Client,
    key: String,
    connection: Option<redis::Connection>,
}

impl RedisSource {
    pub fn new(url: &str, key: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            key: key.into(),
            connection: None,
        })
    }

    fn connection(&mut self, timeout: Duration) -> Result<&mut redis::Connection, BrokerError> {
        if self.connection.is_none() {
            let con = self
                .client
                .get_connection_with_timeout(timeout.max(Duration::from_millis(100)))?;
            con.set_read_timeout(Some(timeout + READ_TIMEOUT_SLACK))?;
            tracing::info!("Redis: ingress connection established");
            self.connection = Some(con);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| BrokerError::Unavailable("no ingress connection".to_string()))
    }
}

impl EventSource for RedisSource {
    fn poll(&mut self, timeout: Duration) -> Result<Option<IngressEvent>, BrokerError> {
        let key = self.key.clone();
        let block_secs = timeout.as_secs_f64().max(MIN_BLOCK_SECS);

        let con = self.connection(timeout)?;
        let popped: redis::RedisResult<Option<(String, String)>> = con.brpop(&key, block_secs);

        match popped {
            Ok(Some((_, payload))) => Ok(Some(IngressEvent::from_json(&payload)?)),
            Ok(None) => Ok(None),
            Err(e) => {
                self.connection = None;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        // テスト項目: 不正な URL ではクライアントを作成できない
        assert!(RedisPublisher::new("not a url", "egress").is_err());
        assert!(RedisSource::new("not a url", "ingress").is_err());
    }

    #[test]
    fn test_poll_against_unreachable_broker_is_not_a_payload_error() {
        // テスト項目: 到達できないブローカーへの poll は接続エラーとして報告される
        // given (前提条件):
        let mut source = RedisSource::new("redis://127.0.0.1:1/", "ingress").unwrap();

        // when (操作):
        let result = source.poll(Duration::from_millis(200));

        // then (期待する結果):
        let err = result.unwrap_err();
        assert!(!err.is_payload_error());
        assert!(source.connection.is_none());
    }

    #[tokio::test]
    async fn test_publish_to_silent_broker_times_out() {
        // テスト項目: 応答しないブローカーへの publish は設定したタイムアウトで失敗する
        // given (前提条件):
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let publisher = RedisPublisher::new(&format!("redis://{}/", addr), "egress")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let session =
            crate::domain::Session::new("127.0.0.1:4000".parse().unwrap(), chrono::Utc::now());
        let event = EgressEvent::new(
            0,
            "telnet",
            &session,
            crate::domain::EventType::NewConnection,
            None,
        );

        // when (操作):
        let result = tokio::time::timeout(Duration::from_secs(3), publisher.publish(&event)).await;

        // then (期待する結果):
        let err = result.expect("publish hung past its timeout").unwrap_err();
        assert!(!err.is_payload_error());
        assert!(publisher.connection.lock().await.is_none());
        silent.abort();
    }
}
