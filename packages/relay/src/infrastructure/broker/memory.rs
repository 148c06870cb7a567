//! In-process broker.
//!
//! Ingress payloads are stored as raw JSON so `poll` decodes exactly like the
//! Redis source does. Clones share the same lists.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::domain::{BrokerError, EgressEvent, EventPublisher, EventSource, IngressEvent};

#[derive(Default)]
struct Lists {
    ingress: VecDeque<String>,
    egress: Vec<EgressEvent>,
}

#[derive(Default)]
struct Shared {
    lists: Mutex<Lists>,
    ingress_ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory broker with an ingress FIFO and a recorded egress list.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an ingress event as the game server would.
    pub fn push_ingress(&self, event: &IngressEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(event)?;
        self.push_ingress_raw(payload);
        Ok(())
    }

    /// Queue a raw ingress payload, malformed or not.
    pub fn push_ingress_raw(&self, payload: impl Into<String>) {
        self.shared.lock().ingress.push_back(payload.into());
        self.shared.ingress_ready.notify_one();
    }

    pub fn pending_ingress(&self) -> usize {
        self.shared.lock().ingress.len()
    }

    /// Snapshot of every egress event published so far, in order.
    pub fn egress(&self) -> Vec<EgressEvent> {
        self.shared.lock().egress.clone()
    }

    /// Remove and return every egress event published so far.
    pub fn drain_egress(&self) -> Vec<EgressEvent> {
        std::mem::take(&mut self.shared.lock().egress)
    }

    /// Wait until at least `count` egress events were published or `timeout` elapses.
    pub async fn wait_for_egress(&self, count: usize, timeout: Duration) -> Vec<EgressEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.egress();
            if events.len() >= count || Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event: &EgressEvent) -> Result<(), BrokerError> {
        self.shared.lock().egress.push(event.clone());
        Ok(())
    }
}

impl EventSource for InMemoryBroker {
    fn poll(&mut self, timeout: Duration) -> Result<Option<IngressEvent>, BrokerError> {
        let guard = self.shared.lock();
        let (mut guard, _) = self
            .shared
            .ingress_ready
            .wait_timeout_while(guard, timeout, |lists| lists.ingress.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match guard.ingress.pop_front() {
            Some(payload) => Ok(Some(IngressEvent::from_json(&payload)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, Instruction, Session, SessionId};
    use chrono::Utc;

    #[test]
    fn test_poll_returns_events_in_fifo_order() {
        // テスト項目: ingress イベントが投入順に取り出される
        // given (前提条件):
        let mut broker = InMemoryBroker::new();
        let id = SessionId::generate();
        broker.push_ingress(&IngressEvent::message(id, "first")).unwrap();
        broker.push_ingress(&IngressEvent::disconnect(id)).unwrap();

        // when (操作):
        let first = broker.poll(Duration::from_millis(10)).unwrap().unwrap();
        let second = broker.poll(Duration::from_millis(10)).unwrap().unwrap();

        // then (期待する結果):
        assert_eq!(first.content.as_deref(), Some("first"));
        assert_eq!(second.instruction, Instruction::Disconnect);
        assert_eq!(broker.pending_ingress(), 0);
    }

    #[test]
    fn test_poll_times_out_without_event() {
        // テスト項目: イベントが無い場合はタイムアウト後に None が返る
        // given (前提条件):
        let mut broker = InMemoryBroker::new();
        let started = Instant::now();

        // when (操作):
        let result = broker.poll(Duration::from_millis(50)).unwrap();

        // then (期待する結果):
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_poll_wakes_up_when_event_arrives() {
        // テスト項目: 待機中に投入されたイベントで poll が起床する
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let mut source = broker.clone();
        let id = SessionId::generate();

        // when (操作):
        let poller = std::thread::spawn(move || source.poll(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        broker.push_ingress(&IngressEvent::message(id, "hello")).unwrap();
        let result = poller.join().unwrap().unwrap();

        // then (期待する結果):
        assert_eq!(result.unwrap().content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_malformed_payload_is_a_payload_error() {
        // テスト項目: 不正な JSON はペイロードエラーとして報告され、キューから取り除かれる
        // given (前提条件):
        let mut broker = InMemoryBroker::new();
        broker.push_ingress_raw("{not json");

        // when (操作):
        let result = broker.poll(Duration::from_millis(10));

        // then (期待する結果):
        assert!(result.unwrap_err().is_payload_error());
        assert_eq!(broker.pending_ingress(), 0);
    }

    #[tokio::test]
    async fn test_publish_records_egress_events() {
        // テスト項目: publish したイベントが記録され、drain で取り出せる
        // given (前提条件):
        let broker = InMemoryBroker::new();
        let session = Session::new("127.0.0.1:5000".parse().unwrap(), Utc::now());
        let event = EgressEvent::new(1, "telnet", &session, EventType::NewConnection, None);

        // when (操作):
        broker.publish(&event).await.unwrap();

        // then (期待する結果):
        assert_eq!(broker.drain_egress(), vec![event]);
        assert!(broker.egress().is_empty());
    }
}
