//! Per-session inbound loop: client lines → egress events.
//!
//! States: active until the framer reports closure, a read or write fails,
//! or the registry raises the close signal. Leaving the active state asks
//! the registry to finalize the session, unless the registry already did.

use std::sync::Arc;

use kingdom_shared::time::Clock;
use tokio::{
    io::AsyncRead,
    sync::{mpsc, watch},
};

use crate::{
    domain::{DisconnectReason, EventType, Session},
    infrastructure::framer::{Frame, LineFramer},
};

use super::{egress::EgressQueue, registry::RegistryHandle, wait_closed, writer::OutboundFrame};

/// What happened to one forwarded line
#[derive(Debug, PartialEq, Eq)]
enum LineOutcome {
    Continue,
    /// The registry finalized the session meanwhile
    Closed,
    WriteFailed,
}

pub struct InboundRelay<R> {
    session: Session,
    framer: LineFramer<R>,
    registry: RegistryHandle,
    egress: EgressQueue,
    outbound: mpsc::Sender<OutboundFrame>,
    closed: watch::Receiver<bool>,
    clock: Arc<dyn Clock>,
    echo: bool,
}

impl<R: AsyncRead + Unpin> InboundRelay<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Session,
        framer: LineFramer<R>,
        registry: RegistryHandle,
        egress: EgressQueue,
        outbound: mpsc::Sender<OutboundFrame>,
        closed: watch::Receiver<bool>,
        clock: Arc<dyn Clock>,
        echo: bool,
    ) -> Self {
        Self {
            session,
            framer,
            registry,
            egress,
            outbound,
            closed,
            clock,
            echo,
        }
    }

    pub async fn run(mut self) {
        let id = self.session.id;

        loop {
            if *self.closed.borrow() {
                break;
            }

            let frame = tokio::select! {
                biased;
                _ = wait_closed(&mut self.closed) => break,
                frame = self.framer.next_frame() => frame,
            };

            match frame {
                Ok(Frame::Line(line)) => match self.handle_line(line).await {
                    LineOutcome::Continue => {}
                    LineOutcome::Closed => break,
                    LineOutcome::WriteFailed => {
                        self.registry.disconnect(id, DisconnectReason::WriteError);
                        break;
                    }
                },
                Ok(Frame::Overflow { discarded }) => {
                    tracing::warn!(
                        "Dropped oversized line ({} bytes) from {}",
                        discarded,
                        self.session
                    );
                }
                Ok(Frame::Closed) => {
                    self.registry.disconnect(id, DisconnectReason::PeerClosed);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Read from {} failed: {}", self.session, e);
                    self.registry.disconnect(id, DisconnectReason::ReadError);
                    break;
                }
            }
        }

        tracing::debug!("Inbound relay for {} stopped", id);
    }

    async fn handle_line(&mut self, line: String) -> LineOutcome {
        let now = self.clock.now();

        // blank input is a no-op command
        if line.is_empty() {
            self.registry.touch(self.session.id, now, false);
            return LineOutcome::Continue;
        }

        // finalized while this line was being read: its disconnect event is already out
        if *self.closed.borrow() {
            return LineOutcome::Closed;
        }

        tracing::info!("{}: {}", self.session, line);
        let echo = self.echo.then(|| format!("You sent: {}", line));
        self.egress.emit(&self.session, EventType::GameCommand, Some(line));
        self.registry.touch(self.session.id, now, true);

        match echo {
            Some(text) => self.acknowledge(text).await,
            None => LineOutcome::Continue,
        }
    }

    /// Queue `text` and wait until it is flushed to the socket.
    async fn acknowledge(&mut self, text: String) -> LineOutcome {
        let (frame, flushed) = OutboundFrame::acknowledged(text);
        let outbound = &self.outbound;
        let closed = &mut self.closed;

        tokio::select! {
            biased;
            _ = wait_closed(closed) => LineOutcome::Closed,
            delivered = async {
                outbound.send(frame).await.is_ok() && flushed.await.is_ok()
            } => {
                if delivered {
                    LineOutcome::Continue
                } else {
                    LineOutcome::WriteFailed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::EgressEvent,
        relay::{registry::RegistryCommand, writer::outbound_channel},
    };
    use kingdom_shared::time::FixedClock;
    use tokio::io::AsyncWriteExt;

    struct Harness {
        session: Session,
        commands: mpsc::UnboundedReceiver<RegistryCommand>,
        egress: mpsc::UnboundedReceiver<EgressEvent>,
        outbound_rx: mpsc::Receiver<OutboundFrame>,
        close_tx: watch::Sender<bool>,
        client: tokio::io::DuplexStream,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(echo: bool) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_unix_secs(42));
        let session = Session::new("10.0.0.5:7777".parse().unwrap(), clock.now());
        let (registry, commands) = RegistryHandle::detached();
        let (egress, egress_rx) = EgressQueue::new("telnet", clock.clone());
        let (outbound_tx, outbound_rx) = outbound_channel(4);
        let (close_tx, close_rx) = watch::channel(false);
        let (client, server) = tokio::io::duplex(256);

        let relay = InboundRelay::new(
            session.clone(),
            LineFramer::new(server, 64),
            registry,
            egress,
            outbound_tx,
            close_rx,
            clock,
            echo,
        );
        Harness {
            session,
            commands,
            egress: egress_rx,
            outbound_rx,
            close_tx,
            client,
            task: tokio::spawn(relay.run()),
        }
    }

    #[tokio::test]
    async fn test_lines_are_forwarded_in_order_then_eof_disconnects() {
        // テスト項目: 受信行が順番通りに game_command として転送され、EOF で切断が依頼される
        // given (前提条件):
        let mut h = start(false);

        // when (操作):
        h.client.write_all(b"look\r\nnorth\r\n").await.unwrap();
        drop(h.client);
        h.task.await.unwrap();

        // then (期待する結果):
        let first = h.egress.recv().await.unwrap();
        let second = h.egress.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::GameCommand);
        assert_eq!(first.content.as_deref(), Some("look"));
        assert_eq!(first.client_ip.to_string(), "10.0.0.5");
        assert_eq!(second.content.as_deref(), Some("north"));
        assert!(second.timestamp >= first.timestamp);

        let mut disconnect = None;
        while let Ok(command) = h.commands.try_recv() {
            if let RegistryCommand::Disconnect { id, reason } = command {
                disconnect = Some((id, reason));
            }
        }
        assert_eq!(
            disconnect,
            Some((h.session.id, DisconnectReason::PeerClosed))
        );
    }

    #[tokio::test]
    async fn test_blank_line_only_touches_activity() {
        // テスト項目: 空行は転送されず、アクティビティだけが更新される
        // given (前提条件):
        let mut h = start(false);

        // when (操作):
        h.client.write_all(b"\r\n").await.unwrap();
        drop(h.client);
        h.task.await.unwrap();

        // then (期待する結果):
        assert!(h.egress.try_recv().is_err());
        match h.commands.recv().await {
            Some(RegistryCommand::Touch { id, command, .. }) => {
                assert_eq!(id, h.session.id);
                assert!(!command);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_signal_stops_loop_without_second_disconnect() {
        // テスト項目: レジストリからの切断通知でループが終了し、切断を再依頼しない
        // given (前提条件):
        let mut h = start(false);

        // when (操作):
        h.close_tx.send(true).unwrap();
        h.task.await.unwrap();

        // then (期待する結果):
        while let Ok(command) = h.commands.try_recv() {
            assert!(!matches!(command, RegistryCommand::Disconnect { .. }));
        }
        drop(h.client);
    }

    #[tokio::test]
    async fn test_echo_waits_for_flush() {
        // テスト項目: echo 有効時は確認応答の flush を待ってから次の行を読む
        // given (前提条件):
        let mut h = start(true);

        // when (操作):
        h.client.write_all(b"look\n").await.unwrap();
        let frame = h.outbound_rx.recv().await.unwrap();

        // then (期待する結果):
        assert_eq!(frame.text(), "You sent: look");
        assert_eq!(
            h.egress.recv().await.unwrap().content.as_deref(),
            Some("look")
        );
        drop(frame); // flush never confirmed: treated as a write failure
        h.task.await.unwrap();
        let mut reasons = Vec::new();
        while let Ok(command) = h.commands.try_recv() {
            if let RegistryCommand::Disconnect { reason, .. } = command {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec![DisconnectReason::WriteError]);
        drop(h.client);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        // テスト項目: 上限超過の行は破棄され、後続の行は転送される
        let mut h = start(false);

        let mut input = vec![b'z'; 200];
        input.extend_from_slice(b"\nsay hi\n");
        h.client.write_all(&input).await.unwrap();
        drop(h.client);
        h.task.await.unwrap();

        let event = h.egress.recv().await.unwrap();
        assert_eq!(event.content.as_deref(), Some("say hi"));
        assert!(h.egress.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_line_read_after_finalize_is_not_forwarded() {
        // テスト項目: 確定処理と競合して読まれた行は disconnect の後に game_command として送られない
        // given (前提条件):
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_unix_secs(42));
        let session = Session::new("10.0.0.5:7777".parse().unwrap(), clock.now());
        let (registry, mut commands) = RegistryHandle::detached();
        let (egress, mut egress_rx) = EgressQueue::new("telnet", clock.clone());
        let (outbound_tx, _outbound_rx) = outbound_channel(4);
        let (close_tx, close_rx) = watch::channel(false);
        let (_client, server) = tokio::io::duplex(256);
        let mut relay = InboundRelay::new(
            session,
            LineFramer::new(server, 64),
            registry,
            egress,
            outbound_tx,
            close_rx,
            clock,
            false,
        );

        // when (操作):
        close_tx.send(true).unwrap();
        let outcome = relay.handle_line("look".to_string()).await;

        // then (期待する結果):
        assert_eq!(outcome, LineOutcome::Closed);
        assert!(egress_rx.try_recv().is_err());
        assert!(commands.try_recv().is_err());
    }
}
