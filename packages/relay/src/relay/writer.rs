//! Outgoing delivery to one client socket.
//!
//! Each session owns a bounded queue of [`OutboundFrame`]s drained by a
//! writer task. The writer appends the line terminator, writes and flushes
//! every frame before taking the next one.

use std::time::Duration;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot, watch},
};

use crate::domain::{DisconnectReason, SessionId};

use super::{registry::RegistryHandle, wait_closed};

/// Canonical terminator appended to every outgoing line
pub const LINE_TERMINATOR: &str = "\r\n";

/// How long a closed session may keep flushing already queued lines
pub const CLOSE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// One outgoing line
#[derive(Debug)]
pub struct OutboundFrame {
    text: String,
    flushed: Option<oneshot::Sender<()>>,
}

impl OutboundFrame {
    /// Fire-and-forget line
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            flushed: None,
        }
    }

    /// Line whose flush is reported through the returned receiver.
    ///
    /// The receiver errors if the frame is dropped or the write fails.
    pub fn acknowledged(text: impl Into<String>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let frame = Self {
            text: text.into(),
            flushed: Some(tx),
        };
        (frame, rx)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bytes put on the wire
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + LINE_TERMINATOR.len());
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
        bytes
    }
}

/// Bounded per-session queue
pub fn outbound_channel(
    capacity: usize,
) -> (mpsc::Sender<OutboundFrame>, mpsc::Receiver<OutboundFrame>) {
    mpsc::channel(capacity.max(1))
}

/// Drain `rx` into `writer` until every sender is dropped or a write fails.
///
/// Once `closed` is raised the writer keeps flushing what is already queued
/// for at most [`CLOSE_DRAIN_GRACE`], then gives up, so a peer that stopped
/// reading cannot hold the socket open. A write failure is reported to the
/// registry, which finalizes the session. The write side is shut down on exit.
pub async fn run_writer<W>(
    session_id: SessionId,
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    registry: RegistryHandle,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let drain = async {
        while let Some(frame) = rx.recv().await {
            let bytes = frame.wire_bytes();
            let written = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            }
            .await;

            match written {
                Ok(()) => {
                    if let Some(flushed) = frame.flushed {
                        let _ = flushed.send(());
                    }
                }
                Err(e) => {
                    tracing::debug!("Write to {} failed: {}", session_id, e);
                    registry.disconnect(session_id, DisconnectReason::WriteError);
                    break;
                }
            }
        }
    };
    let deadline = async {
        wait_closed(&mut closed).await;
        tokio::time::sleep(CLOSE_DRAIN_GRACE).await;
    };

    tokio::select! {
        _ = drain => {}
        _ = deadline => {
            tracing::debug!(
                "Writer for {} still blocked {:?} after close, dropping pending output",
                session_id,
                CLOSE_DRAIN_GRACE
            );
        }
    }

    let _ = tokio::time::timeout(CLOSE_DRAIN_GRACE, writer.shutdown()).await;
    tracing::debug!("Writer for {} stopped", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::RegistryCommand;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_wire_bytes_append_crlf() {
        // テスト項目: 送信バイト列には CRLF が付与される
        let frame = OutboundFrame::line("A dark room.");
        assert_eq!(frame.wire_bytes(), b"A dark room.\r\n".to_vec());
        assert_eq!(frame.text(), "A dark room.");
    }

    #[tokio::test]
    async fn test_writer_writes_frames_in_order_and_acknowledges() {
        // テスト項目: writer がフレームを順番に書き込み、flush 完了を通知する
        // given (前提条件):
        let (registry, _commands) = RegistryHandle::detached();
        let (client, server) = tokio::io::duplex(1024);
        let (tx, rx) = outbound_channel(8);
        let (_close_tx, close_rx) = watch::channel(false);
        let task = tokio::spawn(run_writer(
            SessionId::generate(),
            rx,
            server,
            registry,
            close_rx,
        ));

        // when (操作):
        tx.send(OutboundFrame::line("first")).await.unwrap();
        let (frame, flushed) = OutboundFrame::acknowledged("second");
        tx.send(frame).await.unwrap();
        flushed.await.unwrap();
        drop(tx);
        task.await.unwrap();

        // then (期待する結果):
        let mut received = String::new();
        let mut client = client;
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "first\r\nsecond\r\n");
    }

    #[tokio::test]
    async fn test_writer_reports_write_failure() {
        // テスト項目: 書き込み失敗時にレジストリへ切断を依頼する
        // given (前提条件):
        let (registry, mut commands) = RegistryHandle::detached();
        let (client, server) = tokio::io::duplex(16);
        drop(client);
        let id = SessionId::generate();
        let (tx, rx) = outbound_channel(8);
        let (_close_tx, close_rx) = watch::channel(false);
        let task = tokio::spawn(run_writer(id, rx, server, registry, close_rx));

        // when (操作):
        let (frame, flushed) = OutboundFrame::acknowledged("lost");
        tx.send(frame).await.unwrap();
        task.await.unwrap();

        // then (期待する結果):
        assert!(flushed.await.is_err());
        match commands.recv().await {
            Some(RegistryCommand::Disconnect { id: got, reason }) => {
                assert_eq!(got, id);
                assert_eq!(reason, DisconnectReason::WriteError);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_flushes_queued_lines_after_close() {
        // テスト項目: クローズ後もキュー済みの行は送信されてから書き込み側が閉じられる
        // given (前提条件):
        let (registry, _commands) = RegistryHandle::detached();
        let (mut client, server) = tokio::io::duplex(1024);
        let (tx, rx) = outbound_channel(8);
        let (close_tx, close_rx) = watch::channel(false);
        let task = tokio::spawn(run_writer(
            SessionId::generate(),
            rx,
            server,
            registry,
            close_rx,
        ));

        // when (操作):
        tx.send(OutboundFrame::line("You have been kicked.")).await.unwrap();
        close_tx.send(true).unwrap();
        drop(tx);

        // then (期待する結果):
        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "You have been kicked.\r\n");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_gives_up_on_stalled_peer_after_close() {
        // テスト項目: 読み取らない相手に書き込み中でも、クローズ後は猶予時間内に writer が終了する
        // given (前提条件):
        let (registry, _commands) = RegistryHandle::detached();
        let (client, server) = tokio::io::duplex(16);
        let (tx, rx) = outbound_channel(8);
        let (close_tx, close_rx) = watch::channel(false);
        let task = tokio::spawn(run_writer(
            SessionId::generate(),
            rx,
            server,
            registry,
            close_rx,
        ));
        tx.send(OutboundFrame::line("x".repeat(1024))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished(), "writer should be blocked on the full pipe");

        // when (操作):
        close_tx.send(true).unwrap();

        // then (期待する結果):
        let finished = tokio::time::timeout(CLOSE_DRAIN_GRACE * 3, task).await;
        assert!(finished.is_ok(), "writer still alive after close");
        // the sender is still held, so only the close signal could have stopped it
        assert!(tx.is_closed());
        drop(client);
    }
}
