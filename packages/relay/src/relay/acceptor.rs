//! Connection acceptor: one session per accepted TCP connection.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use kingdom_shared::time::Clock;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
};

use crate::{
    config::RelayConfig,
    domain::{EventType, Session, SessionId},
    infrastructure::framer::LineFramer,
};

use super::{
    egress::EgressQueue,
    inbound::InboundRelay,
    registry::{RegistryHandle, SessionEntry},
    wait_closed,
    writer::{outbound_channel, run_writer},
};

/// Pause after a failed `accept` so persistent errors (e.g. fd exhaustion) do not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a new session needs, shared by all connections.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: RegistryHandle,
    pub egress: EgressQueue,
    pub clock: Arc<dyn Clock>,
    pub max_line_length: usize,
    pub outbound_capacity: usize,
    pub echo: bool,
}

impl SessionContext {
    pub fn new(
        registry: RegistryHandle,
        egress: EgressQueue,
        clock: Arc<dyn Clock>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            registry,
            egress,
            clock,
            max_line_length: config.max_line_length,
            outbound_capacity: config.outbound_capacity,
            echo: config.echo,
        }
    }

    /// Register a session for `stream`, announce it and start its tasks.
    pub fn open_session(&self, stream: TcpStream, peer: SocketAddr) -> SessionId {
        let session = Session::new(peer, self.clock.now());
        tracing::info!("New Connection: {} ({})", peer, session.id);

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = outbound_channel(self.outbound_capacity);
        let (close_tx, close_rx) = watch::channel(false);

        self.registry.register(SessionEntry::new(
            session.clone(),
            outbound_tx.clone(),
            close_tx,
        ));
        self.egress.emit(&session, EventType::NewConnection, None);

        tokio::spawn(run_writer(
            session.id,
            outbound_rx,
            write_half,
            self.registry.clone(),
            close_rx.clone(),
        ));

        let id = session.id;
        let relay = InboundRelay::new(
            session,
            LineFramer::new(read_half, self.max_line_length),
            self.registry.clone(),
            self.egress.clone(),
            outbound_tx,
            close_rx,
            self.clock.clone(),
            self.echo,
        );
        tokio::spawn(relay.run());
        id
    }
}

/// Accept connections until `shutdown` is raised.
///
/// A failed `accept` is logged and does not affect existing sessions.
pub async fn run_acceptor(
    listener: TcpListener,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    ctx.open_session(stream, peer);
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    tracing::info!("Stopped accepting connections");
}
