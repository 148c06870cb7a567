//! Server composition root.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{Router, routing::get};
use kingdom_shared::time::{Clock, SystemClock};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tower_http::trace::TraceLayer;

use crate::{
    config::RelayConfig,
    domain::{DisconnectReason, EventPublisher, EventSource, RelayError, Session},
    relay::{
        EgressQueue, OutboundBridge, RegistryHandle, SessionContext, run_acceptor, run_publisher,
        spawn_registry, wait_closed,
    },
};

use super::{
    handler::{get_session, health_check, list_sessions},
    signal::shutdown_signal,
    state::AppState,
};

/// How long shutdown waits for sessions to drain and egress to be published
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Running relay.
///
/// Owns the registry actor, the acceptor, the outbound bridge thread, the
/// egress publisher and, when configured, the admin HTTP API.
///
/// # Example
///
/// ```ignore
/// let broker = InMemoryBroker::new();
/// let server = Server::start(config, Arc::new(broker.clone()), Box::new(broker)).await?;
/// server.broadcast("The gates are open.");
/// server.shutdown().await?;
/// ```
pub struct Server {
    config: RelayConfig,
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    registry: RegistryHandle,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
    registry_task: JoinHandle<()>,
    publisher_task: JoinHandle<()>,
    admin_task: Option<JoinHandle<()>>,
    bridge: std::thread::JoinHandle<()>,
}

impl Server {
    /// Bind the listener(s) and start every component.
    ///
    /// # Errors
    ///
    /// [`RelayError::Bind`] if a listener cannot be bound; nothing is left running.
    pub async fn start(
        config: RelayConfig,
        publisher: Arc<dyn EventPublisher>,
        source: Box<dyn EventSource>,
    ) -> Result<Self, RelayError> {
        Self::start_with_clock(config, publisher, source, Arc::new(SystemClock)).await
    }

    pub async fn start_with_clock(
        config: RelayConfig,
        publisher: Arc<dyn EventPublisher>,
        source: Box<dyn EventSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RelayError> {
        // Bind first: a bind failure aborts startup before anything is spawned
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| RelayError::bind(&bind_addr, e))?;
        let local_addr = listener.local_addr()?;

        let admin_listener = match config.admin_bind_addr() {
            Some(addr) => Some(
                TcpListener::bind(&addr)
                    .await
                    .map_err(|e| RelayError::bind(&addr, e))?,
            ),
            None => None,
        };
        let admin_addr = admin_listener
            .as_ref()
            .map(|l| l.local_addr())
            .transpose()?;

        let (egress, egress_rx) = EgressQueue::new(config.client_kind.as_str(), clock.clone());
        let publisher_task = tokio::spawn(run_publisher(egress_rx, publisher));
        let (registry, registry_task) = spawn_registry(egress.clone());

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bridge = OutboundBridge::new(
            source,
            registry.clone(),
            shutdown_flag.clone(),
            config.poll_timeout,
        )
        .spawn()
        .map_err(|e| RelayError::Bridge(e.to_string()))?;

        let ctx = SessionContext::new(registry.clone(), egress, clock, &config);
        let acceptor = tokio::spawn(run_acceptor(listener, ctx, shutdown_rx.clone()));

        let admin_task = admin_listener.map(|listener| {
            let state = Arc::new(AppState {
                registry: registry.clone(),
            });
            tokio::spawn(serve_admin(listener, state, shutdown_rx))
        });

        tracing::info!("Relay listening on {}", local_addr);
        if let Some(addr) = admin_addr {
            tracing::info!("Admin API listening on http://{}/api/health", addr);
        }

        Ok(Self {
            config,
            local_addr,
            admin_addr,
            registry,
            shutdown_flag,
            shutdown_tx,
            acceptor,
            registry_task,
            publisher_task,
            admin_task,
            bridge,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Send `message` to every registered session. Best effort, no atomicity.
    pub fn broadcast(&self, message: impl Into<String>) {
        self.registry.broadcast(message);
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.registry.sessions().await
    }

    /// Stop accepting, tell every client, close every session and stop the bridge.
    pub async fn shutdown(self) -> Result<(), RelayError> {
        tracing::info!("Shutting down server!");

        let Server {
            config,
            registry,
            shutdown_flag,
            shutdown_tx,
            acceptor,
            registry_task,
            publisher_task,
            admin_task,
            bridge,
            ..
        } = self;

        shutdown_flag.store(true, Ordering::Release);
        registry.broadcast(config.shutdown_notice.as_str());
        let _ = shutdown_tx.send(true);
        if let Err(e) = acceptor.await {
            tracing::warn!("Acceptor task ended abnormally: {}", e);
        }

        let closed = registry.disconnect_all(DisconnectReason::Shutdown).await;
        tracing::info!("Closed {} session(s)", closed);

        let joined = tokio::task::spawn_blocking(move || bridge.join())
            .await
            .map_err(|e| RelayError::Bridge(e.to_string()))?;
        if joined.is_err() {
            return Err(RelayError::Bridge("bridge thread panicked".to_string()));
        }

        if let Some(mut task) = admin_task {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("Admin API did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                task.abort();
            }
        }

        // the actor stops once the last session task drops its handle,
        // and the publisher once the actor drops its egress queue
        drop(registry);
        if tokio::time::timeout(SHUTDOWN_GRACE, registry_task).await.is_err() {
            tracing::warn!("Sessions still draining after {:?}", SHUTDOWN_GRACE);
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, publisher_task).await.is_err() {
            tracing::warn!("Egress events still pending after {:?}", SHUTDOWN_GRACE);
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

async fn serve_admin(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{session_id}", get(get_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait_closed(&mut shutdown).await })
        .await;
    if let Err(e) = served {
        tracing::error!("Admin API error: {}", e);
    }
}

/// Run the relay until Ctrl+C / SIGTERM, then shut down gracefully.
///
/// # Arguments
///
/// * `config` - Listener, broker and session settings
/// * `publisher` - Egress side of the broker
/// * `source` - Ingress side of the broker, polled from the bridge thread
pub async fn run_server(
    config: RelayConfig,
    publisher: Arc<dyn EventPublisher>,
    source: Box<dyn EventSource>,
) -> Result<(), RelayError> {
    let server = Server::start(config, publisher, source).await?;
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    shutdown_signal().await;
    tracing::warn!("Interrupt detected. Shutting down!");

    server.shutdown().await
}
