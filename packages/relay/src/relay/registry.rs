//! Session registry and the actor that owns it.
//!
//! ## Invariants
//!
//! - A session id is present iff its socket may still be written to.
//! - Removal, close signalling and the `disconnect` egress event happen in
//!   one step inside the actor, exactly once per session, whichever side
//!   asked first.
//!
//! Other tasks and the bridge thread talk to the actor through a cloneable
//! [`RegistryHandle`]. Sending never blocks, so the handle is usable from
//! plain threads as well as async tasks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::domain::{DisconnectReason, EventType, Session, SessionId};

use super::{egress::EgressQueue, writer::OutboundFrame};

/// Registry entry: session state plus the handles that reach its socket.
#[derive(Debug)]
pub struct SessionEntry {
    pub session: Session,
    outbound: mpsc::Sender<OutboundFrame>,
    close: watch::Sender<bool>,
}

impl SessionEntry {
    pub fn new(
        session: Session,
        outbound: mpsc::Sender<OutboundFrame>,
        close: watch::Sender<bool>,
    ) -> Self {
        Self {
            session,
            outbound,
            close,
        }
    }
}

/// Plain map from session id to entry. Owned by the actor.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; returns `false` if the id was already taken.
    pub fn insert(&mut self, entry: SessionEntry) -> bool {
        let id = entry.session.id;
        if self.sessions.contains_key(&id) {
            return false;
        }
        self.sessions.insert(id, entry);
        true
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionEntry> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.values().map(|e| e.session.clone()).collect()
    }
}

/// Commands processed by the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    Register(SessionEntry),
    Touch {
        id: SessionId,
        at: DateTime<Utc>,
        command: bool,
    },
    Deliver {
        ids: Vec<SessionId>,
        text: String,
    },
    Broadcast {
        text: String,
    },
    Disconnect {
        id: SessionId,
        reason: DisconnectReason,
    },
    DisconnectAll {
        reason: DisconnectReason,
        done: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Session>>,
    },
    Get {
        id: SessionId,
        reply: oneshot::Sender<Option<Session>>,
    },
}

/// Cloneable sender side of the registry actor.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl RegistryHandle {
    /// Handle whose commands land in the returned receiver instead of an actor.
    ///
    /// Lets components be driven in isolation.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<RegistryCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Whether the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, command: RegistryCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn register(&self, entry: SessionEntry) -> bool {
        self.post(RegistryCommand::Register(entry))
    }

    pub fn touch(&self, id: SessionId, at: DateTime<Utc>, command: bool) -> bool {
        self.post(RegistryCommand::Touch { id, at, command })
    }

    /// Queue `text` for each listed session that is still registered.
    pub fn deliver(&self, ids: Vec<SessionId>, text: impl Into<String>) -> bool {
        self.post(RegistryCommand::Deliver {
            ids,
            text: text.into(),
        })
    }

    /// Queue `text` for every registered session.
    pub fn broadcast(&self, text: impl Into<String>) -> bool {
        self.post(RegistryCommand::Broadcast { text: text.into() })
    }

    /// Finalize a session. Safe to call any number of times.
    pub fn disconnect(&self, id: SessionId, reason: DisconnectReason) -> bool {
        self.post(RegistryCommand::Disconnect { id, reason })
    }

    /// Finalize every session; resolves to how many were closed.
    pub async fn disconnect_all(&self, reason: DisconnectReason) -> usize {
        let (done, rx) = oneshot::channel();
        if !self.post(RegistryCommand::DisconnectAll { reason, done }) {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn sessions(&self) -> Vec<Session> {
        let (reply, rx) = oneshot::channel();
        if !self.post(RegistryCommand::Snapshot { reply }) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn session(&self, id: SessionId) -> Option<Session> {
        let (reply, rx) = oneshot::channel();
        if !self.post(RegistryCommand::Get { id, reply }) {
            return None;
        }
        rx.await.ok().flatten()
    }
}

/// Single owner of the [`SessionRegistry`].
pub struct RegistryActor {
    registry: SessionRegistry,
    rx: mpsc::UnboundedReceiver<RegistryCommand>,
    egress: EgressQueue,
}

/// Start the registry actor on the current runtime.
///
/// The actor stops once every [`RegistryHandle`] is dropped.
pub fn spawn_registry(egress: EgressQueue) -> (RegistryHandle, JoinHandle<()>) {
    let (handle, rx) = RegistryHandle::detached();
    let actor = RegistryActor {
        registry: SessionRegistry::new(),
        rx,
        egress,
    };
    (handle, tokio::spawn(actor.run()))
}

impl RegistryActor {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        tracing::debug!(
            "Registry actor stopped with {} session(s) left",
            self.registry.len()
        );
    }

    fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Register(entry) => {
                let session = entry.session.clone();
                if !self.registry.insert(entry) {
                    tracing::error!("Session id collision for {}, dropping connection", session);
                }
            }
            RegistryCommand::Touch { id, at, command } => {
                if let Some(entry) = self.registry.get_mut(&id) {
                    entry.session.touch(at, command);
                }
            }
            RegistryCommand::Deliver { ids, text } => {
                for id in ids {
                    self.deliver(id, &text);
                }
            }
            RegistryCommand::Broadcast { text } => {
                let ids = self.registry.ids();
                tracing::debug!("Broadcasting to {} session(s)", ids.len());
                for id in ids {
                    self.deliver(id, &text);
                }
            }
            RegistryCommand::Disconnect { id, reason } => {
                self.finalize(id, reason);
            }
            RegistryCommand::DisconnectAll { reason, done } => {
                let closed = self
                    .registry
                    .ids()
                    .into_iter()
                    .filter(|id| self.finalize(*id, reason))
                    .count();
                let _ = done.send(closed);
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            RegistryCommand::Get { id, reply } => {
                let _ = reply.send(self.registry.get(&id).map(|e| e.session.clone()));
            }
        }
    }

    fn deliver(&mut self, id: SessionId, text: &str) {
        let Some(entry) = self.registry.get(&id) else {
            tracing::debug!("No live session {}, dropping outgoing line", id);
            return;
        };
        if !entry.session.active {
            return;
        }

        match entry.outbound.try_send(OutboundFrame::line(text)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outgoing queue full for {}, dropping line", id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.finalize(id, DisconnectReason::WriteError);
            }
        }
    }

    /// The one finalization path. Returns `true` if this call closed the session.
    fn finalize(&mut self, id: SessionId, reason: DisconnectReason) -> bool {
        let Some(mut entry) = self.registry.remove(&id) else {
            tracing::debug!("Session {} already finalized ({})", id, reason);
            return false;
        };

        entry.session.active = false;
        // stops the inbound relay and starts the writer's bounded drain
        let _ = entry.close.send(true);
        self.egress.emit(&entry.session, EventType::Disconnect, None);
        tracing::info!("Session {} disconnected ({})", entry.session, reason);
        true
    }
}
