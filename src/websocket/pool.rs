use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Instructions delivered to a session from outside its own task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Non-owning handle to a live session: enough to reach it, nothing more.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn new(id: Uuid) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// False once the session has gone away.
    pub fn send(&self, msg: Outbound) -> bool {
        self.tx.send(msg).is_ok()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterError {
    Closed,
    Duplicate,
}

#[derive(Debug, Default)]
struct PoolState {
    sessions: HashMap<SocketAddr, SessionHandle>,
    closed: bool,
}

/// Live sessions keyed by peer address, used for broadcast and shutdown.
#[derive(Debug)]
pub struct ConnectionRegistry {
    state: RwLock<PoolState>,
    closed_tx: watch::Sender<bool>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(PoolState::default()),
            closed_tx,
        }
    }

    pub async fn add(&self, addr: SocketAddr, handle: SessionHandle) -> Result<(), RegisterError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(RegisterError::Closed);
        }
        if state.sessions.contains_key(&addr) {
            warn!("Refusing second session for {}", addr);
            return Err(RegisterError::Duplicate);
        }
        state.sessions.insert(addr, handle);
        debug!("Added connection {} to registry", addr);
        Ok(())
    }

    /// Removes `addr` only if it still belongs to session `id`.
    pub async fn remove(&self, addr: &SocketAddr, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        match state.sessions.get(addr) {
            Some(handle) if handle.id == id => {
                state.sessions.remove(addr);
                debug!("Removed connection {} from registry", addr);
                true
            }
            _ => false,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn contains(&self, addr: &SocketAddr) -> bool {
        self.state.read().await.sessions.contains_key(addr)
    }

    /// Copy of the current handles; callers iterate it without the lock.
    pub async fn snapshot(&self) -> Vec<(SocketAddr, SessionHandle)> {
        self.state
            .read()
            .await
            .sessions
            .iter()
            .map(|(addr, handle)| (*addr, handle.clone()))
            .collect()
    }

    /// Queues `msg` for every live session; returns how many accepted it.
    pub async fn broadcast(&self, msg: &str) -> usize {
        let mut delivered = 0;
        for (addr, handle) in self.snapshot().await {
            if handle.send(Outbound::Text(msg.to_string())) {
                delivered += 1;
            } else {
                debug!("Skipping broadcast to departed connection {}", addr);
            }
        }
        delivered
    }

    /// Stops accepting registrations and tells every session to close.
    /// Returns the number of sessions signalled.
    pub async fn close(&self) -> usize {
        let handles = {
            let mut state = self.state.write().await;
            state.closed = true;
            state.sessions.values().cloned().collect::<Vec<_>>()
        };
        self.closed_tx.send_replace(true);

        let count = handles.iter().filter(|h| h.send(Outbound::Close)).count();
        info!("Signalled {} connections to close", count);
        count
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}
