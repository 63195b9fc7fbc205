use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{ServerConfig, Settings};
use crate::error::{AppError, FrameError};
use crate::model::ResponseEngine;
use crate::websocket::connection::{ConnectionSession, SessionConfig, SessionOutcome};
use crate::websocket::frame;
use crate::websocket::pool::ConnectionRegistry;
use crate::{AppState, Result};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the listening endpoint, the registry of live sessions and the
/// running flag. One per process.
pub struct ChatServer {
    settings: Arc<Settings>,
    engine: Arc<ResponseEngine>,
    registry: Arc<ConnectionRegistry>,
    running: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions still registered when the stop began.
    pub connections_closed: usize,
    /// Every session task the acceptor ever spawned, all finished.
    pub sessions_joined: usize,
}

impl ChatServer {
    pub fn new(state: &AppState) -> Self {
        Self {
            settings: state.config.clone(),
            engine: state.engine.clone(),
            registry: Arc::new(ConnectionRegistry::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the listener (retrying while the port is busy) and spawns the
    /// acceptor. Refuses to serve until the engine has a fallback response.
    pub async fn start(self: Arc<Self>) -> Result<ServerHandle> {
        if self.registry.is_closed().await {
            return Err(AppError::InternalError("server has already been stopped".into()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::InternalError("server is already running".into()));
        }

        let listener = match self.prepare().await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;
        info!("Server established on {}", local_addr);

        let (close_tx, close_rx) = oneshot::channel();
        let acceptor = tokio::spawn(accept_loop(listener, self.clone(), close_rx));

        Ok(ServerHandle {
            server: self,
            local_addr,
            close_tx,
            acceptor,
        })
    }

    async fn prepare(&self) -> Result<TcpListener> {
        self.engine.ensure_ready().await?;
        acquire_listener(&self.settings.server).await
    }

    fn new_session(&self, stream: tokio::net::TcpStream, peer: SocketAddr) -> ConnectionSession<tokio::net::TcpStream> {
        ConnectionSession::new(
            stream,
            peer,
            self.engine.clone(),
            self.registry.clone(),
            SessionConfig::from(self.settings.as_ref()),
        )
    }
}

/// Keeps trying to bind until the port frees up, logging progress.
async fn acquire_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.address();
    let mut attempts = 0u32;
    loop {
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                if attempts > 0 {
                    info!("Acquired {} after {} attempts", addr, attempts + 1);
                }
                return Ok(listener);
            }
            Err(e) => {
                attempts += 1;
                if config.bind_max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(AppError::BindError {
                        addr,
                        attempts,
                        source: e,
                    });
                }
                if attempts == 1 {
                    info!("Acquiring port {}...", addr);
                } else {
                    info!("Still acquiring port {} (attempt {}): {}", addr, attempts, e);
                }
                sleep(config.bind_retry_interval()).await;
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    server: Arc<ChatServer>,
    mut close_rx: oneshot::Receiver<()>,
) -> usize {
    let mut sessions = JoinSet::new();
    let mut joined = 0;

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                info!("Socket closed by server");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session = server.new_session(stream, peer);
                    let span = info_span!("session", peer = %peer, id = %session.id());
                    sessions.spawn(session.run().instrument(span));
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                joined += 1;
                log_finished(finished);
            }
        }
    }

    drop(listener);
    while let Some(finished) = sessions.join_next().await {
        joined += 1;
        log_finished(finished);
    }
    joined
}

fn log_finished(finished: std::result::Result<SessionOutcome, JoinError>) {
    match finished {
        Ok(outcome) => debug!("Session {} finished: {:?}", outcome.peer, outcome.reason),
        Err(e) if e.is_panic() => error!("Session task panicked: {}", e),
        Err(e) => warn!("Session task ended abnormally: {}", e),
    }
}

/// A started server. Dropping it closes the listener; [`stop`](Self::stop)
/// also closes every connection and waits for all tasks.
pub struct ServerHandle {
    server: Arc<ChatServer>,
    local_addr: SocketAddr,
    close_tx: oneshot::Sender<()>,
    acceptor: JoinHandle<usize>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.server.registry()
    }

    pub async fn connection_count(&self) -> usize {
        self.server.registry.connection_count().await
    }

    /// Sends operator text to every connected client.
    pub async fn broadcast(&self, text: &str) -> std::result::Result<usize, FrameError> {
        frame::encode_text(text)?;
        Ok(self.server.registry.broadcast(text).await)
    }

    pub async fn stop(self) -> Result<ShutdownReport> {
        let clients = self.server.registry.connection_count().await;
        info!("Killing server with {} clients...", clients);

        if self.close_tx.send(()).is_err() {
            debug!("Acceptor already gone");
        }
        let connections_closed = self.server.registry.close().await;
        let sessions_joined = self
            .acceptor
            .await
            .map_err(|e| AppError::InternalError(format!("acceptor task failed: {}", e)))?;

        self.server.running.store(false, Ordering::SeqCst);
        info!("Server terminated");
        Ok(ShutdownReport {
            connections_closed,
            sessions_joined,
        })
    }
}
