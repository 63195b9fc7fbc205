use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{error::Elapsed, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{FrameError, HandshakeError, SessionError};
use crate::model::ResponseEngine;
use crate::websocket::frame::{self, Frame};
use crate::websocket::handshake::{self, MAX_REQUEST_BYTES};
use crate::websocket::pool::{ConnectionRegistry, Outbound, RegisterError, SessionHandle};

const READ_CHUNK: usize = 4096;

/// Per-session knobs, lifted out of [`Settings`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_idle_timeouts: Option<u32>,
    pub online_learning: bool,
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            idle_timeout: settings.server.idle_timeout(),
            handshake_timeout: settings.server.handshake_timeout(),
            max_idle_timeouts: settings.server.max_idle_timeouts,
            online_learning: settings.engine.online_learning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingNickname,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    CloseFrame,
    IdleTimeout,
    ServerShutdown,
    Protocol(String),
    Failed(String),
}

/// What a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub peer: SocketAddr,
    pub nickname: Option<String>,
    /// Last state before `Closed`.
    pub last_state: SessionState,
    pub reason: CloseReason,
    pub messages: usize,
}

enum Event {
    Read(Result<std::io::Result<usize>, Elapsed>),
    Outbound(Option<Outbound>),
}

/// One client connection, driven from handshake to teardown by its own task.
///
/// The session is the only owner of its stream. Other tasks reach it through
/// the [`SessionHandle`] it registers, whose messages it frames and writes
/// itself.
pub struct ConnectionSession<S> {
    id: Uuid,
    peer: SocketAddr,
    stream: S,
    buffer: Vec<u8>,
    nickname: Option<String>,
    state: SessionState,
    engine: Arc<ResponseEngine>,
    registry: Arc<ConnectionRegistry>,
    config: SessionConfig,
    last_reply: Option<String>,
    registered: bool,
    messages: usize,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        engine: Arc<ResponseEngine>,
        registry: Arc<ConnectionRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
            nickname: None,
            state: SessionState::Connecting,
            engine,
            registry,
            config,
            last_reply: None,
            registered: false,
            messages: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion. Every exit path goes through the same
    /// teardown, so the registry never keeps a dead entry.
    pub async fn run(mut self) -> SessionOutcome {
        info!("Connection opened. Waiting for handshake...");
        let result = self.drive().await;
        self.teardown(result).await
    }

    async fn drive(&mut self) -> Result<CloseReason, SessionError> {
        if !self.handshake().await? {
            return Ok(CloseReason::ServerShutdown);
        }

        let (handle, mut outbound) = SessionHandle::new(self.id);
        match self.registry.add(self.peer, handle).await {
            Ok(()) => self.registered = true,
            Err(RegisterError::Closed) => return Ok(CloseReason::ServerShutdown),
            Err(RegisterError::Duplicate) => return Err(SessionError::DuplicatePeer(self.peer)),
        }
        self.state = SessionState::AwaitingNickname;
        info!("Handshake complete. Waiting for nickname...");

        self.receive_loop(&mut outbound).await
    }

    /// Reads the upgrade request and answers it. `Ok(false)` means the
    /// server shut down before the client finished its request.
    async fn handshake(&mut self) -> Result<bool, SessionError> {
        let mut closed = self.registry.closed_signal();
        let mut chunk = [0u8; 1024];
        let deadline = Instant::now() + self.config.handshake_timeout;

        let end = loop {
            if let Some(end) = handshake::header_end(&self.buffer) {
                break end;
            }
            if self.buffer.len() > MAX_REQUEST_BYTES {
                return Err(HandshakeError::TooLarge(MAX_REQUEST_BYTES).into());
            }

            let read = tokio::select! {
                biased;
                read = timeout_at(deadline, self.stream.read(&mut chunk)) => read,
                _ = closed.wait_for(|closed| *closed) => return Ok(false),
            };
            match read {
                Err(_) => return Err(HandshakeError::Timeout.into()),
                Ok(Ok(0)) => return Err(HandshakeError::Incomplete.into()),
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    let err = SessionError::from(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                }
            }
        };

        let response = match handshake::accept(&self.buffer[..end]) {
            Ok(response) => response,
            Err(e) => {
                if let Err(write_err) = self.stream.write_all(handshake::reject_bytes()).await {
                    debug!("Could not send handshake rejection: {}", write_err);
                }
                return Err(e.into());
            }
        };
        // Anything after the headers is already frame data.
        self.buffer.drain(..end);

        self.stream.write_all(&response.response_bytes()).await?;
        self.stream.flush().await?;
        Ok(true)
    }

    async fn receive_loop(
        &mut self,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<CloseReason, SessionError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut idle_timeouts = 0u32;

        loop {
            while let Some(frame) = self.take_frame()? {
                match frame {
                    Frame::Close => return Ok(CloseReason::CloseFrame),
                    Frame::Text(text) => self.handle_text(text).await?,
                }
            }

            let event = tokio::select! {
                read = timeout(self.config.idle_timeout, self.stream.read(&mut chunk)) => Event::Read(read),
                msg = outbound.recv() => Event::Outbound(msg),
            };

            match event {
                Event::Read(Err(_)) => {
                    idle_timeouts += 1;
                    debug!("Idle read timeout ({} in a row)", idle_timeouts);
                    if self
                        .config
                        .max_idle_timeouts
                        .is_some_and(|max| idle_timeouts >= max)
                    {
                        return Ok(CloseReason::IdleTimeout);
                    }
                }
                Event::Read(Ok(Ok(0))) => {
                    // The peer left in the middle of a frame.
                    if !self.buffer.is_empty() {
                        if let Err(e) = Frame::decode(&self.buffer) {
                            return Err(e.into());
                        }
                    }
                    return Ok(CloseReason::PeerClosed);
                }
                Event::Read(Ok(Ok(n))) => {
                    idle_timeouts = 0;
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Event::Read(Ok(Err(e))) => {
                    let err = SessionError::from(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    debug!("Retrying read after {}", err);
                }
                Event::Outbound(Some(Outbound::Text(text))) => {
                    if !self.send_text(&text).await? {
                        debug!("Broadcast not delivered to {}", self.display_name());
                    }
                }
                Event::Outbound(Some(Outbound::Close)) | Event::Outbound(None) => {
                    return Ok(CloseReason::ServerShutdown)
                }
            }
        }
    }

    /// Next complete frame in the buffer, if any.
    fn take_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match Frame::decode(&self.buffer) {
            Ok((frame, used)) => {
                self.buffer.drain(..used);
                Ok(Some(frame))
            }
            Err(FrameError::Truncated { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn handle_text(&mut self, text: String) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingNickname => {
                let name = text.trim();
                if name.is_empty() {
                    debug!("Ignoring empty nickname");
                    return Ok(());
                }
                info!("Connected as {}", name);
                self.nickname = Some(name.to_string());
                self.state = SessionState::Active;
            }
            SessionState::Active => {
                self.messages += 1;
                debug!("{}: {}", self.display_name(), text);

                let key = self.engine.parse(&text);
                let reply = self.engine.respond(&key).await?;
                if self.config.online_learning {
                    if let Some(prompt) = self.last_reply.take() {
                        self.engine.train(Some(&prompt), &text).await;
                    }
                }
                if self.send_text(&reply).await? {
                    self.last_reply = Some(reply);
                }
            }
            SessionState::Connecting | SessionState::Closed => {}
        }
        Ok(())
    }

    /// Frames and writes `text`. Returns false when it was too long to send.
    async fn send_text(&mut self, text: &str) -> Result<bool, SessionError> {
        let bytes = match frame::encode_text(text) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping outgoing message: {}", e);
                return Ok(false);
            }
        };
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        debug!("Server: {}", text);
        Ok(true)
    }

    fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or("<anonymous>")
    }

    async fn teardown(mut self, result: Result<CloseReason, SessionError>) -> SessionOutcome {
        let reason = match result {
            Ok(reason) => reason,
            Err(SessionError::Protocol(e)) => {
                warn!("Protocol error: {}", e);
                CloseReason::Protocol(e.to_string())
            }
            Err(SessionError::Engine(e)) => {
                error!("Engine refused to respond: {}", e);
                CloseReason::Failed(e.to_string())
            }
            Err(e) => {
                info!("Connection error: {}", e);
                CloseReason::Failed(e.to_string())
            }
        };

        if let Err(e) = self.stream.shutdown().await {
            debug!("Socket shutdown failed: {}", e);
        }
        if self.registered {
            self.registry.remove(&self.peer, self.id).await;
        }

        let last_state = self.state;
        self.state = SessionState::Closed;
        match &self.nickname {
            Some(name) => info!("Disconnected as {} ({:?})", name, reason),
            None => info!("Disconnected with null response ({:?})", reason),
        }

        SessionOutcome {
            peer: self.peer,
            nickname: self.nickname,
            last_state,
            reason,
            messages: self.messages,
        }
    }
}
