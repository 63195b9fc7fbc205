//! WebSocket module for the chat server
//!
//! This module accepts TCP connections, performs the upgrade handshake,
//! decodes client frames and keeps the registry of live sessions used
//! for broadcast and shutdown.

pub mod connection;
pub mod frame;
pub mod handshake;
pub mod pool;
mod server;

pub use connection::{CloseReason, ConnectionSession, SessionConfig, SessionOutcome, SessionState};
pub use frame::Frame;
pub use pool::{ConnectionRegistry, Outbound, SessionHandle};
pub use server::{ChatServer, ServerHandle, ShutdownReport};
