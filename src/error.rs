use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Engine error: {0}")]
    EngineError(#[from] EngineError),

    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),

    #[error("Shell error: {0}")]
    ShellError(#[from] ShellError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unable to bind {addr} after {attempts} attempts: {source}")]
    BindError {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Internal server error: {0}")]
    InternalError(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

/// Problems with the bytes a peer sent; fatal only to that peer's session.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    #[error("Missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("Request headers exceed {0} bytes")]
    TooLarge(usize),

    #[error("Connection closed before the handshake completed")]
    Incomplete,

    #[error("Handshake timed out")]
    Timeout,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Extended payload length marker {0} is not supported")]
    ExtendedLength(u8),

    #[error("Fragmented frames are not supported")]
    Fragmented,

    #[error("Unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),

    #[error("Client frame is not masked")]
    Unmasked,

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Payload of {0} bytes does not fit a short-form frame")]
    PayloadTooLong(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("No fallback responses are trained for unknown prompts")]
    NoFallback,
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    Version(u32),

    #[error("Snapshot checksum mismatch")]
    Checksum,

    #[error("Snapshot violates table invariants: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShellError {
    #[error("Command \"{0}\" does not exist or is misspelled")]
    UnknownCommand(String),

    #[error("No such capability (\"{0}\")")]
    UnknownCapability(String),

    #[error("Invalid number of args for command {command} (defined: {expected}, passed: {passed})")]
    Arity {
        command: String,
        expected: usize,
        passed: usize,
    },

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
}

/// Everything that can end a session, sorted into the kinds the session
/// loop treats differently.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transient I/O error: {0}")]
    Transient(io::Error),

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Peer {0} is already registered")]
    DuplicatePeer(SocketAddr),
}

impl SessionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transient(_))
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                SessionError::Transient(err)
            }
            _ => SessionError::Io(err),
        }
    }
}

impl From<HandshakeError> for SessionError {
    fn from(err: HandshakeError) -> Self {
        SessionError::Protocol(ProtocolError::Handshake(err))
    }
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        SessionError::Protocol(ProtocolError::Frame(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let app_err: AppError = EngineError::NoFallback.into();
        assert!(matches!(app_err, AppError::EngineError(EngineError::NoFallback)));
    }

    #[test]
    fn test_io_errors_are_classified() {
        let err: SessionError = io::Error::new(io::ErrorKind::TimedOut, "idle").into();
        assert!(err.is_transient());

        let err: SessionError = io::Error::new(io::ErrorKind::WouldBlock, "again").into();
        assert!(err.is_transient());

        let err: SessionError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(!err.is_transient());
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[test]
    fn test_protocol_errors_nest() {
        let err: SessionError = FrameError::Fragmented.into();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::Frame(FrameError::Fragmented))
        ));

        let err: SessionError = HandshakeError::MissingKey.into();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::Handshake(HandshakeError::MissingKey))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::EngineError(EngineError::NoFallback);
        assert_eq!(
            err.to_string(),
            "Engine error: No fallback responses are trained for unknown prompts"
        );

        let err = ShellError::Arity {
            command: "start_server".to_string(),
            expected: 0,
            passed: 2,
        };
        assert_eq!(
            err.to_string(),
            "Invalid number of args for command start_server (defined: 0, passed: 2)"
        );

        let err = FrameError::UnsupportedOpcode(0x9);
        assert_eq!(err.to_string(), "Unsupported opcode 0x9");
    }
}
