use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::error::HandshakeError;

/// Fixed GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on request header bytes read before giving up.
pub const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// base64(SHA-1(key ‖ GUID)).
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Offset just past the `\r\n\r\n` that ends the request headers.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// The parts of an HTTP upgrade request the server cares about.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
}

impl HandshakeRequest {
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::InvalidRequest("invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| HandshakeError::InvalidRequest("empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) => (m, p, v),
            _ => {
                return Err(HandshakeError::InvalidRequest(format!(
                    "malformed request line {:?}",
                    request_line
                )))
            }
        };
        if !version.starts_with("HTTP/") {
            return Err(HandshakeError::InvalidRequest(format!(
                "unknown protocol {:?}",
                version
            )));
        }

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptResponse {
    pub accept_key: String,
}

impl AcceptResponse {
    pub fn response_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            self.accept_key
        )
        .into_bytes()
    }
}

/// Validates a raw upgrade request and computes the response to send.
pub fn accept(data: &[u8]) -> Result<AcceptResponse, HandshakeError> {
    let request = HandshakeRequest::parse(data)?;
    let key = request
        .header("sec-websocket-key")
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;
    Ok(AcceptResponse {
        accept_key: compute_accept_key(key),
    })
}

pub fn reject_bytes() -> &'static [u8] {
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n"
}
