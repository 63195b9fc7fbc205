use alan_server::websocket::frame::encode_masked_text;
use alan_server::websocket::{ChatServer, ServerHandle};
use alan_server::{AppState, Settings};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: server.example.com\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

async fn start_server() -> (AppState, ServerHandle) {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let state = AppState::new(config).await.unwrap();
    state.engine.train(Some("hi"), "hello alice").await;
    let handle = Arc::new(ChatServer::new(&state)).start().await.unwrap();
    (state, handle)
}

async fn raw_handshake(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(REQUEST).await.unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 256];
    while !response.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "server closed during handshake");
        response.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    stream
}

async fn read_frame(stream: &mut TcpStream) -> (u8, String) {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1] & 0x80, 0, "server frames are never masked");
    let mut payload = vec![0u8; usize::from(header[1] & 0x7f)];
    stream.read_exact(&mut payload).await.unwrap();
    (header[0], String::from_utf8(payload).unwrap())
}

#[test_log::test(tokio::test)]
async fn test_handshake_nickname_and_reply() {
    let (_state, handle) = start_server().await;
    let mut client = raw_handshake(handle.local_addr()).await;

    client
        .write_all(&encode_masked_text("alice", MASK).unwrap())
        .await
        .unwrap();
    client
        .write_all(&encode_masked_text("hi", MASK).unwrap())
        .await
        .unwrap();

    let (byte0, text) = timeout(Duration::from_secs(2), read_frame(&mut client))
        .await
        .expect("no reply from server");
    assert_eq!(byte0, 0x81);
    assert_eq!(text, "hello alice");

    handle.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_unknown_prompt_gets_fallback() {
    let (state, handle) = start_server().await;
    let mut client = raw_handshake(handle.local_addr()).await;

    client
        .write_all(&encode_masked_text("bob", MASK).unwrap())
        .await
        .unwrap();
    client
        .write_all(&encode_masked_text("zebra crossing", MASK).unwrap())
        .await
        .unwrap();

    let (_, text) = timeout(Duration::from_secs(2), read_frame(&mut client))
        .await
        .expect("no reply from server");
    assert!(state.config.engine.fallback_responses.contains(&text));

    handle.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_bad_request_is_rejected() {
    let (_state, handle) = start_server().await;
    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(2), client.read_to_end(&mut response))
        .await
        .expect("server kept the connection open")
        .unwrap();
    assert!(response.starts_with(b"HTTP/1.1 400"));
    assert_eq!(handle.connection_count().await, 0);

    handle.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_tungstenite_client() {
    let (_state, handle) = start_server().await;
    let url = url::Url::parse(&format!("ws://{}/", handle.local_addr())).unwrap();

    let (mut ws, response) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(response.status().as_u16(), 101);

    ws.send(Message::Text("alice".into())).await.unwrap();
    ws.send(Message::Text("hi".into())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("no reply from server")
        .expect("stream ended")
        .unwrap();
    assert_eq!(reply, Message::Text("hello alice".into()));

    ws.send(Message::Close(None)).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handle.connection_count().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session never left the registry");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_broadcast_reaches_everyone_but_replies_do_not() {
    let (_state, handle) = start_server().await;
    let mut first = raw_handshake(handle.local_addr()).await;
    let mut second = raw_handshake(handle.local_addr()).await;

    for (client, name) in [(&mut first, "alice"), (&mut second, "bob")] {
        client
            .write_all(&encode_masked_text(name, MASK).unwrap())
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handle.connection_count().await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "clients never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    first
        .write_all(&encode_masked_text("hi", MASK).unwrap())
        .await
        .unwrap();
    let (_, reply) = read_frame(&mut first).await;
    assert_eq!(reply, "hello alice");

    assert_eq!(handle.broadcast("server going down").await.unwrap(), 2);
    for client in [&mut first, &mut second] {
        let (byte0, text) = timeout(Duration::from_secs(2), read_frame(client))
            .await
            .expect("broadcast not delivered");
        assert_eq!(byte0, 0x81);
        // The second client never saw the reply meant for the first.
        assert_eq!(text, "server going down");
    }

    handle.stop().await.unwrap();
}
