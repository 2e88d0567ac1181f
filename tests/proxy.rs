//! End-to-end tests: a real client socket, the proxy, and a scripted MySQL
//! server, all over loopback TCP.

use bytes::{BufMut, BytesMut};
use mysql_relay::protocol::capability;
use mysql_relay::{ProxyConfig, ProxyServer, ProxyStats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CLIENT_CAPS: u32 = capability::CLIENT_PROTOCOL_41
    | capability::CLIENT_SECURE_CONNECTION
    | capability::CLIENT_PLUGIN_AUTH
    | capability::CLIENT_CONNECT_WITH_DB
    | capability::CLIENT_DEPRECATE_EOF;

// ============================================================================
// Wire helpers
// ============================================================================

fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < 0xFF_FFFF);
    let mut out = (payload.len() as u32).to_le_bytes()[..3].to_vec();
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (header[3], payload)
}

async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;
    rest
}

fn greeting() -> Vec<u8> {
    let caps = CLIENT_CAPS | capability::CLIENT_SSL | capability::CLIENT_COMPRESS;
    let mut p = BytesMut::new();
    p.put_u8(10);
    p.put_slice(b"8.0.36\0");
    p.put_u32_le(7);
    p.put_slice(b"12345678\0");
    p.put_u16_le(caps as u16);
    p.put_u8(0xff);
    p.put_u16_le(0x0002);
    p.put_u16_le((caps >> 16) as u16);
    p.put_u8(21);
    p.put_slice(&[0; 10]);
    p.put_slice(b"9abcdefghijk\0");
    p.put_slice(b"mysql_native_password\0");
    p.to_vec()
}

fn handshake_response(schema: &str) -> Vec<u8> {
    let mut p = BytesMut::new();
    p.put_u32_le(CLIENT_CAPS);
    p.put_u32_le(16 * 1024 * 1024);
    p.put_u8(0xff);
    p.put_slice(&[0; 23]);
    p.put_slice(b"app\0");
    p.put_u8(20);
    p.put_slice(&[0x42; 20]);
    p.put_slice(schema.as_bytes());
    p.put_u8(0);
    p.put_slice(b"mysql_native_password\0");
    p.to_vec()
}

fn ok(status: u16) -> Vec<u8> {
    let mut p = vec![0x00, 0x00, 0x00];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&[0, 0]);
    p
}

/// A one-column result set in `CLIENT_DEPRECATE_EOF` form, framed from
/// sequence id 1.
fn result_set(rows: usize, width: usize) -> Vec<u8> {
    let mut column = Vec::new();
    for part in ["def", "shop", "t", "t", "v", "v"] {
        column.push(part.len() as u8);
        column.extend_from_slice(part.as_bytes());
    }
    column.push(0x0c);
    column.extend_from_slice(&[0x21, 0, 0xff, 0, 0, 0, 0xfd, 0, 0, 0, 0, 0]);

    let mut out = frame(1, &[1]);
    out.extend(frame(2, &column));
    let mut seq = 3u8;
    for i in 0..rows {
        let mut row = vec![width as u8];
        row.extend(std::iter::repeat(b'a' + (i % 26) as u8).take(width));
        out.extend(frame(seq, &row));
        seq = seq.wrapping_add(1);
    }
    let mut end = ok(0x0002);
    end[0] = 0xFE;
    out.extend(frame(seq, &end));
    out
}

// ============================================================================
// Harness
// ============================================================================

struct Proxy {
    addr: SocketAddr,
    stats: Arc<ProxyStats>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Proxy {
    async fn start(backend: SocketAddr) -> Self {
        let config = ProxyConfig {
            backend,
            reactors: 2,
            buffer_size: 64 * 1024,
            connect_timeout: Duration::from_secs(2),
            ..ProxyConfig::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = ProxyServer::new(config);
        let stats = server.stats();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        Self {
            addr,
            stats,
            stop: Some(stop),
            task,
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

/// Server side of the handshake; returns the handshake response it saw.
async fn accept_login(listener: &TcpListener) -> (TcpStream, Vec<u8>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    socket.write_all(&frame(0, &greeting())).await.unwrap();
    let (seq, response) = read_packet(&mut socket).await;
    assert_eq!(seq, 1);
    socket.write_all(&frame(2, &ok(0x0002))).await.unwrap();
    (socket, response)
}

/// Client side of the handshake.
async fn login(proxy: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();

    let (seq, greeting) = read_packet(&mut client).await;
    assert_eq!(seq, 0);
    assert_eq!(&greeting[1..7], b"8.0.36");
    let caps_offset = 1 + 7 + 4 + 9;
    let lower = u16::from_le_bytes([greeting[caps_offset], greeting[caps_offset + 1]]) as u32;
    assert_eq!(lower & capability::CLIENT_SSL, 0, "TLS must not be offered");
    assert_eq!(lower & capability::CLIENT_COMPRESS, 0);

    client
        .write_all(&frame(1, &handshake_response("shop")))
        .await
        .unwrap();
    let (seq, answer) = read_packet(&mut client).await;
    assert_eq!((seq, answer[0]), (2, 0x00));
    client
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(20), future)
        .await
        .expect("test timed out")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_and_query_round_trip() {
    within(async {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::start(backend.local_addr().unwrap()).await;

        let server = tokio::spawn(async move {
            let (mut socket, response) = accept_login(&backend).await;
            assert_eq!(response, handshake_response("shop"));

            let (seq, query) = read_packet(&mut socket).await;
            assert_eq!((seq, query.as_slice()), (0, b"\x03SELECT v FROM t".as_slice()));
            socket.write_all(&result_set(3, 10)).await.unwrap();

            let (seq, ping) = read_packet(&mut socket).await;
            assert_eq!((seq, ping.as_slice()), (0, [0x0e].as_slice()));
            socket.write_all(&frame(1, &ok(0x0002))).await.unwrap();

            // COM_QUIT is not forwarded; the proxy just hangs up
            assert!(read_to_eof(&mut socket).await.is_empty());
        });

        let mut client = login(proxy.addr).await;
        client.write_all(&frame(0, b"\x03SELECT v FROM t")).await.unwrap();
        let expected = result_set(3, 10);
        let mut response = vec![0u8; expected.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, expected);

        client.write_all(&frame(0, &[0x0e])).await.unwrap();
        let (seq, pong) = read_packet(&mut client).await;
        assert_eq!((seq, pong[0]), (1, 0x00));

        client.write_all(&frame(0, &[0x01])).await.unwrap();
        assert!(read_to_eof(&mut client).await.is_empty());
        server.await.unwrap();

        let snap = proxy.stats.snapshot();
        assert_eq!(snap.sessions_accepted, 1);
        assert_eq!(snap.commands_relayed, 2);
        assert_eq!(snap.bytes_backend_to_client, (expected.len() + 11) as u64);
        proxy.shutdown().await;
    })
    .await;
}

#[tokio::test]
async fn test_large_result_crosses_many_buffers() {
    within(async {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::start(backend.local_addr().unwrap()).await;

        // About 4 MiB of rows through 64 KiB buffers
        let expected = result_set(20_000, 200);
        let payload = expected.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = accept_login(&backend).await;
            read_packet(&mut socket).await;
            socket.write_all(&payload).await.unwrap();
            read_to_eof(&mut socket).await;
        });

        let mut client = login(proxy.addr).await;
        client.write_all(&frame(0, b"\x03SELECT v FROM big")).await.unwrap();
        let mut response = vec![0u8; expected.len()];
        client.read_exact(&mut response).await.unwrap();
        assert!(response == expected, "result bytes differ");

        drop(client);
        server.await.unwrap();
        proxy.shutdown().await;
    })
    .await;
}

#[tokio::test]
async fn test_client_disconnect_closes_backend() {
    within(async {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::start(backend.local_addr().unwrap()).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = accept_login(&backend).await;
            read_to_eof(&mut socket).await
        });

        let client = login(proxy.addr).await;
        drop(client);

        let leftover = server.await.unwrap();
        assert!(leftover.is_empty());

        // The reactor updates the counter before dropping the sockets
        assert_eq!(proxy.stats.snapshot().active_sessions, 0);
        proxy.shutdown().await;
    })
    .await;
}

#[tokio::test]
async fn test_backend_disconnect_closes_client() {
    within(async {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::start(backend.local_addr().unwrap()).await;

        let server = tokio::spawn(async move {
            let (socket, _) = accept_login(&backend).await;
            drop(socket);
        });

        let mut client = login(proxy.addr).await;
        server.await.unwrap();
        assert!(read_to_eof(&mut client).await.is_empty());
        proxy.shutdown().await;
    })
    .await;
}
