#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    dead_code,
    reason = "Each test crate uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use hyperliquid_stream::ws::{Client, Config, ConnectionState, ReconnectConfig};
use serde_json::Value;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// What the mock server pushes to every connected client.
#[derive(Clone, Debug)]
enum Outbound {
    Text(String),
    Ping(Vec<u8>),
    /// Send a close frame, then hang up
    Close,
    /// Hang up without a close frame
    Kick,
}

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast to ALL connected clients
    outbound_tx: broadcast::Sender<Outbound>,
    /// Text frames received from clients
    text_rx: mpsc::UnboundedReceiver<String>,
    /// Pong payloads received from clients
    pong_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    accepts: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound_tx, _) = broadcast::channel::<Outbound>(100);
        let (text_tx, text_rx) = mpsc::unbounded_channel::<String>();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let accepts = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = outbound_tx.clone();
        let accepted = Arc::clone(&accepts);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let text_tx = text_tx.clone();
                let pong_tx = pong_tx.clone();
                let mut outbound_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(text_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Pong(payload))) => {
                                        drop(pong_tx.send(payload.to_vec()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = outbound_rx.recv() => {
                                let message = match msg {
                                    Ok(Outbound::Text(text)) => Message::Text(text.into()),
                                    Ok(Outbound::Ping(payload)) => Message::Ping(payload.into()),
                                    Ok(Outbound::Close) => Message::Close(Some(CloseFrame {
                                        code: CloseCode::Away,
                                        reason: "going away".into(),
                                    })),
                                    Ok(Outbound::Kick) | Err(_) => break,
                                };
                                let closing = matches!(message, Message::Close(_));
                                if write.send(message).await.is_err() || closing {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            outbound_tx,
            text_rx,
            pong_rx,
            accepts,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.outbound_tx.send(Outbound::Text(message.to_owned())));
    }

    /// Send a JSON text frame to all connected clients.
    pub fn send_json(&self, message: &Value) {
        self.send(&message.to_string());
    }

    /// Send a protocol-level ping to all connected clients.
    pub fn ping(&self, payload: &[u8]) {
        drop(self.outbound_tx.send(Outbound::Ping(payload.to_vec())));
    }

    /// Close every connection with a close frame.
    pub fn close_all(&self) {
        drop(self.outbound_tx.send(Outbound::Close));
    }

    /// Drop every connection without a close frame.
    pub fn kick_all(&self) {
        drop(self.outbound_tx.send(Outbound::Kick));
    }

    /// Number of TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Receive the next text frame a client sent, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = timeout(RECV_TIMEOUT, self.text_rx.recv())
            .await
            .ok()
            .flatten()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Receive the next text frame that is not a heartbeat.
    pub async fn recv_request(&mut self) -> Option<Value> {
        loop {
            let message = self.recv_json().await?;
            if message["method"] != "ping" {
                return Some(message);
            }
        }
    }

    /// Receive the next pong payload a client sent.
    pub async fn recv_pong(&mut self) -> Option<Vec<u8>> {
        timeout(RECV_TIMEOUT, self.pong_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert no further text frame arrives within `wait`.
    pub async fn assert_silent(&mut self, wait: Duration) {
        let next = timeout(wait, self.text_rx.recv()).await;
        assert!(next.is_err(), "unexpected message from client: {next:?}");
    }
}

/// Mock HTTP proxy that answers `CONNECT` with 200 and then relays bytes to `upstream`.
pub struct MockProxy {
    addr: SocketAddr,
    /// Raw `CONNECT` request heads
    request_rx: mpsc::UnboundedReceiver<String>,
}

impl MockProxy {
    pub async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            loop {
                let Ok((mut inbound, _)) = listener.accept().await else {
                    break;
                };
                let request_tx = request_tx.clone();

                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut byte = [0_u8; 1];
                    while !head.ends_with(b"\r\n\r\n") {
                        if inbound.read_exact(&mut byte).await.is_err() {
                            return;
                        }
                        head.push(byte[0]);
                    }
                    drop(request_tx.send(String::from_utf8_lossy(&head).into_owned()));

                    let Ok(mut outbound) = TcpStream::connect(upstream).await else {
                        return;
                    };
                    if inbound
                        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                        .await
                        .is_err()
                    {
                        return;
                    }
                    drop(tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await);
                });
            }
        });

        Self { addr, request_rx }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn recv_request(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.request_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Config with timings short enough for tests.
#[must_use]
pub fn fast_config() -> Config {
    Config::builder()
        .reconnect(
            ReconnectConfig::default()
                .with_backoff(Duration::from_millis(50), Duration::from_millis(200)),
        )
        .build()
}

/// Wait until `client` reports a state satisfying `predicate`.
pub async fn wait_for_state<F>(client: &Client, predicate: F) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut state_rx = client.state_receiver();
    let state = timeout(RECV_TIMEOUT, state_rx.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection task dropped its state channel");
    *state
}

pub async fn wait_connected(client: &Client) {
    wait_for_state(client, |state| state.is_connected()).await;
}

/// Forwarding subscriber plus the receiving end of what it forwards.
#[must_use]
pub fn forwarder() -> (
    impl Fn(&Value) + Send + 'static,
    mpsc::UnboundedReceiver<Value>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscriber = move |data: &Value| {
        drop(tx.send(data.clone()));
    };
    (subscriber, rx)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Value>) -> Option<Value> {
    timeout(RECV_TIMEOUT, rx.recv()).await.ok().flatten()
}
