//! Shared test infrastructure: an in-process chat server
//!
//! Mirrors the booking chat server closely enough for the client: frames
//! `{message, receiver_id}` come in, blank messages are dropped, everything
//! else is broadcast back as `{message, sender, receiver, timestamp}`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub const TIMESTAMP: &str = "2024-05-01 10:00:00";

#[derive(Debug)]
enum Control {
    Push(String),
    Close,
}

#[derive(Default)]
struct ServerState {
    /// Request path of every accepted connection, in order
    paths: Vec<String>,
    /// Raw text frames received from clients
    received: Vec<String>,
    /// Live connections
    peers: Vec<mpsc::UnboundedSender<Control>>,
    /// Connections that have ended
    closed: usize,
}

/// Mock booking chat server
pub struct MockChatServer {
    addr: SocketAddr,
    /// Sender id stamped on echoed messages
    sender_id: String,
    state: Arc<Mutex<ServerState>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MockChatServer {
    /// Start a server that attributes echoed messages to `sender_id`
    pub async fn start(sender_id: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(Mutex::new(ServerState::default()));

        let server_state = state.clone();
        let sender = sender_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        if let Ok((stream, _)) = accepted {
                            let state = server_state.clone();
                            let sender = sender.clone();
                            tokio::spawn(async move {
                                let paths = state.clone();
                                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                    paths.lock().paths.push(req.uri().path().to_string());
                                    Ok(resp)
                                };
                                if let Ok(ws_stream) = accept_hdr_async(stream, callback).await {
                                    handle_connection(ws_stream, state, sender).await;
                                }
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            sender_id: sender_id.to_string(),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// host:port to configure the client with
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().paths.clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().peers.iter().filter(|p| !p.is_closed()).count()
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().closed
    }

    /// Send a raw text frame to every live connection
    pub fn push_raw(&self, frame: &str) {
        for peer in &self.state.lock().peers {
            let _ = peer.send(Control::Push(frame.to_string()));
        }
    }

    /// Deliver a chat message as if `sender` had sent it
    pub fn push_message(&self, sender: &str, message: &str) {
        self.push_raw(&broadcast_frame(sender, message, None));
    }

    /// Close every live connection from the server side
    pub fn close_all(&self) {
        for peer in &self.state.lock().peers {
            let _ = peer.send(Control::Close);
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        self.close_all();
    }
}

pub fn broadcast_frame(sender: &str, message: &str, receiver: Option<&str>) -> String {
    serde_json::json!({
        "message": message,
        "sender": sender,
        "receiver": receiver,
        "timestamp": TIMESTAMP,
    })
    .to_string()
}

async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    state: Arc<Mutex<ServerState>>,
    sender: String,
) {
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    state.lock().peers.push(control_tx);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        state.lock().received.push(text.clone());

                        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else {
                            continue;
                        };
                        let message = parsed["message"].as_str().unwrap_or("").trim().to_string();
                        if message.is_empty() {
                            continue;
                        }
                        let receiver = parsed["receiver_id"].as_str();
                        let frame = broadcast_frame(&sender, &message, receiver);
                        if write.send(WsMessage::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }

            control = control_rx.recv() => {
                match control {
                    Some(Control::Push(frame)) => {
                        if write.send(WsMessage::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Control::Close) | None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    state.lock().closed += 1;
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
