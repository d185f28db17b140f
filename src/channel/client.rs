//! Tokio driver for the chat channel
//!
//! Provides:
//! - One task owning the `ChannelManager`, fed by a single ordered event queue
//! - A tokio-tungstenite connector with one connection task per generation
//! - A tokio timer scheduler with cancellable timers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::render::RenderSink;

use super::manager::{ChannelManager, ChannelOptions, ChannelStats, SendOutcome};
use super::session::{ChannelEndpoint, SessionContext};
use super::state::{ConnectionState, Generation, TimerId};
use super::transport::{ChannelEvent, Connector, Scheduler, Transport, TransportEvent};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the chat client
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    /// Who is chatting about which booking
    pub session: SessionContext,

    /// Chat server location
    pub endpoint: ChannelEndpoint,

    /// Reconnect, timeout and outbox tunables
    pub options: ChannelOptions,

    /// Command queue size
    pub command_queue_size: usize,
}

impl ChatClientConfig {
    pub fn new(session: SessionContext, endpoint: ChannelEndpoint) -> Self {
        Self {
            session,
            endpoint,
            options: ChannelOptions::default(),
            command_queue_size: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Command Channel
// ─────────────────────────────────────────────────────────────────

/// Commands that can be sent to the client task
#[derive(Debug)]
pub enum ClientCommand {
    /// Send a message typed by the user
    Send {
        text: String,
        reply: Option<oneshot::Sender<Result<SendOutcome>>>,
    },

    /// Get current connection state
    GetState(oneshot::Sender<ConnectionState>),

    /// Tear the channel down and stop the task
    Shutdown,
}

/// Last published view of the channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub state: ConnectionState,
    pub generation: Generation,
    pub stats: ChannelStats,
}

// ─────────────────────────────────────────────────────────────────
// Chat Client
// ─────────────────────────────────────────────────────────────────

/// Handle to a running chat channel
pub struct ChatClient {
    command_tx: mpsc::Sender<ClientCommand>,
    snapshot: Arc<RwLock<ClientSnapshot>>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// Start the channel over WebSocket and begin connecting
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R>(config: ChatClientConfig, sink: R) -> Result<Self>
    where
        R: RenderSink + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(event_tx.clone());
        let scheduler = TokioScheduler::new(event_tx);
        let manager = ChannelManager::new(
            config.session,
            &config.endpoint,
            config.options,
            connector,
            scheduler,
            sink,
        )?;

        info!(url = %manager.url(), booking_id = %manager.session().booking_id, "Starting chat client");

        let (command_tx, command_rx) = mpsc::channel(config.command_queue_size.max(1));
        let snapshot = Arc::new(RwLock::new(ClientSnapshot::default()));

        let task = tokio::spawn(run_client_loop(manager, event_rx, command_rx, snapshot.clone()));

        Ok(Self {
            command_tx,
            snapshot,
            task,
        })
    }

    /// Send a command to the client task
    pub async fn send_command(&self, command: ClientCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Send a message and wait for the channel's verdict
    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(ClientCommand::Send {
            text: text.into(),
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Ask the client task for its state
    pub async fn query_state(&self) -> Result<ConnectionState> {
        let (tx, rx) = oneshot::channel();
        self.send_command(ClientCommand::GetState(tx)).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Get current connection state without a round trip
    pub fn connection_state(&self) -> ConnectionState {
        self.snapshot.read().state
    }

    /// Get the last published state, generation and counters
    pub fn snapshot(&self) -> ClientSnapshot {
        *self.snapshot.read()
    }

    /// Check if the channel is open
    pub fn is_open(&self) -> bool {
        self.connection_state().is_open()
    }

    /// Tear the channel down and wait for the task to finish
    pub async fn shutdown(self) -> Result<()> {
        // The task may already be gone; teardown then happened on its own.
        let _ = self.command_tx.send(ClientCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("chat client task failed: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Loop
// ─────────────────────────────────────────────────────────────────

/// Main client loop: the only place the manager is touched
async fn run_client_loop<C, S, R>(
    mut manager: ChannelManager<C, S, R>,
    mut event_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    snapshot: Arc<RwLock<ClientSnapshot>>,
) where
    C: Connector,
    S: Scheduler,
    R: RenderSink,
{
    manager.connect();
    publish(&manager, &snapshot);

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                // Malformed frames are logged by the manager and change nothing.
                let _ = manager.handle(event);
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send { text, reply }) => {
                        let result = manager.send(&text);
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Some(ClientCommand::GetState(tx)) => {
                        let _ = tx.send(manager.state());
                    }
                    Some(ClientCommand::Shutdown) => {
                        info!("Shutdown command received");
                        manager.teardown();
                        publish(&manager, &snapshot);
                        break;
                    }
                    None => {
                        info!("Command channel closed");
                        manager.teardown();
                        publish(&manager, &snapshot);
                        break;
                    }
                }
            }
        }

        publish(&manager, &snapshot);
    }

    info!("Chat client loop terminated");
}

fn publish<C, S, R>(manager: &ChannelManager<C, S, R>, snapshot: &RwLock<ClientSnapshot>)
where
    C: Connector,
    S: Scheduler,
    R: RenderSink,
{
    *snapshot.write() = ClientSnapshot {
        state: manager.state(),
        generation: manager.generation(),
        stats: manager.stats(),
    };
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Transport
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close,
}

/// Opens tokio-tungstenite connections, one task per generation
pub struct WsConnector {
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl WsConnector {
    pub fn new(event_tx: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self { event_tx }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn open(&mut self, url: &Url, generation: Generation) -> Result<WsTransport> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("no tokio runtime: {}", e)))?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_connection(
            url.clone(),
            generation,
            outgoing_rx,
            self.event_tx.clone(),
        ));

        Ok(WsTransport { outgoing_tx })
    }
}

/// Write side of one WebSocket connection
pub struct WsTransport {
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, frame: String) -> Result<()> {
        self.outgoing_tx
            .send(Outgoing::Text(frame))
            .map_err(|_| Error::transport("connection task has ended"))
    }

    fn close(&mut self) {
        let _ = self.outgoing_tx.send(Outgoing::Close);
    }
}

/// Drive one WebSocket connection and report everything it does
///
/// Reports `Closed` exactly once, whatever the way out.
async fn run_connection(
    url: Url,
    generation: Generation,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    let emit = |event: TransportEvent| {
        let _ = event_tx.send(ChannelEvent::transport(generation, event));
    };

    debug!(generation = %generation, url = %url, "Opening WebSocket");

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        // Nothing but a close can be queued before the channel is open.
        _ = outgoing_rx.recv() => {
            emit(TransportEvent::Closed { reason: "closed before open".to_string() });
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            emit(TransportEvent::Error { message: e.to_string() });
            emit(TransportEvent::Closed { reason: "connect failed".to_string() });
            return;
        }
    };

    emit(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => emit(TransportEvent::Text(text)),
                    Some(Ok(WsMessage::Binary(data))) => emit(TransportEvent::Binary(data)),
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            emit(TransportEvent::Error { message: e.to_string() });
                            break "pong failed".to_string();
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("server closed ({}): {}", u16::from(frame.code), frame.reason),
                            None => "server closed".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        emit(TransportEvent::Error { message: e.to_string() });
                        break "read failed".to_string();
                    }
                    None => break "stream ended".to_string(),
                }
            }

            cmd = outgoing_rx.recv() => {
                match cmd {
                    Some(Outgoing::Text(frame)) => {
                        if let Err(e) = write.send(WsMessage::Text(frame)).await {
                            emit(TransportEvent::Error { message: e.to_string() });
                            break "write failed".to_string();
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break "closed by client".to_string();
                    }
                }
            }
        }
    };

    debug!(generation = %generation, reason = %reason, "WebSocket finished");
    emit(TransportEvent::Closed { reason });
}

// ─────────────────────────────────────────────────────────────────
// Timers
// ─────────────────────────────────────────────────────────────────

/// One tokio sleep task per timer; cancel aborts it
pub struct TokioScheduler {
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(event_tx: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            event_tx,
            timers: HashMap::new(),
        }
    }

    /// Timers armed and not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration) {
        self.timers.retain(|_, timer| !timer.is_finished());

        let event_tx = self.event_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(ChannelEvent::TimerFired(id));
        });
        self.timers.insert(id, timer);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
