//! Channel state machine
//!
//! Owns the single live transport, the generation counter, the reconnect
//! timer and the send/receive protocol. Every input is a named transition;
//! nothing here blocks or knows which event loop drives it.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{InboundEnvelope, OutboundEnvelope};
use crate::render::{RenderSink, RenderedMessage};

use super::reconnect::{ReconnectBackoff, ReconnectPolicy};
use super::session::{ChannelEndpoint, SessionContext};
use super::state::{ConnectionState, Generation, TimerId};
use super::transport::{ChannelEvent, Connector, Scheduler, Transport, TransportEvent};

// ─────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────

/// What to do with messages typed while the channel is not open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxPolicy {
    /// Queue and flush on the next open instead of dropping
    pub queue_while_disconnected: bool,

    /// Maximum queued messages
    pub capacity: usize,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self {
            queue_while_disconnected: false,
            capacity: 50,
        }
    }
}

/// Tunables for a channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    /// Delay policy between close and the next connect
    pub reconnect: ReconnectPolicy,

    /// Give up on a transport that has not opened after this long
    /// (`None` waits indefinitely)
    pub connect_timeout: Option<Duration>,

    /// Handling of sends while not open
    pub outbox: OutboxPolicy,
}

// ─────────────────────────────────────────────────────────────────
// Outcomes and Counters
// ─────────────────────────────────────────────────────────────────

/// Result of an accepted send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport
    Sent,
    /// Held until the channel opens
    Queued,
}

/// Channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub reconnect_attempts: u64,
}

struct Connection<T> {
    generation: Generation,
    transport: T,
    /// Close requested; waiting for the transport's `Closed`
    closing: bool,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────
// Channel Manager
// ─────────────────────────────────────────────────────────────────

/// Resilient logical chat channel over an unreliable transport
pub struct ChannelManager<C: Connector, S: Scheduler, R: RenderSink> {
    session: SessionContext,
    url: Url,
    connector: C,
    scheduler: S,
    sink: R,

    state: ConnectionState,
    generation: Generation,
    connection: Option<Connection<C::Transport>>,

    backoff: ReconnectBackoff,
    connect_timeout: Option<Duration>,
    next_timer: u64,
    reconnect_timer: Option<TimerId>,
    timeout_timer: Option<TimerId>,

    outbox_policy: OutboxPolicy,
    outbox: VecDeque<OutboundEnvelope>,

    stats: ChannelStats,
}

impl<C: Connector, S: Scheduler, R: RenderSink> ChannelManager<C, S, R> {
    /// Create an idle channel; nothing is opened until [`connect`](Self::connect)
    pub fn new(
        session: SessionContext,
        endpoint: &ChannelEndpoint,
        options: ChannelOptions,
        connector: C,
        scheduler: S,
        sink: R,
    ) -> Result<Self> {
        let url = endpoint.channel_url(&session.booking_id)?;

        Ok(Self {
            session,
            url,
            connector,
            scheduler,
            sink,
            state: ConnectionState::Idle,
            generation: Generation::default(),
            connection: None,
            backoff: options.reconnect.build(),
            connect_timeout: options.connect_timeout,
            next_timer: 0,
            reconnect_timer: None,
            timeout_timer: None,
            outbox_policy: options.outbox,
            outbox: VecDeque::new(),
            stats: ChannelStats::default(),
        })
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Messages waiting for the channel to open
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Open a new transport unless one is already connecting or open
    pub fn connect(&mut self) {
        if self.state.is_final() {
            debug!("Connect ignored, channel torn down");
            return;
        }
        if self.state.is_active() {
            debug!(state = %self.state, generation = %self.generation, "Connect ignored, already active");
            return;
        }

        // An explicit connect supersedes any pending reconnect.
        self.cancel_reconnect_timer();

        if self.generation != Generation::default() {
            self.stats.reconnect_attempts += 1;
        }
        self.generation = self.generation.next();
        self.state = ConnectionState::Connecting;

        info!(generation = %self.generation, url = %self.url, "Connecting to chat channel");

        match self.connector.open(&self.url, self.generation) {
            Ok(transport) => {
                self.connection = Some(Connection {
                    generation: self.generation,
                    transport,
                    closing: false,
                });
                self.arm_connect_timeout();
            }
            Err(e) => {
                warn!(generation = %self.generation, error = %e, "Failed to open transport");
                self.enter_closed(&e.to_string());
            }
        }
    }

    /// Stop for good: cancel timers, close the transport, drop queued sends
    pub fn teardown(&mut self) {
        if self.state.is_final() {
            return;
        }

        self.cancel_reconnect_timer();
        self.cancel_timeout_timer();
        if let Some(mut connection) = self.connection.take() {
            connection.transport.close();
        }

        let dropped = self.outbox.len();
        self.outbox.clear();
        self.state = ConnectionState::ClosedFinal;

        info!(
            generation = %self.generation,
            frames_sent = self.stats.frames_sent,
            frames_received = self.stats.frames_received,
            malformed_frames = self.stats.malformed_frames,
            reconnect_attempts = self.stats.reconnect_attempts,
            dropped_queued = dropped,
            "Chat channel torn down"
        );
    }

    // ─────────────────────────────────────────────────────────────
    // Event Dispatch
    // ─────────────────────────────────────────────────────────────

    /// Feed one event into the state machine
    ///
    /// Only a malformed inbound frame produces an error, and it leaves the
    /// channel untouched.
    pub fn handle(&mut self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Transport { generation, event } => match event {
                TransportEvent::Opened => self.on_transport_open(generation),
                TransportEvent::Text(raw) => return self.on_transport_message(generation, &raw),
                TransportEvent::Binary(bytes) => return self.on_transport_binary(generation, &bytes),
                TransportEvent::Closed { reason } => self.on_transport_close(generation, &reason),
                TransportEvent::Error { message } => self.on_transport_error(generation, &message),
            },
            ChannelEvent::TimerFired(id) => self.on_timer(id),
        }
        Ok(())
    }

    /// `Connecting → Open`, then flush anything queued
    pub fn on_transport_open(&mut self, generation: Generation) {
        if !self.accepts(generation, "open") {
            return;
        }
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Open ignored outside CONNECTING");
            return;
        }
        if self.closing() {
            debug!(generation = %generation, "Open ignored, transport already closing");
            return;
        }

        self.cancel_timeout_timer();
        self.backoff.reset();
        self.state = ConnectionState::Open;
        info!(generation = %generation, "Chat channel open");

        self.flush_outbox();
    }

    /// Parse a text frame and hand it to the render sink
    pub fn on_transport_message(&mut self, generation: Generation, raw: &str) -> Result<()> {
        if !self.accepts(generation, "text") {
            return Ok(());
        }
        self.deliver(InboundEnvelope::from_json(raw))
    }

    /// Same as a text frame for binary frames carrying UTF-8 JSON
    pub fn on_transport_binary(&mut self, generation: Generation, bytes: &[u8]) -> Result<()> {
        if !self.accepts(generation, "binary") {
            return Ok(());
        }
        self.deliver(InboundEnvelope::from_json_bytes(bytes))
    }

    /// Drop the transport and schedule the next attempt
    pub fn on_transport_close(&mut self, generation: Generation, reason: &str) {
        if !self.accepts(generation, "close") {
            return;
        }

        self.connection = None;
        self.cancel_timeout_timer();
        self.enter_closed(reason);
    }

    /// Log and force the transport closed; the close does the reconnecting
    pub fn on_transport_error(&mut self, generation: Generation, message: &str) {
        if !self.accepts(generation, "error") {
            return;
        }

        let err = Error::transport(message);
        error!(generation = %generation, error = %err.format_for_log(), "Chat transport error");
        self.close_transport();
    }

    /// Route an expired timer
    pub fn on_timer(&mut self, id: TimerId) {
        if self.reconnect_timer == Some(id) {
            self.reconnect_timer = None;
            if matches!(self.state, ConnectionState::Reconnecting { .. }) {
                self.connect();
            }
        } else if self.timeout_timer == Some(id) {
            self.timeout_timer = None;
            if self.state == ConnectionState::Connecting {
                let err = Error::ConnectionTimeout {
                    url: self.url.to_string(),
                    timeout_ms: self.connect_timeout.map(millis).unwrap_or(0),
                };
                warn!(generation = %self.generation, error = %err, "Chat connection attempt timed out");
                self.close_transport();
            }
        } else {
            trace!(timer = %id, "Ignoring stale timer");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────

    /// Send a message typed by the local user
    ///
    /// Rejected locally with `InvalidInput` when the trimmed text is empty
    /// or the receiver is unknown. While not open, or while the open
    /// transport is being closed, the message is dropped with
    /// `ChannelNotReady`, or queued when the outbox policy allows.
    pub fn send(&mut self, raw_text: &str) -> Result<SendOutcome> {
        if self.state.is_final() {
            debug!("Send ignored, channel torn down");
            return Err(Error::ChannelClosed);
        }

        let envelope = OutboundEnvelope::new(raw_text, self.session.receiver_id.as_deref())
            .map_err(|e| {
                warn!(error = %e, "Rejected outgoing chat message");
                e
            })?;

        if self.writable() {
            self.write(envelope)?;
            return Ok(SendOutcome::Sent);
        }

        if !self.outbox_policy.queue_while_disconnected {
            let err = Error::not_ready(self.state);
            warn!(state = %self.state, "Dropping chat message, channel not open");
            return Err(err);
        }

        if self.outbox.len() >= self.outbox_policy.capacity {
            warn!(capacity = self.outbox_policy.capacity, "Dropping chat message, outbox full");
            return Err(Error::OutboxFull {
                capacity: self.outbox_policy.capacity,
            });
        }

        self.outbox.push_back(envelope);
        debug!(queued = self.outbox.len(), state = %self.state, "Queued chat message");
        Ok(SendOutcome::Queued)
    }

    // ─────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────

    /// Generation fence: only the live transport's events count
    fn accepts(&self, generation: Generation, kind: &'static str) -> bool {
        let live = self
            .connection
            .as_ref()
            .is_some_and(|c| c.generation == generation);

        if !live || self.state.is_final() {
            trace!(
                event = kind,
                event_generation = %generation,
                current_generation = %self.generation,
                "Ignoring event from superseded transport"
            );
            return false;
        }
        true
    }

    fn deliver(&mut self, parsed: Result<InboundEnvelope>) -> Result<()> {
        self.stats.frames_received += 1;

        let envelope = match parsed {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.malformed_frames += 1;
                warn!(generation = %self.generation, error = %e, "Dropping malformed chat frame");
                return Err(e);
            }
        };

        let is_sender = envelope.is_from(&self.session.current_user_id);
        debug!(sender = %envelope.sender, is_sender, "Chat message received");
        self.sink
            .render(RenderedMessage::new(envelope.message, envelope.timestamp, is_sender));
        Ok(())
    }

    fn write(&mut self, envelope: OutboundEnvelope) -> Result<()> {
        let frame = envelope.to_json()?;
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return Err(Error::not_ready(self.state)),
        };

        match connection.transport.send_text(frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(())
            }
            Err(e) => {
                error!(generation = %self.generation, error = %e, "Failed to write chat frame");
                self.close_transport();
                Err(e)
            }
        }
    }

    fn flush_outbox(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        debug!(queued = self.outbox.len(), "Flushing queued chat messages");

        while self.writable() {
            let Some(envelope) = self.outbox.pop_front() else {
                break;
            };
            if self.write(envelope).is_err() {
                break;
            }
        }
    }

    fn close_transport(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.closing = true;
            connection.transport.close();
        }
    }

    fn closing(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.closing)
    }

    /// Open and not waiting on a requested close
    fn writable(&self) -> bool {
        self.state.is_open() && self.connection.as_ref().is_some_and(|c| !c.closing)
    }

    /// `Closed`, then `Reconnecting(delay)` with exactly one pending timer
    fn enter_closed(&mut self, reason: &str) {
        self.state = ConnectionState::Closed;
        info!(generation = %self.generation, reason = %reason, "Chat channel closed");

        self.cancel_reconnect_timer();
        let delay = self.backoff.next_delay();
        let id = self.next_timer_id();
        self.scheduler.schedule(id, delay);
        self.reconnect_timer = Some(id);
        self.state = ConnectionState::Reconnecting { delay };

        info!(delay_ms = millis(delay), "Waiting before reconnection");
    }

    fn arm_connect_timeout(&mut self) {
        self.cancel_timeout_timer();
        if let Some(timeout) = self.connect_timeout {
            let id = self.next_timer_id();
            self.scheduler.schedule(id, timeout);
            self.timeout_timer = Some(id);
        }
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(id) = self.reconnect_timer.take() {
            self.scheduler.cancel(id);
        }
    }

    fn cancel_timeout_timer(&mut self) {
        if let Some(id) = self.timeout_timer.take() {
            self.scheduler.cancel(id);
        }
    }

    fn next_timer_id(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::render::{BubbleStyle, RecordingSink};

    #[derive(Debug, Default)]
    struct Wire {
        frames: Vec<String>,
        closed: bool,
    }

    struct FakeTransport {
        wire: Arc<Mutex<Wire>>,
        fail_sends: bool,
    }

    impl Transport for FakeTransport {
        fn send_text(&mut self, frame: String) -> Result<()> {
            if self.fail_sends {
                return Err(Error::transport("broken pipe"));
            }
            self.wire.lock().frames.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            self.wire.lock().closed = true;
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: Vec<(Generation, String, Arc<Mutex<Wire>>)>,
        fail_open: bool,
        fail_sends: bool,
    }

    impl FakeConnector {
        fn count(&self) -> usize {
            self.opened.len()
        }

        fn wire(&self, index: usize) -> Arc<Mutex<Wire>> {
            self.opened[index].2.clone()
        }

        fn frames(&self, index: usize) -> Vec<String> {
            self.opened[index].2.lock().frames.clone()
        }
    }

    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        fn open(&mut self, url: &Url, generation: Generation) -> Result<FakeTransport> {
            if self.fail_open {
                return Err(Error::transport("connection refused"));
            }
            let wire = Arc::new(Mutex::new(Wire::default()));
            self.opened.push((generation, url.to_string(), wire.clone()));
            Ok(FakeTransport {
                wire,
                fail_sends: self.fail_sends,
            })
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        armed: Vec<(TimerId, Duration)>,
        cancelled: Vec<TimerId>,
        fired: Mutex<Vec<TimerId>>,
    }

    impl FakeScheduler {
        /// Armed, not cancelled and not yet fired
        fn pending(&self) -> Vec<(TimerId, Duration)> {
            let fired = self.fired.lock();
            self.armed
                .iter()
                .filter(|(id, _)| !self.cancelled.contains(id) && !fired.contains(id))
                .copied()
                .collect()
        }
    }

    impl Scheduler for FakeScheduler {
        fn schedule(&mut self, id: TimerId, delay: Duration) {
            self.armed.push((id, delay));
        }

        fn cancel(&mut self, id: TimerId) {
            self.cancelled.push(id);
        }
    }

    type TestManager = ChannelManager<FakeConnector, FakeScheduler, RecordingSink>;

    fn manager_with(receiver: Option<&str>, options: ChannelOptions, connector: FakeConnector) -> TestManager {
        ChannelManager::new(
            SessionContext::new("B1", "U1", receiver.map(str::to_string)),
            &ChannelEndpoint::new("localhost:8000", false),
            options,
            connector,
            FakeScheduler::default(),
            RecordingSink::new(),
        )
        .unwrap()
    }

    fn manager() -> TestManager {
        manager_with(Some("U2"), ChannelOptions::default(), FakeConnector::default())
    }

    fn opened(mut m: TestManager) -> TestManager {
        m.connect();
        let generation = m.generation();
        m.on_transport_open(generation);
        assert_eq!(m.state(), ConnectionState::Open);
        m
    }

    fn fire(m: &mut TestManager, id: TimerId) {
        m.scheduler().fired.lock().push(id);
        m.handle(ChannelEvent::TimerFired(id)).unwrap();
    }

    /// Fire the single pending reconnect timer
    fn fire_reconnect(m: &mut TestManager) {
        let pending = m.scheduler().pending();
        assert_eq!(pending.len(), 1, "expected exactly one pending timer");
        fire(m, pending[0].0);
    }

    // ─── connect ────────────────────────────────────────────────

    #[test]
    fn test_connect_opens_channel_url() {
        let mut m = manager();
        assert_eq!(m.state(), ConnectionState::Idle);

        m.connect();

        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.generation(), Generation(1));
        assert_eq!(m.connector().count(), 1);
        assert_eq!(m.connector().opened[0].1, "ws://localhost:8000/ws/chat/B1/");
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut m = manager();
        m.connect();
        m.connect();
        assert_eq!(m.connector().count(), 1);

        m.on_transport_open(Generation(1));
        m.connect();
        assert_eq!(m.connector().count(), 1);
        assert_eq!(m.generation(), Generation(1));
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_open_failure_schedules_reconnect() {
        let connector = FakeConnector {
            fail_open: true,
            ..Default::default()
        };
        let mut m = manager_with(Some("U2"), ChannelOptions::default(), connector);

        m.connect();

        assert_eq!(
            m.state(),
            ConnectionState::Reconnecting { delay: Duration::from_secs(3) }
        );
        assert_eq!(m.scheduler().pending().len(), 1);
    }

    // ─── generation fencing ─────────────────────────────────────

    #[test]
    fn test_superseded_transport_events_are_ignored() {
        let mut m = manager();
        m.connect();
        m.on_transport_close(Generation(1), "network down");
        fire_reconnect(&mut m);

        assert_eq!(m.generation(), Generation(2));
        assert_eq!(m.state(), ConnectionState::Connecting);

        // Late events from the first transport
        let old = Generation(1);
        m.handle(ChannelEvent::transport(old, TransportEvent::Opened)).unwrap();
        m.handle(ChannelEvent::transport(
            old,
            TransportEvent::Text(r#"{"sender":"U2","message":"late","timestamp":"t"}"#.into()),
        ))
        .unwrap();
        m.handle(ChannelEvent::transport(old, TransportEvent::Error { message: "boom".into() }))
            .unwrap();
        m.handle(ChannelEvent::transport(old, TransportEvent::Closed { reason: "late".into() }))
            .unwrap();

        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.sink().is_empty());
        assert!(!m.connector().wire(1).lock().closed);
        assert!(m.scheduler().pending().is_empty());
        assert_eq!(m.connector().count(), 2);
    }

    #[test]
    fn test_duplicate_close_schedules_one_reconnect() {
        let mut m = opened(manager());
        m.on_transport_close(Generation(1), "gone");
        m.on_transport_close(Generation(1), "gone again");

        assert_eq!(m.scheduler().armed.len(), 1);
    }

    // ─── send gating ────────────────────────────────────────────

    #[test]
    fn test_blank_sends_write_nothing() {
        let mut m = opened(manager());

        for text in ["", "   "] {
            assert!(matches!(m.send(text), Err(Error::InvalidInput { .. })));
        }
        assert!(m.connector().frames(0).is_empty());
    }

    #[test]
    fn test_send_without_receiver_writes_nothing() {
        let mut m = opened(manager_with(None, ChannelOptions::default(), FakeConnector::default()));

        assert!(matches!(m.send("hi"), Err(Error::InvalidInput { .. })));
        assert!(m.connector().frames(0).is_empty());
    }

    #[test]
    fn test_send_while_open_writes_one_frame() {
        let mut m = opened(manager());

        assert_eq!(m.send("hi").unwrap(), SendOutcome::Sent);

        let frames = m.connector().frames(0);
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value, serde_json::json!({"message": "hi", "receiver_id": "U2"}));
        assert_eq!(m.stats().frames_sent, 1);
    }

    #[test]
    fn test_sends_keep_call_order() {
        let mut m = opened(manager());
        for text in ["one", "two", "three"] {
            m.send(text).unwrap();
        }

        let messages: Vec<String> = m
            .connector()
            .frames(0)
            .iter()
            .map(|f| serde_json::from_str::<OutboundEnvelope>(f).unwrap().message)
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_send_while_connecting_is_dropped() {
        let mut m = manager();
        m.connect();

        let err = m.send("hi").unwrap_err();
        assert!(matches!(err, Error::ChannelNotReady { .. }));
        assert!(m.connector().frames(0).is_empty());

        // Not resent once the channel opens
        m.on_transport_open(Generation(1));
        assert!(m.connector().frames(0).is_empty());
    }

    #[test]
    fn test_send_while_idle_is_dropped() {
        let mut m = manager();
        assert!(matches!(m.send("hi"), Err(Error::ChannelNotReady { .. })));
        assert_eq!(m.connector().count(), 0);
    }

    #[test]
    fn test_failed_write_closes_transport() {
        let connector = FakeConnector {
            fail_sends: true,
            ..Default::default()
        };
        let mut m = opened(manager_with(Some("U2"), ChannelOptions::default(), connector));

        assert!(matches!(m.send("hi"), Err(Error::Transport { .. })));
        assert!(m.connector().wire(0).lock().closed);
        // Reconnect waits for the close event
        assert!(m.scheduler().pending().is_empty());
    }

    // ─── receiving ──────────────────────────────────────────────

    #[test]
    fn test_sender_attribution() {
        let mut m = opened(manager());
        m.on_transport_message(Generation(1), r#"{"sender":"U1","message":"mine","timestamp":"10:00"}"#)
            .unwrap();
        m.on_transport_message(Generation(1), r#"{"sender":"U2","message":"theirs","timestamp":"10:01"}"#)
            .unwrap();
        m.on_transport_message(Generation(1), r#"{"sender":"someone","message":"other","timestamp":"10:02"}"#)
            .unwrap();

        let styles: Vec<BubbleStyle> = m.sink().messages().iter().map(|r| r.style).collect();
        assert_eq!(
            styles,
            vec![BubbleStyle::Sent, BubbleStyle::Received, BubbleStyle::Received]
        );
    }

    #[test]
    fn test_malformed_frames_do_not_disturb_channel() {
        let mut m = opened(manager());

        let not_json = m.on_transport_message(Generation(1), "<<garbage>>");
        let wrong_schema = m.on_transport_message(Generation(1), r#"{"text":"hi"}"#);

        assert!(matches!(not_json, Err(Error::Protocol { .. })));
        assert!(matches!(wrong_schema, Err(Error::Protocol { .. })));
        assert_eq!(m.state(), ConnectionState::Open);
        assert!(m.sink().is_empty());
        assert!(!m.connector().wire(0).lock().closed);
        assert_eq!(m.stats().malformed_frames, 2);

        // Still usable afterwards
        m.on_transport_message(Generation(1), r#"{"sender":"U2","message":"ok","timestamp":"t"}"#)
            .unwrap();
        assert_eq!(m.sink().len(), 1);
    }

    #[test]
    fn test_binary_frames_are_decoded() {
        let mut m = opened(manager());
        m.handle(ChannelEvent::transport(
            Generation(1),
            TransportEvent::Binary(br#"{"sender":"U2","message":"bin","timestamp":"t"}"#.to_vec()),
        ))
        .unwrap();

        assert_eq!(m.sink().messages()[0].text, "bin");
    }

    // ─── reconnecting ───────────────────────────────────────────

    #[test]
    fn test_close_reconnects_once_after_delay() {
        let mut m = opened(manager());

        m.on_transport_close(Generation(1), "server restart");

        assert_eq!(
            m.state(),
            ConnectionState::Reconnecting { delay: Duration::from_secs(3) }
        );
        let pending = m.scheduler().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1, Duration::from_secs(3));
        assert_eq!(m.connector().count(), 1, "no transport before the delay");

        let timer = pending[0].0;
        fire(&mut m, timer);
        assert_eq!(m.connector().count(), 2);
        assert_eq!(m.state(), ConnectionState::Connecting);

        // The same timer firing twice does nothing
        fire(&mut m, timer);
        assert_eq!(m.connector().count(), 2);
        assert_eq!(m.stats().reconnect_attempts, 1);
    }

    #[test]
    fn test_error_closes_but_does_not_schedule() {
        let mut m = opened(manager());

        m.on_transport_error(Generation(1), "connection reset");

        assert!(m.connector().wire(0).lock().closed);
        assert!(m.scheduler().pending().is_empty());
        assert_eq!(m.state(), ConnectionState::Open);

        m.on_transport_close(Generation(1), "after error");
        assert_eq!(m.scheduler().pending().len(), 1);
    }

    #[test]
    fn test_explicit_connect_cancels_pending_reconnect() {
        let mut m = opened(manager());
        m.on_transport_close(Generation(1), "down");
        let stale = m.scheduler().pending()[0].0;

        m.connect();

        assert_eq!(m.connector().count(), 2);
        assert!(m.scheduler().pending().is_empty());
        fire(&mut m, stale);
        assert_eq!(m.connector().count(), 2);
    }

    #[test]
    fn test_exponential_backoff_resets_on_open() {
        let options = ChannelOptions {
            reconnect: ReconnectPolicy::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
                multiplier: 2.0,
                randomization_factor: 0.0,
            },
            ..Default::default()
        };
        let mut m = manager_with(Some("U2"), options, FakeConnector::default());

        let delay_ms = |m: &TestManager| match m.state() {
            ConnectionState::Reconnecting { delay } => delay.as_millis(),
            other => panic!("not reconnecting: {other}"),
        };

        m.connect();
        m.on_transport_close(Generation(1), "refused");
        assert_eq!(delay_ms(&m), 1000);

        fire_reconnect(&mut m);
        m.on_transport_close(Generation(2), "refused");
        assert_eq!(delay_ms(&m), 2000);

        fire_reconnect(&mut m);
        m.on_transport_open(Generation(3));
        m.on_transport_close(Generation(3), "dropped");
        assert_eq!(delay_ms(&m), 1000);
    }

    #[test]
    fn test_connect_timeout_forces_close() {
        let options = ChannelOptions {
            connect_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let mut m = manager_with(Some("U2"), options, FakeConnector::default());
        m.connect();

        let pending = m.scheduler().pending();
        assert_eq!(pending, vec![(pending[0].0, Duration::from_secs(10))]);

        fire(&mut m, pending[0].0);
        assert!(m.connector().wire(0).lock().closed);
        assert_eq!(m.state(), ConnectionState::Connecting);

        m.on_transport_close(Generation(1), "timed out");
        assert!(matches!(m.state(), ConnectionState::Reconnecting { .. }));
    }

    #[test]
    fn test_open_cancels_connect_timeout() {
        let options = ChannelOptions {
            connect_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let mut m = manager_with(Some("U2"), options, FakeConnector::default());
        m.connect();
        let timeout = m.scheduler().pending()[0].0;

        m.on_transport_open(Generation(1));
        assert!(m.scheduler().pending().is_empty());

        fire(&mut m, timeout);
        assert!(!m.connector().wire(0).lock().closed);
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_open_after_connect_timeout_is_ignored() {
        let options = ChannelOptions {
            connect_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let mut m = manager_with(Some("U2"), options, FakeConnector::default());
        m.connect();
        let timeout = m.scheduler().pending()[0].0;
        fire(&mut m, timeout);

        // Handshake finished just as the timer fired
        m.on_transport_open(Generation(1));

        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(matches!(m.send("hi"), Err(Error::ChannelNotReady { .. })));
        assert!(m.connector().frames(0).is_empty());

        m.on_transport_close(Generation(1), "timed out");
        assert!(matches!(m.state(), ConnectionState::Reconnecting { .. }));
    }

    #[test]
    fn test_send_after_transport_error_is_not_written() {
        let mut m = opened(manager());
        m.on_transport_error(Generation(1), "connection reset");

        assert!(matches!(m.send("hi"), Err(Error::ChannelNotReady { .. })));
        assert!(m.connector().frames(0).is_empty());
        assert_eq!(m.stats().frames_sent, 0);
    }

    #[test]
    fn test_send_after_transport_error_is_queued_for_next_transport() {
        let options = ChannelOptions {
            outbox: OutboxPolicy {
                queue_while_disconnected: true,
                capacity: 5,
            },
            ..Default::default()
        };
        let mut m = opened(manager_with(Some("U2"), options, FakeConnector::default()));
        m.on_transport_error(Generation(1), "connection reset");

        assert_eq!(m.send("later").unwrap(), SendOutcome::Queued);
        assert!(m.connector().frames(0).is_empty());

        m.on_transport_close(Generation(1), "after error");
        fire_reconnect(&mut m);
        m.on_transport_open(Generation(2));

        assert_eq!(m.connector().frames(1).len(), 1);
        assert!(m.connector().frames(1)[0].contains("later"));
        assert_eq!(m.queued(), 0);
    }

    #[test]
    fn test_huge_durations_saturate_millis() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    // ─── outbox ─────────────────────────────────────────────────

    #[test]
    fn test_outbox_flushes_in_order_on_open() {
        let options = ChannelOptions {
            outbox: OutboxPolicy {
                queue_while_disconnected: true,
                capacity: 2,
            },
            ..Default::default()
        };
        let mut m = manager_with(Some("U2"), options, FakeConnector::default());
        m.connect();

        assert_eq!(m.send("first").unwrap(), SendOutcome::Queued);
        assert_eq!(m.send("second").unwrap(), SendOutcome::Queued);
        assert!(matches!(m.send("third"), Err(Error::OutboxFull { capacity: 2 })));
        assert!(matches!(m.send("  "), Err(Error::InvalidInput { .. })));
        assert_eq!(m.queued(), 2);

        m.on_transport_open(Generation(1));

        let messages: Vec<String> = m
            .connector()
            .frames(0)
            .iter()
            .map(|f| serde_json::from_str::<OutboundEnvelope>(f).unwrap().message)
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(m.queued(), 0);
    }

    // ─── teardown ───────────────────────────────────────────────

    #[test]
    fn test_teardown_is_terminal() {
        let mut m = opened(manager());
        m.teardown();

        assert_eq!(m.state(), ConnectionState::ClosedFinal);
        assert!(m.connector().wire(0).lock().closed);

        m.on_transport_close(Generation(1), "closed by teardown");
        m.connect();
        assert_eq!(m.connector().count(), 1);
        assert!(m.scheduler().pending().is_empty());
        assert!(matches!(m.send("hi"), Err(Error::ChannelClosed)));

        m.teardown();
        assert_eq!(m.state(), ConnectionState::ClosedFinal);
    }

    #[test]
    fn test_teardown_cancels_pending_reconnect() {
        let mut m = opened(manager());
        m.on_transport_close(Generation(1), "down");
        let timer = m.scheduler().pending()[0].0;

        m.teardown();

        assert!(m.scheduler().pending().is_empty());
        fire(&mut m, timer);
        assert_eq!(m.connector().count(), 1);
        assert_eq!(m.state(), ConnectionState::ClosedFinal);
    }

    // ─── scenario ───────────────────────────────────────────────

    #[test]
    fn test_round_trip() {
        let mut m = opened(manager());

        m.send("hello").unwrap();
        m.handle(ChannelEvent::transport(
            Generation(1),
            TransportEvent::Text(r#"{"sender":"U2","message":"hi back","timestamp":"12:00"}"#.into()),
        ))
        .unwrap();

        let frames = m.connector().frames(0);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&frames[0]).unwrap(),
            serde_json::json!({"message": "hello", "receiver_id": "U2"})
        );

        let rendered = m.sink().messages();
        assert_eq!(rendered, vec![RenderedMessage::new("hi back", "12:00", false)]);
    }
}
