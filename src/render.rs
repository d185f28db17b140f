//! Render sinks for received chat messages
//!
//! A sink appends a message to an append-only display and reports nothing
//! back to the channel.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Visual style of a chat bubble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleStyle {
    /// Written by the local user
    Sent,
    /// Written by the counterpart
    Received,
}

impl BubbleStyle {
    /// Style class name
    pub fn as_str(&self) -> &'static str {
        match self {
            BubbleStyle::Sent => "sent",
            BubbleStyle::Received => "received",
        }
    }
}

/// A displayable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub timestamp: String,
    pub style: BubbleStyle,
}

impl RenderedMessage {
    pub fn new(text: impl Into<String>, timestamp: impl Into<String>, is_sender: bool) -> Self {
        Self {
            text: text.into(),
            timestamp: timestamp.into(),
            style: if is_sender {
                BubbleStyle::Sent
            } else {
                BubbleStyle::Received
            },
        }
    }

    pub fn is_sender(&self) -> bool {
        self.style == BubbleStyle::Sent
    }
}

/// Fire-and-forget display surface
pub trait RenderSink {
    fn render(&mut self, message: RenderedMessage);
}

impl<F> RenderSink for F
where
    F: FnMut(RenderedMessage),
{
    fn render(&mut self, message: RenderedMessage) {
        self(message)
    }
}

// ─────────────────────────────────────────────────────────────────
// Terminal Sink
// ─────────────────────────────────────────────────────────────────

/// Writes one line per message to a terminal or any writer
pub struct TerminalSink<W: Write> {
    writer: W,
    color: bool,
}

impl TerminalSink<std::io::Stdout> {
    /// Sink on standard output
    pub fn stdout(color: bool) -> Self {
        Self::new(std::io::stdout(), color)
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(writer: W, color: bool) -> Self {
        Self { writer, color }
    }

    /// Consume the sink and return the writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn format(&self, message: &RenderedMessage) -> String {
        let text = sanitize(&message.text);
        let timestamp = sanitize(&message.timestamp);
        let (marker, color) = match message.style {
            BubbleStyle::Sent => ("you  >", "\x1b[32m"),
            BubbleStyle::Received => ("them <", "\x1b[36m"),
        };

        if self.color {
            format!("\x1b[2m[{}]\x1b[0m {}{}\x1b[0m {}", timestamp, color, marker, text)
        } else {
            format!("[{}] {} {}", timestamp, marker, text)
        }
    }
}

impl<W: Write> RenderSink for TerminalSink<W> {
    fn render(&mut self, message: RenderedMessage) {
        let line = self.format(&message);
        if let Err(e) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
            warn!(error = %e, "Failed to render chat message");
        }
    }
}

/// Replace control characters so peer text cannot drive the terminal
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

// ─────────────────────────────────────────────────────────────────
// Recording Sink
// ─────────────────────────────────────────────────────────────────

/// Keeps every rendered message in memory; clones share the same list
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<RenderedMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything rendered so far
    pub fn messages(&self) -> Vec<RenderedMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl RenderSink for RecordingSink {
    fn render(&mut self, message: RenderedMessage) {
        self.messages.lock().push(message);
    }
}
