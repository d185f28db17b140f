//! Error types for the booking chat client
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Classification of what the channel does with each error
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of a rejected frame kept in a protocol error
const FRAME_PREVIEW_CHARS: usize = 120;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionTimeout = 301,
    TransportError = 302,
    InvalidUrl = 303,

    // Protocol errors (4xx)
    ProtocolMalformed = 400,

    // Channel errors (5xx)
    InvalidInput = 500,
    ChannelNotReady = 501,
    OutboxFull = 502,
    ChannelClosed = 503,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Connection errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Channel errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the chat client
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Underlying socket failed; the channel closes it and reconnects
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Transport never reported open, close or error in time
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Channel URL could not be built
    #[error("Invalid channel URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Inbound frame is not a valid chat envelope
    #[error("Malformed chat frame: {message}")]
    Protocol { message: String, frame: String },

    // ─────────────────────────────────────────────────────────────
    // Channel Errors
    // ─────────────────────────────────────────────────────────────

    /// Empty message or missing receiver
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Send attempted while the channel is not open
    #[error("Channel not ready (state: {state})")]
    ChannelNotReady { state: String },

    /// Outbound queue reached capacity
    #[error("Outbound queue full ({capacity} messages)")]
    OutboxFull { capacity: usize },

    /// The channel has been torn down
    #[error("Channel closed")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::Transport { .. } => ErrorCode::TransportError,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::InvalidUrl { .. } => ErrorCode::InvalidUrl,

            Error::Protocol { .. } => ErrorCode::ProtocolMalformed,

            Error::InvalidInput { .. } => ErrorCode::InvalidInput,
            Error::ChannelNotReady { .. } => ErrorCode::ChannelNotReady,
            Error::OutboxFull { .. } => ErrorCode::OutboxFull,
            Error::ChannelClosed => ErrorCode::ChannelClosed,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is healed by reconnecting the channel
    ///
    /// Only the connection is ever retried; individual messages are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::ConnectionTimeout { .. })
    }

    /// Check if the error is fatal (the process should exit)
    ///
    /// Nothing that happens on a running channel is fatal; only startup
    /// problems are.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::InvalidUrl { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'booking-chat config init' to create a default configuration file.",
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'booking-chat config validate' to see details.",
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values.",
            ),
            Error::InvalidUrl { .. } => Some(
                "Set [server] host to a bare host[:port] such as 'localhost:8000'.",
            ),
            Error::Transport { .. } => Some(
                "Connection was interrupted. The chat will automatically attempt to reconnect.",
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The chat server may be down or unreachable. Check the host and your firewall settings.",
            ),
            Error::InvalidInput { .. } => Some(
                "Type a non-empty message and make sure a receiver is configured.",
            ),
            Error::ChannelNotReady { .. } => Some(
                "Wait for the connection to open, or enable [outbox] queue_while_disconnected.",
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>, source: Option<toml::de::Error>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol error, keeping a short preview of the offending frame
    pub fn protocol(message: impl Into<String>, frame: &str) -> Self {
        Error::Protocol {
            message: message.into(),
            frame: frame.chars().take(FRAME_PREVIEW_CHARS).collect(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a channel not ready error
    pub fn not_ready(state: impl fmt::Display) -> Self {
        Error::ChannelNotReady {
            state: state.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::TransportError.as_str(), "E302");
        assert_eq!(ErrorCode::ProtocolMalformed.as_str(), "E400");
        assert_eq!(ErrorCode::ChannelNotReady.as_str(), "E501");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigValidation.exit_code(), 10);
        assert_eq!(ErrorCode::IoWrite.exit_code(), 20);
        assert_eq!(ErrorCode::InvalidUrl.exit_code(), 30);
        assert_eq!(ErrorCode::InvalidInput.exit_code(), 50);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::transport("reset").code(), ErrorCode::TransportError);
        assert_eq!(Error::protocol("bad", "{").code(), ErrorCode::ProtocolMalformed);
        assert_eq!(Error::invalid_input("empty").code(), ErrorCode::InvalidInput);
        assert_eq!(Error::ChannelClosed.code(), ErrorCode::ChannelClosed);
    }

    #[test]
    fn test_connection_errors_share_exit_code() {
        let timeout = Error::ConnectionTimeout { url: "ws://x".into(), timeout_ms: 10 };
        assert_eq!(timeout.code(), ErrorCode::ConnectionTimeout);
        assert_eq!(timeout.code().as_str(), "E301");

        for err in [Error::transport("reset"), timeout] {
            assert_eq!(err.code().exit_code(), 30);
            assert!(err.suggestion().is_some());
        }
    }

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(Error::transport("reset").is_retryable());
        assert!(Error::ConnectionTimeout { url: "ws://x".into(), timeout_ms: 10 }.is_retryable());
        assert!(!Error::protocol("bad", "{").is_retryable());
        assert!(!Error::invalid_input("empty").is_retryable());
        assert!(!Error::not_ready("CONNECTING").is_retryable());
    }

    #[test]
    fn test_channel_errors_are_not_fatal() {
        assert!(!Error::transport("reset").is_fatal());
        assert!(!Error::protocol("bad", "{").is_fatal());
        assert!(!Error::invalid_input("empty").is_fatal());
        assert!(!Error::not_ready("CLOSED").is_fatal());
        assert!(Error::config_not_found("/x").is_fatal());
    }

    #[test]
    fn test_protocol_error_truncates_frame() {
        let frame = "x".repeat(500);
        match Error::protocol("not json", &frame) {
            Error::Protocol { frame, .. } => assert_eq!(frame.len(), FRAME_PREVIEW_CHARS),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_not_ready_display() {
        let err = Error::not_ready("RECONNECTING(3000ms)");
        assert!(err.to_string().contains("RECONNECTING(3000ms)"));
    }

    #[test]
    fn test_format_for_terminal() {
        let formatted = Error::config_not_found("/test/chat.toml").format_for_terminal();

        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("config init"));
    }

    #[test]
    fn test_format_for_log() {
        let formatted = Error::config_not_found("/test/chat.toml").format_for_log();

        assert!(formatted.contains("[E100]"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }
}
