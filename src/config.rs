//! Configuration system for the booking chat client
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (BOOKING_CHAT_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::{
    ChannelEndpoint, ChannelOptions, ChatClientConfig, OutboxPolicy, ReconnectPolicy,
    SessionContext,
};
use crate::error::{Error, Result};

/// Main chat client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Booking conversation and participants
    pub session: SessionSettings,

    /// Chat server location
    pub server: ServerSettings,

    /// Reconnection behaviour
    pub reconnect: ReconnectSettings,

    /// Messages typed while disconnected
    pub outbox: OutboxSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Booking conversation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Booking whose conversation to join
    pub booking_id: String,

    /// Id of the user running this client
    pub current_user_id: String,

    /// Counterpart user id; without it nothing can be sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

/// Chat server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host and optional port, without scheme (e.g. "localhost:8000")
    pub host: String,

    /// Use wss:// instead of ws://
    pub secure: bool,
}

/// Reconnect delay policy name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Fixed,
    Exponential,
}

/// Reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// fixed or exponential
    pub policy: PolicyKind,

    /// Delay before reconnecting (initial delay for exponential)
    pub delay_ms: u64,

    /// Upper bound for exponential delays
    pub max_delay_ms: u64,

    /// Growth factor for exponential delays
    pub multiplier: f64,

    /// Jitter as a fraction of the delay (0.0 - 1.0)
    pub randomization_factor: f64,

    /// Give up on a connection attempt after this long (0 = wait indefinitely)
    pub connect_timeout_ms: u64,
}

/// Outbound queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    /// Queue messages while disconnected instead of dropping them
    pub queue_while_disconnected: bool,

    /// Maximum queued messages
    pub capacity: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost:8000".to_string(),
            secure: false,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Fixed,
            delay_ms: 3000,
            max_delay_ms: 30000,
            multiplier: 2.0,
            randomization_factor: 0.5,
            connect_timeout_ms: 0, // Wait indefinitely
        }
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            queue_while_disconnected: false,
            capacity: 50,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ChatConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_unvalidated(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`load`](Self::load) without validation, for callers that
    /// apply further overrides first and then call [`validate`](Self::validate)
    pub fn load_unvalidated(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)?;
            config = toml::from_str(&content).map_err(|e| {
                Error::config_parse(format!("{}: {}", path.display(), e.message()), Some(e))
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::config_not_found(path));
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("booking-chat.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("booking-chat").join("chat.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".booking-chat").join("chat.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/booking-chat/chat.toml"),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Session settings
        if let Ok(val) = std::env::var("BOOKING_CHAT_BOOKING_ID") {
            self.session.booking_id = val;
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_USER_ID") {
            self.session.current_user_id = val;
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_RECEIVER_ID") {
            self.session.receiver_id = Some(val);
        }

        // Server settings
        if let Ok(val) = std::env::var("BOOKING_CHAT_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_SECURE") {
            self.server.secure = parse_bool(&val);
        }

        // Reconnect settings
        if let Ok(val) = std::env::var("BOOKING_CHAT_RECONNECT_POLICY") {
            match val.to_lowercase().as_str() {
                "fixed" => self.reconnect.policy = PolicyKind::Fixed,
                "exponential" => self.reconnect.policy = PolicyKind::Exponential,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_RECONNECT_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.reconnect.delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_MAX_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.reconnect.max_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.reconnect.connect_timeout_ms = n;
            }
        }

        // Outbox settings
        if let Ok(val) = std::env::var("BOOKING_CHAT_QUEUE_WHILE_DISCONNECTED") {
            self.outbox.queue_while_disconnected = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_OUTBOX_CAPACITY") {
            if let Ok(n) = val.parse() {
                self.outbox.capacity = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("BOOKING_CHAT_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("BOOKING_CHAT_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate everything except the session ids
    ///
    /// The ids usually arrive on the command line, after loading.
    pub fn validate(&self) -> Result<()> {
        // Validate server host
        let host = self.server.host.trim();
        if host.is_empty() {
            return Err(Error::config_field_invalid("server.host", "Server host cannot be empty"));
        }
        if host.contains("://") || host.contains(['/', '?', '#']) {
            return Err(Error::config_field_invalid(
                "server.host",
                format!("Server host '{}' must not contain a scheme or path", host),
            ));
        }

        // Validate reconnect policy
        if self.reconnect.delay_ms == 0 {
            return Err(Error::config_field_invalid(
                "reconnect.delay_ms",
                "delay_ms must be greater than 0",
            ));
        }
        if self.reconnect.policy == PolicyKind::Exponential {
            if self.reconnect.max_delay_ms < self.reconnect.delay_ms {
                return Err(Error::config_field_invalid(
                    "reconnect.max_delay_ms",
                    "max_delay_ms must be at least delay_ms",
                ));
            }
            if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
                return Err(Error::config_field_invalid(
                    "reconnect.multiplier",
                    "multiplier must be at least 1.0",
                ));
            }
            if !(0.0..=1.0).contains(&self.reconnect.randomization_factor) {
                return Err(Error::config_field_invalid(
                    "reconnect.randomization_factor",
                    "randomization_factor must be between 0.0 and 1.0",
                ));
            }
        }

        // Validate outbox
        if self.outbox.queue_while_disconnected && self.outbox.capacity == 0 {
            return Err(Error::config_field_invalid(
                "outbox.capacity",
                "capacity must be greater than 0 when queueing is enabled",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Build the session context, requiring booking and user ids
    pub fn session_context(&self) -> Result<SessionContext> {
        let booking_id = self.session.booking_id.trim();
        if booking_id.is_empty() {
            return Err(Error::config_field_invalid(
                "session.booking_id",
                "booking_id is required (set it in [session] or pass --booking)",
            ));
        }
        let current_user_id = self.session.current_user_id.trim();
        if current_user_id.is_empty() {
            return Err(Error::config_field_invalid(
                "session.current_user_id",
                "current_user_id is required (set it in [session] or pass --user)",
            ));
        }

        Ok(SessionContext::new(
            booking_id,
            current_user_id,
            self.session.receiver_id.clone(),
        ))
    }

    /// Chat server location
    pub fn endpoint(&self) -> ChannelEndpoint {
        ChannelEndpoint::new(self.server.host.trim(), self.server.secure)
    }

    /// Reconnect, timeout and outbox options for the channel
    pub fn channel_options(&self) -> ChannelOptions {
        let reconnect = match self.reconnect.policy {
            PolicyKind::Fixed => ReconnectPolicy::Fixed {
                delay: Duration::from_millis(self.reconnect.delay_ms),
            },
            PolicyKind::Exponential => ReconnectPolicy::Exponential {
                initial: Duration::from_millis(self.reconnect.delay_ms),
                max: Duration::from_millis(self.reconnect.max_delay_ms),
                multiplier: self.reconnect.multiplier,
                randomization_factor: self.reconnect.randomization_factor,
            },
        };

        let connect_timeout = match self.reconnect.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        ChannelOptions {
            reconnect,
            connect_timeout,
            outbox: OutboxPolicy {
                queue_while_disconnected: self.outbox.queue_while_disconnected,
                capacity: self.outbox.capacity,
            },
        }
    }

    /// Everything the chat client needs to start
    pub fn client_config(&self) -> Result<ChatClientConfig> {
        let mut config = ChatClientConfig::new(self.session_context()?, self.endpoint());
        config.options = self.channel_options();
        Ok(config)
    }
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
///
/// Returns the path that was written.
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".booking-chat")
                .join("chat.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::IoWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|source| Error::IoWrite {
        path: config_path.clone(),
        source,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# Booking Chat Configuration

[session]
# Booking whose conversation to join
booking_id = ""

# Id of the user running this client
current_user_id = ""

# Counterpart user id (required to send messages)
# receiver_id = "42"

[server]
# Chat server host and port, without scheme
host = "localhost:8000"

# Use wss:// instead of ws://
secure = false

[reconnect]
# Delay policy: fixed or exponential
policy = "fixed"

# Delay before reconnecting in milliseconds (initial delay for exponential)
delay_ms = 3000

# Upper bound for exponential delays in milliseconds
max_delay_ms = 30000

# Growth factor for exponential delays
multiplier = 2.0

# Jitter as a fraction of the delay (0.0 - 1.0)
randomization_factor = 0.5

# Connection attempt timeout in milliseconds (0 = wait indefinitely)
connect_timeout_ms = 0

[outbox]
# Queue messages typed while disconnected and send them on reconnect
queue_while_disconnected = false

# Maximum queued messages
capacity = 50

[logging]
# Log level: trace, debug, info, warn, error
level = "warn"

# Log file path (comment out to disable file logging)
# file = "~/.booking-chat/logs/chat.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
