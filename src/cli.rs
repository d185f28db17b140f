//! Command-line interface (clap v4)

use clap::{Parser, Subcommand};

/// Booking Chat - real-time chat for a booking conversation
///
/// Joins the chat channel of one booking, sends each line typed on stdin
/// and prints incoming messages. Reconnects automatically when the
/// connection drops.
#[derive(Parser, Debug)]
#[command(name = "booking-chat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a booking conversation
    Run(RunArgs),

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Options for `run`; each one overrides the configuration file
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, env = "BOOKING_CHAT_CONFIG")]
    pub config: Option<String>,

    /// Booking whose conversation to join
    #[arg(short, long)]
    pub booking: Option<String>,

    /// Your user id
    #[arg(short, long)]
    pub user: Option<String>,

    /// User id of the person you are chatting with
    #[arg(short, long)]
    pub receiver: Option<String>,

    /// Chat server host[:port]
    #[arg(long)]
    pub host: Option<String>,

    /// Connect with wss://
    #[arg(long)]
    pub secure: bool,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
