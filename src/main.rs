//! Booking Chat - command-line chat client for a booking conversation
//!
//! Joins the booking's chat channel, sends every line read from stdin and
//! prints incoming messages until Ctrl+C or end of input.

use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use booking_chat::channel::{ChatClient, ChatClientConfig};
use booking_chat::cli::{Cli, Commands, ConfigSubcommand, RunArgs};
use booking_chat::config::{self, ChatConfig};
use booking_chat::error::{Error, Result};
use booking_chat::render::TerminalSink;
use booking_chat::{logging, version};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Run(args) => run(args, cli.verbose, cli.quiet),
    };

    if let Err(e) = result {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

/// Resolve the configuration and chat until interrupted
fn run(args: RunArgs, verbose: u8, quiet: bool) -> Result<()> {
    let mut config = ChatConfig::load_unvalidated(args.config.as_deref())?;
    apply_run_args(&mut config, &args);
    config.validate()?;
    let client_config = config.client_config()?;

    // Held until exit so the file writer flushes
    let _log_guards = logging::init_logging(&config.logging, verbose, quiet)?;

    let build = version::BuildInfo::current();
    info!(
        version = %build.full_version(),
        booking_id = %client_config.session.booking_id,
        user_id = %client_config.session.current_user_id,
        "Starting booking chat"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let result = runtime.block_on(chat(client_config));

    // A blocking stdin read may still be parked; do not wait for it
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

/// Command-line options win over file and environment
fn apply_run_args(config: &mut ChatConfig, args: &RunArgs) {
    if let Some(booking) = &args.booking {
        config.session.booking_id = booking.clone();
    }
    if let Some(user) = &args.user {
        config.session.current_user_id = user.clone();
    }
    if let Some(receiver) = &args.receiver {
        config.session.receiver_id = Some(receiver.clone());
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if args.secure {
        config.server.secure = true;
    }
}

async fn chat(config: ChatClientConfig) -> Result<()> {
    let sink = TerminalSink::stdout(std::io::stdout().is_terminal());
    let client = ChatClient::start(config, sink)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Interrupted, leaving the conversation");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match client.send(line).await {
                        Ok(outcome) => debug!(?outcome, "Message accepted"),
                        Err(Error::ChannelClosed) => break,
                        // Already reported by the channel
                        Err(e) => debug!(error = %e, "Message not sent"),
                    },
                    Ok(None) => {
                        info!("End of input, leaving the conversation");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read from stdin");
                        break;
                    }
                }
            }
        }
    }

    let stats = client.snapshot().stats;
    client.shutdown().await?;
    debug!(
        sent = stats.frames_sent,
        received = stats.frames_received,
        reconnects = stats.reconnect_attempts,
        "Chat finished"
    );
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    logging::init_simple(tracing::Level::WARN)?;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ChatConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            let cfg = ChatConfig::load(config.as_deref())?;
            match cfg.session_context() {
                Ok(session) => {
                    println!("Configuration is valid.");
                    if session.receiver_id.is_none() {
                        println!("Note: no receiver_id set; messages cannot be sent until one is given.");
                    }
                }
                Err(e) => {
                    println!("Configuration is valid, but the session is incomplete:");
                    println!("  {}", e);
                }
            }
        }
    }

    Ok(())
}
