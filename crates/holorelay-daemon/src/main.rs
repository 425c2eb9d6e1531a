//! HoloRelay - Main entry point
//!
//! Runs the relay daemon, or acts as a client of a running one.

use anyhow::Result;
use clap::{Parser, Subcommand};
use holorelay_core::HeadlessEngine;
use holorelay_daemon::{client, config, server, state};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "holorelay")]
#[command(about = "TCP relay feeding models, appearance commands and heartbeats to a viewer")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "holorelay.toml")]
    config: PathBuf,

    /// Bind address for all listeners
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the relay (default)
    Serve,
    /// Send files over the transfer channel
    Push {
        /// Transfer address, defaults to localhost and the configured port
        #[arg(long)]
        addr: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Send JSON command lines over the control channel
    Send {
        #[arg(long)]
        addr: Option<String>,
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// Print heartbeat lines
    Watch {
        #[arg(long)]
        addr: Option<String>,
        /// Stop after this many lines
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.init_config {
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    match args.command.unwrap_or(Cmd::Serve) {
        Cmd::Serve => {
            info!("HoloRelay v{}", env!("CARGO_PKG_VERSION"));
            info!(
                transfer = config.transfer.port,
                control = config.control.port,
                heartbeat = config.heartbeat.port,
                storage = %config.transfer.storage_root.display(),
                "Configuration loaded"
            );

            let engine = HeadlessEngine::new(config.markers.anchor);
            let state = state::AppState::new(config, engine).await?;
            server::run(state).await?;
        }
        Cmd::Push { addr, files } => {
            let addr = addr.unwrap_or_else(|| local(config.transfer.port));
            let sent = client::push_files(addr.as_str(), &files).await?;
            println!("Sent {} file(s) to {}", sent, addr);
        }
        Cmd::Send { addr, lines } => {
            let addr = addr.unwrap_or_else(|| local(config.control.port));
            client::send_lines(addr.as_str(), &lines).await?;
            println!("Sent {} command(s) to {}", lines.len(), addr);
        }
        Cmd::Watch { addr, count } => {
            let addr = addr.unwrap_or_else(|| local(config.heartbeat.port));
            let mut watcher = client::HeartbeatWatcher::connect(addr.as_str()).await?;
            let mut seen = 0;
            while count.map_or(true, |limit| seen < limit) {
                let Some(line) = watcher.next_line().await? else {
                    break;
                };
                println!("{}", line);
                seen += 1;
            }
        }
    }

    Ok(())
}

fn local(port: u16) -> String {
    format!("127.0.0.1:{port}")
}
