//! Listener setup and connection supervision

use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::state::AppState;
use crate::{control, heartbeat, transfer};

/// The three listening channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Transfer,
    Control,
    Heartbeat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Transfer => "transfer",
            Channel::Control => "control",
            Channel::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running listeners
pub struct RelayServer {
    transfer_addr: SocketAddr,
    control_addr: SocketAddr,
    heartbeat_addr: SocketAddr,
    trigger: ShutdownTrigger,
    listeners: JoinSet<()>,
}

impl RelayServer {
    /// Bind all three ports and start accepting
    pub async fn start(state: Arc<AppState>) -> Result<Self> {
        let (trigger, shutdown) = shutdown::channel();
        let bind = state.config.daemon.bind.as_str();

        let transfer = bind_listener(bind, state.config.transfer.port, Channel::Transfer).await?;
        let control = bind_listener(bind, state.config.control.port, Channel::Control).await?;
        let heartbeat = bind_listener(bind, state.config.heartbeat.port, Channel::Heartbeat).await?;

        let transfer_addr = transfer.local_addr()?;
        let control_addr = control.local_addr()?;
        let heartbeat_addr = heartbeat.local_addr()?;

        let mut listeners = JoinSet::new();
        for (channel, listener) in [
            (Channel::Transfer, transfer),
            (Channel::Control, control),
            (Channel::Heartbeat, heartbeat),
        ] {
            listeners.spawn(accept_loop(channel, listener, state.clone(), shutdown.clone()));
        }

        Ok(Self {
            transfer_addr,
            control_addr,
            heartbeat_addr,
            trigger,
            listeners,
        })
    }

    pub fn transfer_addr(&self) -> SocketAddr {
        self.transfer_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.heartbeat_addr
    }

    /// Stop accepting, let workers finish within the grace period, abort the rest
    pub async fn shutdown(mut self) {
        self.trigger.trigger();
        while let Some(result) = self.listeners.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Listener task failed");
            }
        }
        info!("All listeners stopped");
    }
}

/// Serve until ctrl-c
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let server = RelayServer::start(state).await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    server.shutdown().await;
    Ok(())
}

async fn bind_listener(host: &str, port: u16, channel: Channel) -> Result<TcpListener> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding {channel} listener on {host}:{port}"))?;
    info!(address = %listener.local_addr()?, channel = %channel, "Listening");
    Ok(listener)
}

/// Accept connections while a worker slot is free
///
/// A permit is taken before `accept`, so once `max_connections` workers are
/// running new clients queue in the kernel backlog.
async fn accept_loop(
    channel: Channel,
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: Shutdown,
) {
    let slots = Arc::new(Semaphore::new(state.config.daemon.max_connections));
    let mut workers = JoinSet::new();

    loop {
        let permit = tokio::select! {
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            Some(result) = workers.join_next(), if !workers.is_empty() => {
                reap(channel, result);
                continue;
            }
            _ = shutdown.recv() => break,
        };

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
            Some(result) = workers.join_next(), if !workers.is_empty() => {
                reap(channel, result);
                continue;
            }
            _ = shutdown.recv() => break,
        };

        debug!(channel = %channel, peer = %peer, "Accepted connection");
        let state = state.clone();
        let worker_shutdown = shutdown.clone();
        workers.spawn(async move {
            let _permit = permit;
            serve_connection(channel, stream, peer, state, worker_shutdown).await;
        });
    }

    drop(listener);
    let grace = Duration::from_millis(state.config.daemon.shutdown_grace_ms);
    let drained = tokio::time::timeout(grace, async {
        while let Some(result) = workers.join_next().await {
            reap(channel, result);
        }
    })
    .await;
    if drained.is_err() {
        warn!(channel = %channel, remaining = workers.len(), "Aborting connection workers");
        workers.shutdown().await;
    }
    info!(channel = %channel, "Listener stopped");
}

async fn serve_connection(
    channel: Channel,
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    shutdown: Shutdown,
) {
    let result = match channel {
        Channel::Transfer => transfer::handle_connection(stream, peer, state, shutdown).await,
        Channel::Control => control::handle_connection(stream, peer, state, shutdown).await,
        Channel::Heartbeat => heartbeat::handle_connection(stream, peer, state, shutdown).await,
    };

    match result {
        Ok(()) => debug!(channel = %channel, peer = %peer, "Connection closed"),
        Err(e) => warn!(channel = %channel, peer = %peer, error = %e, "Connection closed with error"),
    }
}

fn reap(channel: Channel, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(channel = %channel, error = %e, "Connection worker panicked");
        }
    }
}
