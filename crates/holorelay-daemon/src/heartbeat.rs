//! Heartbeat broadcaster
//!
//! Every client gets its own writer loop: snapshot the cached part metadata
//! of the configured model, write it as one JSON line, wait one interval.
//! Inbound bytes are discarded. A reset seen while waiting ends the client
//! early; otherwise the next failed write does.

use anyhow::Result;
use holorelay_core::RelayEvent;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::shutdown::Shutdown;
use crate::state::AppState;

/// Live heartbeat connections
#[derive(Debug, Default)]
pub struct HeartbeatClients {
    clients: Mutex<HashMap<Uuid, SocketAddr>>,
}

impl HeartbeatClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, peer: SocketAddr) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.lock().await.insert(id, peer);
        id
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        self.clients.lock().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        self.clients.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

enum Wake {
    Tick,
    PeerReset,
    Shutdown,
}

/// Serve one heartbeat client until it disconnects or shutdown fires
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    shutdown: Shutdown,
) -> Result<()> {
    let id = state.clients.register(peer).await;
    info!(client = %id, peer = %peer, "Heartbeat client connected");
    state.emit(RelayEvent::HeartbeatClientJoined { id: id.to_string() });

    let result = serve_client(stream, &state, shutdown).await;

    state.clients.remove(&id).await;
    info!(client = %id, peer = %peer, "Heartbeat client disconnected");
    state.emit(RelayEvent::HeartbeatClientLeft { id: id.to_string() });
    result
}

async fn serve_client(mut stream: TcpStream, state: &AppState, mut shutdown: Shutdown) -> Result<()> {
    let (mut reader, mut writer) = stream.split();
    let interval = state.config.heartbeat.interval();
    let model = state.config.heartbeat.model.to_lowercase();
    let mut scratch = [0u8; 512];
    // A push-only peer may half-close its side; after EOF only writes matter
    let mut reading = true;

    loop {
        let line = state.registry.heartbeat_snapshot(&model).await.to_line()?;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!(error = %e, "Heartbeat write failed");
            return Ok(());
        }

        let sleep = tokio::time::sleep(interval);
        tokio::pin!(sleep);
        let wake = loop {
            tokio::select! {
                _ = &mut sleep => break Wake::Tick,
                _ = shutdown.recv() => break Wake::Shutdown,
                read = reader.read(&mut scratch), if reading => match read {
                    Ok(0) => {
                        debug!("Heartbeat peer finished sending");
                        reading = false;
                    }
                    Ok(_) => {}
                    Err(_) => break Wake::PeerReset,
                },
            }
        };

        match wake {
            Wake::Tick => {}
            Wake::PeerReset => {
                debug!("Heartbeat peer reset");
                return Ok(());
            }
            Wake::Shutdown => return Ok(()),
        }
    }
}
