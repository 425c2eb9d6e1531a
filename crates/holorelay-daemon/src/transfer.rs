//! Asset transfer channel
//!
//! Frames are read back to back until the peer closes. Each payload is
//! streamed straight to the storage root, then the file is classified: model
//! files are queued for loading and the name-list file replaces the skin
//! part names.

use anyhow::Result;
use chrono::Utc;
use holorelay_core::asset::{is_storable_name, parse_name_list, sanitize_file_name};
use holorelay_core::frame::{read_header, stream_payload};
use holorelay_core::{AssetKind, AssetRules, EngineRequest, FrameError, FrameHeader, RelayEvent};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::shutdown::Shutdown;
use crate::state::AppState;

/// Serve one transfer connection until the peer closes or a frame fails
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let limits = state.config.frame_limits();
    let rules = state.config.asset_rules();
    let mut frames = 0u64;

    loop {
        let header = tokio::select! {
            header = read_header(&mut reader, &limits) => header?,
            _ = shutdown.recv() => {
                debug!(peer = %peer, frames, "Transfer connection closing for shutdown");
                return Ok(());
            }
        };

        let Some(header) = header else {
            debug!(peer = %peer, frames, "Transfer connection closed by peer");
            return Ok(());
        };

        receive_file(&mut reader, peer, &header, &state, &rules).await?;
        frames += 1;
    }
}

/// Store one payload and act on it
///
/// Only stream-level failures are returned; a file that cannot be written
/// is drained and skipped so the connection stays usable.
async fn receive_file<R>(
    reader: &mut R,
    peer: SocketAddr,
    header: &FrameHeader,
    state: &AppState,
    rules: &AssetRules,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let file_name = sanitize_file_name(&header.name);
    if !is_storable_name(&file_name) {
        warn!(peer = %peer, name = ?header.name, "Unusable file name, discarding payload");
        stream_payload::<_, File>(reader, header.payload_len, None).await?;
        return Ok(());
    }

    let path = state.config.transfer.storage_root.join(&file_name);
    let mut file = match File::create(&path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(peer = %peer, path = %path.display(), error = %e, "Failed to create file, discarding payload");
            None
        }
    };
    let created = file.is_some();

    let receipt = match stream_payload(reader, header.payload_len, file.as_mut()).await {
        Ok(receipt) => receipt,
        Err(e) => {
            drop(file);
            if created {
                let _ = tokio::fs::remove_file(&path).await;
            }
            return Err(e);
        }
    };
    drop(file);

    if !created {
        return Ok(());
    }
    if let Some(e) = receipt.write_error {
        warn!(peer = %peer, path = %path.display(), error = %e, "Failed to write file, transfer aborted");
        let _ = tokio::fs::remove_file(&path).await;
        return Ok(());
    }

    info!(
        peer = %peer,
        file = %file_name,
        bytes = receipt.bytes,
        sha256 = %receipt.sha256,
        "Received file"
    );
    state.emit(RelayEvent::AssetStored {
        file_name: file_name.clone(),
        path: path.clone(),
        bytes: receipt.bytes,
        sha256: receipt.sha256,
        received_at: Utc::now(),
    });

    match rules.classify(&file_name) {
        AssetKind::Model(name) => {
            debug!(model = %name, "Queueing model load");
            if let Err(e) = state.dispatcher.send(EngineRequest::LoadAsset { path, name }) {
                warn!(file = %file_name, error = %e, "Failed to queue model load");
            }
        }
        AssetKind::NameList => load_name_list(&path, state).await,
        AssetKind::Other => {}
    }

    Ok(())
}

async fn load_name_list(path: &Path, state: &AppState) {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read name list");
            return;
        }
    };

    let names = parse_name_list(&String::from_utf8_lossy(&content));
    let count = state.names.replace(names).await;
    info!(count, "Name list loaded");
    state.emit(RelayEvent::NameListUpdated { count });
}
