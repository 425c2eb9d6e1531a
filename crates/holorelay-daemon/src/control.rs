//! Control channel: one JSON command per line

use anyhow::{bail, Result};
use holorelay_core::{Command, EngineRequest, RelayEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::shutdown::Shutdown;
use crate::state::AppState;

/// Read commands until EOF, a blank line or a malformed command
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let max_line = state.config.control.max_line_bytes;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(max_line as u64 + 1);
        let n = tokio::select! {
            n = limited.read_until(b'\n', &mut buf) => n?,
            _ = shutdown.recv() => {
                debug!(peer = %peer, "Control connection closing for shutdown");
                return Ok(());
            }
        };
        if n == 0 {
            debug!(peer = %peer, "Control connection closed by peer");
            return Ok(());
        }
        if !buf.ends_with(b"\n") && buf.len() > max_line {
            bail!("command line exceeds {max_line} bytes");
        }

        let line = trim_line_ending(&buf);
        if line.is_empty() {
            debug!(peer = %peer, "Blank line, closing control connection");
            return Ok(());
        }

        let command = match std::str::from_utf8(line)
            .map_err(|e| e.to_string())
            .and_then(|text| Command::decode(text).map_err(|e| e.to_string()))
        {
            Ok(command) => command,
            Err(error) => {
                state.emit(RelayEvent::MalformedCommand {
                    error: error.clone(),
                });
                bail!("malformed command: {error}");
            }
        };

        debug!(peer = %peer, kind = command.kind(), "Received command");
        dispatch_command(command, &state).await;
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Route one decoded command
///
/// Appearance updates for models that are not live are dropped here, before
/// they reach the engine queue.
pub async fn dispatch_command(command: Command, state: &AppState) {
    let request = match command {
        Command::UpdateOpacity {
            model,
            child,
            opacity,
        } => {
            let Some(model) = live_model(&model, state).await else {
                return;
            };
            EngineRequest::SetOpacity {
                model,
                child,
                opacity,
            }
        }
        Command::UpdateColor {
            model,
            child,
            r,
            g,
            b,
        } => {
            let Some(model) = live_model(&model, state).await else {
                return;
            };
            EngineRequest::SetColor {
                model,
                child,
                rgb: [r, g, b],
            }
        }
        Command::AddPoint => EngineRequest::AddPoint,
        Command::RemovePoint => EngineRequest::RemovePoint,
        Command::Unknown { kind } => {
            warn!(kind = %kind, "Ignoring unknown command type");
            state.emit(RelayEvent::UnknownCommand { kind });
            return;
        }
    };

    if let Err(e) = state.dispatcher.send(request) {
        warn!(error = %e, "Failed to queue engine request");
    }
}

async fn live_model(model: &str, state: &AppState) -> Option<String> {
    let model = model.to_lowercase();
    if state.registry.get(&model).await.is_some() {
        return Some(model);
    }
    warn!(model = %model, "Command targets a model that is not loaded");
    state.emit(RelayEvent::UnknownModel { model });
    None
}
