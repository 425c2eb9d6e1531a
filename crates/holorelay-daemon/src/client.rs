//! Client side of the three channels, used by the CLI and the tests

use anyhow::{bail, Context, Result};
use holorelay_core::frame::encode_frame;
use holorelay_core::{Command, HeartbeatSnapshot};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Write one frame to an open transfer connection
pub async fn push_bytes(stream: &mut TcpStream, name: &str, payload: &[u8]) -> Result<()> {
    let frame = encode_frame(name, payload)?;
    stream.write_all(&frame).await?;
    Ok(())
}

/// Send files back to back over one transfer connection
pub async fn push_files<A, P>(addr: A, paths: &[P]) -> Result<usize>
where
    A: ToSocketAddrs,
    P: AsRef<Path>,
{
    let mut stream = TcpStream::connect(addr).await?;
    for path in paths {
        let path = path.as_ref();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            bail!("{} has no usable file name", path.display());
        };
        let payload = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        push_bytes(&mut stream, name, &payload).await?;
    }
    stream.shutdown().await?;
    Ok(paths.len())
}

/// Send raw control lines, each checked to decode first
pub async fn send_lines<A: ToSocketAddrs>(addr: A, lines: &[String]) -> Result<()> {
    for line in lines {
        Command::decode(line).with_context(|| format!("invalid command: {line}"))?;
    }

    let mut stream = TcpStream::connect(addr).await?;
    for line in lines {
        stream.write_all(line.trim_end().as_bytes()).await?;
        stream.write_all(b"\n").await?;
    }
    stream.shutdown().await?;
    Ok(())
}

pub async fn send_commands<A: ToSocketAddrs>(addr: A, commands: &[Command]) -> Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    for command in commands {
        stream.write_all(command.to_line()?.as_bytes()).await?;
    }
    stream.shutdown().await?;
    Ok(())
}

/// Reader for heartbeat lines
pub struct HeartbeatWatcher {
    lines: Lines<BufReader<TcpStream>>,
}

impl HeartbeatWatcher {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            lines: BufReader::new(stream).lines(),
        })
    }

    /// Next raw line, `None` once the server closes
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    pub async fn next_snapshot(&mut self) -> Result<Option<HeartbeatSnapshot>> {
        match self.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }
}
