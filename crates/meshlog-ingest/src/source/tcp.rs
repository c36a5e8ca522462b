//! Live device session over TCP.
//!
//! The device emits one JSON object per line. The first frame of a
//! session is usually a banner (`{"myInfo":{"myNodeNum":N}}`) announcing
//! the local node identity; everything after is packet frames. Frames
//! that fail to parse are logged and skipped — a corrupt line must not
//! tear down the session.
//!
//! Connection loss surfaces as a transport error from [`TcpSource::
//! next_event`]; the supervisor owns reconnection.

use crate::{Error, Result};
use meshlog_core::RawPacket;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// One notification from the device session.
#[derive(Debug)]
pub enum SourceEvent {
    /// The session announced the local node identity.
    Connected {
        /// Numeric id of the node this daemon is attached to.
        local_node: i64,
    },
    /// One raw packet frame.
    Packet(RawPacket),
}

/// Session banner frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBanner {
    my_info: MyInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyInfo {
    my_node_num: i64,
}

enum Frame {
    Banner(i64),
    Packet(RawPacket),
}

fn parse_frame(line: &str) -> Result<Frame> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if !value.is_object() {
        return Err(meshlog_core::Error::InvalidFrame {
            reason: "frame is not a JSON object".to_string(),
        }
        .into());
    }
    if value.get("myInfo").is_some() {
        let banner: SessionBanner = serde_json::from_value(value)?;
        return Ok(Frame::Banner(banner.my_info.my_node_num));
    }
    Ok(Frame::Packet(serde_json::from_value(value)?))
}

/// Live event source attached to the mesh device.
#[derive(Debug)]
pub struct TcpSource {
    lines: Lines<BufReader<TcpStream>>,
    peer: String,
    local_node: Option<i64>,
}

impl TcpSource {
    /// Establish a session with the device at `addr` (`host:port`).
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        info!("Connecting to device at {}...", addr);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Transport(format!("connection to {addr} timed out")))??;
        info!("Connected to device at {}", addr);

        Ok(Self {
            lines: BufReader::new(stream).lines(),
            peer: addr.to_string(),
            local_node: None,
        })
    }

    /// The local node identity, once the session banner has arrived.
    pub fn local_node(&self) -> Option<i64> {
        self.local_node
    }

    /// Wait for the next session event. Skips blank and unparseable
    /// frames; returns a transport error when the device closes the
    /// connection or the read fails.
    pub async fn next_event(&mut self) -> Result<SourceEvent> {
        loop {
            let line = self
                .lines
                .next_line()
                .await?
                .ok_or_else(|| {
                    Error::Transport(format!("device {} closed the connection", self.peer))
                })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_frame(line) {
                Ok(Frame::Banner(local_node)) => {
                    self.local_node = Some(local_node);
                    return Ok(SourceEvent::Connected { local_node });
                }
                Ok(Frame::Packet(packet)) => return Ok(SourceEvent::Packet(packet)),
                Err(e) => {
                    warn!("Skipping unparseable frame from {}: {}", self.peer, e);
                }
            }
        }
    }
}
