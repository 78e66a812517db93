//! Framed TCP front-end for the snapshot server.
//!
//! The wire protocol is a single ASCII request line per connection:
//!
//! ```text
//! webInkV1 <api_key> <device> <mode> <x> <y> <w> <h> <format>\n
//! ```
//!
//! The server parses the line exactly once, authenticates, produces the
//! same bytes `/get_image` would return for the same parameters, writes
//! them, and closes. Any failure closes the connection with nothing
//! written; firmware treats a bare close as "no update available".

use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};

use crate::encoding::Rect;
use crate::error::{Result, WebInkError};
use crate::mode::{DisplayMode, TileFormat};
use crate::registry::DeviceRegistry;
use crate::snapshot::SnapshotCache;

/// Mandatory first token of every request line.
pub const PROTOCOL_TOKEN: &str = "webInkV1";

/// Longest request line accepted before the connection is dropped.
const MAX_REQUEST_LINE: usize = 256;

/// A parsed request line.
#[derive(Debug)]
struct TileRequest {
    api_key: String,
    device_id: String,
    mode: DisplayMode,
    rect: Rect,
    format: TileFormat,
}

/// One-shot tile server over TCP.
pub struct TileSocketServer {
    registry: Arc<DeviceRegistry>,
    cache: Arc<SnapshotCache>,
    permits: Arc<Semaphore>,
}

impl TileSocketServer {
    /// Creates a server capped at `max_conns` concurrent connections.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>, cache: Arc<SnapshotCache>, max_conns: usize) -> Self {
        Self {
            registry,
            cache,
            permits: Arc::new(Semaphore::new(max_conns.max(1))),
        }
    }

    /// Accept loop. Runs until `shutdown` flips, then stops accepting;
    /// connections already being handled run to completion.
    ///
    /// A connection permit is taken before `accept`, so when all handlers
    /// are busy the listener simply stalls and the kernel backlog absorbs
    /// the burst; no accepted connection is ever dropped unserved.
    pub async fn listen(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            "Tile socket server listening on {}",
            listener.local_addr()?
        );
        loop {
            let accepted = tokio::select! {
                _ = shutdown.changed() => {
                    info!("Tile socket server shutting down");
                    return Ok(());
                }
                accepted = async {
                    let permit = self
                        .permits
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| WebInkError::BadRequest("semaphore closed".to_string()))?;
                    let (stream, addr) = listener.accept().await?;
                    Ok::<_, WebInkError>((permit, stream, addr))
                } => accepted,
            };
            let (permit, stream, addr) = accepted?;
            debug!("Accepted tile connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    debug!("Connection from {addr} closed without reply: {e}");
                }
                drop(permit);
            });
        }
    }

    /// Serves one connection: read the request line, answer, close.
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;

        let line = read_request_line(&mut stream).await?;
        let request = parse_request_line(&line)?;
        let device = self.registry.authenticate(&request.device_id, &request.api_key)?;
        let tile = self
            .cache
            .tile(&device, &request.mode, request.rect, request.format)
            .await?;

        stream.write_all(&tile).await?;
        stream.shutdown().await?;
        debug!(
            "Served {} byte tile to device {}",
            tile.len(),
            request.device_id
        );
        Ok(())
    }
}

/// Reads up to the first newline, rejecting oversized or truncated lines.
async fn read_request_line(stream: &mut TcpStream) -> Result<String> {
    let mut buf = BytesMut::with_capacity(MAX_REQUEST_LINE);
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line = String::from_utf8(buf[..pos].to_vec())
                .map_err(|_| WebInkError::BadRequest("request line is not UTF-8".to_string()))?;
            return Ok(line);
        }
        if buf.len() >= MAX_REQUEST_LINE {
            return Err(WebInkError::BadRequest("request line too long".to_string()));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(WebInkError::BadRequest(
                "connection closed before request line".to_string(),
            ));
        }
    }
}

/// Parses `webInkV1 <api_key> <device> <mode> <x> <y> <w> <h> <format>`.
fn parse_request_line(line: &str) -> Result<TileRequest> {
    let bad = |what: &str| WebInkError::BadRequest(what.to_string());

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 9 {
        return Err(bad("expected 9 tokens"));
    }
    if tokens[0] != PROTOCOL_TOKEN {
        return Err(bad("unknown protocol version"));
    }

    let mode: DisplayMode = tokens[3].parse()?;
    let x: u32 = tokens[4].parse().map_err(|_| bad("bad x"))?;
    let y: u32 = tokens[5].parse().map_err(|_| bad("bad y"))?;
    let w: u32 = tokens[6].parse().map_err(|_| bad("bad w"))?;
    let h: u32 = tokens[7].parse().map_err(|_| bad("bad h"))?;
    let format: TileFormat = tokens[8].parse()?;

    Ok(TileRequest {
        api_key: tokens[1].to_string(),
        device_id: tokens[2].to_string(),
        mode,
        rect: Rect::new(x, y, w, h),
        format,
    })
}
