//! Raw HTTP head inspection and WebSocket upgrade acceptance.
//!
//! Both roles serve a tiny HTTP surface on a plain TCP listener: a page or
//! health line plus one WebSocket upgrade path. Incoming bytes are buffered
//! until the header terminator, inspected, and then replayed to the
//! WebSocket handshake through a [`PrefixedStream`].

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::WebSocketConfig,
    },
    WebSocketStream,
};
use tracing::{debug, warn};

use crate::io::PrefixedStream;

/// Initial buffer size for reading HTTP headers.
pub const INITIAL_BUFFER_SIZE: usize = 2048;

const HTTP_HEADER_END: &[u8] = b"\r\n\r\n";

/// Parsed request line and the headers relevant to an upgrade decision.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    /// Request path with any query string stripped.
    pub path: String,
    /// True when the head is a well-formed WebSocket upgrade request.
    pub websocket: bool,
}

/// Result of inspecting buffered bytes for a complete HTTP head.
pub enum HeadInspect {
    /// Need more data before the head terminator.
    NeedMore,
    /// Not HTTP traffic.
    NotHttp,
    /// Complete head.
    Head(RequestHead),
}

/// Inspect buffered bytes for a complete HTTP request head.
pub fn inspect_head(buf: &[u8]) -> HeadInspect {
    let header_end = match find_header_end(buf) {
        Some(idx) => idx,
        None => return HeadInspect::NeedMore,
    };
    let header_str = match std::str::from_utf8(&buf[..header_end]) {
        Ok(v) => v,
        Err(_) => return HeadInspect::NotHttp,
    };

    let mut lines = header_str.split("\r\n");
    let request_line = match lines.next() {
        Some(v) => v,
        None => return HeadInspect::NotHttp,
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return HeadInspect::NotHttp;
    }

    let mut upgrade = false;
    let mut connection_upgrade = false;
    let mut ws_key = false;

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value_trim = value.trim();
            let value_lower = value_trim.to_ascii_lowercase();
            match name.as_str() {
                "upgrade" => {
                    if value_lower.contains("websocket") {
                        upgrade = true;
                    }
                }
                "connection" => {
                    if value_lower.contains("upgrade") {
                        connection_upgrade = true;
                    }
                }
                "sec-websocket-key" => {
                    if !value_trim.is_empty() {
                        ws_key = true;
                    }
                }
                _ => {}
            }
        }
    }

    let path_only = path.split('?').next().unwrap_or("").to_string();

    HeadInspect::Head(RequestHead {
        method: method.to_string(),
        path: path_only,
        websocket: method == "GET" && upgrade && connection_upgrade && ws_key,
    })
}

/// Read an HTTP request head from a fresh connection.
///
/// Returns the parsed head plus the raw bytes consumed so far, so the
/// caller can replay them into the WebSocket handshake. `None` means the
/// connection is not usable HTTP: not HTTP at all, closed early, or a head
/// larger than `max_bytes`.
pub async fn read_request_head<S>(
    stream: &mut S,
    max_bytes: usize,
) -> std::io::Result<Option<(RequestHead, Bytes)>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::with_capacity(INITIAL_BUFFER_SIZE);
    let mut chunk = [0u8; INITIAL_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        match inspect_head(&buf) {
            HeadInspect::Head(head) => return Ok(Some((head, Bytes::from(buf)))),
            HeadInspect::NotHttp => return Ok(None),
            HeadInspect::NeedMore => {
                if buf.len() > max_bytes {
                    warn!(bytes = buf.len(), "request head too large");
                    return Ok(None);
                }
            }
        }
    }
}

/// Accept a WebSocket upgrade, replaying the inspected head bytes first.
pub async fn accept_ws<S>(
    stream: S,
    initial: Bytes,
    max_frame_bytes: usize,
) -> std::io::Result<WebSocketStream<PrefixedStream<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let max_frame = if max_frame_bytes == 0 {
        None
    } else {
        Some(max_frame_bytes)
    };
    let ws_cfg = WebSocketConfig {
        max_frame_size: max_frame,
        max_message_size: max_frame,
        ..WebSocketConfig::default()
    };
    let prefixed = PrefixedStream::new(initial, stream);
    accept_hdr_async_with_config(
        prefixed,
        |req: &Request, resp: Response| {
            debug!(path = %req.uri().path(), "websocket upgrade");
            Ok(resp)
        },
        Some(ws_cfg),
    )
    .await
    .map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("websocket handshake failed: {e}"),
        )
    })
}

/// Send an HTML response and finish the connection.
pub async fn send_html<S>(mut stream: S, body: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await
}

/// Send a plain-text response and finish the connection.
pub async fn send_text<S>(mut stream: S, body: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await
}

/// Send a 404 and finish the connection.
pub async fn send_not_found<S>(mut stream: S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;
    stream.flush().await
}

/// Send a 400 to reject the connection.
pub async fn send_reject<S>(mut stream: S, reason: &'static str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    warn!(reason, "request rejected");
    stream
        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;
    stream.flush().await
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HTTP_HEADER_END.len())
        .position(|w| w == HTTP_HEADER_END)
        .map(|idx| idx + HTTP_HEADER_END.len())
}
