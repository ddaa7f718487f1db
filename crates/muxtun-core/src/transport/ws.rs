//! WebSocket byte-stream adapter.
//!
//! `WsByteStream` wraps a `WebSocketStream` and exposes it as
//! `AsyncRead + AsyncWrite` so a stream-multiplexing session can run over a
//! message-oriented channel. Reads treat the sequence of binary/text
//! messages as one continuous byte stream; a message boundary is never an
//! end-of-stream signal — only channel closure is. Every write becomes
//! exactly one binary message, because the channel requires whole-message
//! atomicity per write.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};

/// Unread remainder of the most recently received message.
///
/// Explicit state machine: `Empty` means the next read fetches a new
/// message; `Partial` holds bytes that must be handed out before the
/// channel is touched again.
enum ReadCursor {
    Empty,
    Partial(Bytes),
}

/// Adapter presenting one WebSocket as an ordered byte stream.
///
/// Owned exclusively by one multiplexing session at a time. Ping frames are
/// answered inline, pong and raw frames are skipped, and a close frame (or
/// the end of the underlying stream) reads as EOF. The adapter adds no
/// retry logic: channel errors propagate unchanged, and reconnection is the
/// session manager's concern.
pub struct WsByteStream<S> {
    ws: WebSocketStream<S>,
    cursor: ReadCursor,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl<S> WsByteStream<S> {
    /// Create a new adapter over an established WebSocket.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            cursor: ReadCursor::Empty,
            local: None,
            peer: None,
        }
    }

    /// Create a new adapter recording the channel's socket addresses.
    pub fn with_addrs(ws: WebSocketStream<S>, local: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            ws,
            cursor: ReadCursor::Empty,
            local: Some(local),
            peer: Some(peer),
        }
    }

    /// The local address of the underlying channel, if recorded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// The peer address of the underlying channel, if recorded.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Consumes the adapter and returns the underlying WebSocket stream.
    pub fn into_inner(self) -> WebSocketStream<S> {
        self.ws
    }

    /// Copy from `data` into `buf`, parking any remainder in the cursor.
    fn fill(cursor: &mut ReadCursor, data: Bytes, buf: &mut ReadBuf<'_>) {
        let to_copy = data.len().min(buf.remaining());
        buf.put_slice(&data[..to_copy]);
        let rest = data.slice(to_copy..);
        *cursor = if rest.is_empty() {
            ReadCursor::Empty
        } else {
            ReadCursor::Partial(rest)
        };
    }
}

impl<S> AsyncRead for WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        // Drain the cursor before touching the channel again.
        if let ReadCursor::Partial(data) = std::mem::replace(&mut this.cursor, ReadCursor::Empty) {
            Self::fill(&mut this.cursor, data, buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            match Pin::new(&mut this.ws).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match msg {
                    Message::Binary(data) => {
                        if data.is_empty() {
                            // An empty message is not end-of-stream.
                            continue;
                        }
                        Self::fill(&mut this.cursor, Bytes::from(data), buf);
                        return Poll::Ready(Ok(()));
                    }
                    Message::Text(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        Self::fill(&mut this.cursor, Bytes::from(text.into_bytes()), buf);
                        return Poll::Ready(Ok(()));
                    }
                    Message::Ping(payload) => {
                        let mut ws = Pin::new(&mut this.ws);
                        match ws.as_mut().poll_ready(cx) {
                            Poll::Ready(Ok(())) => {
                                if let Err(err) = ws.start_send(Message::Pong(payload)) {
                                    return Poll::Ready(Err(ws_err(err)));
                                }
                                continue;
                            }
                            Poll::Ready(Err(err)) => return Poll::Ready(Err(ws_err(err))),
                            Poll::Pending => return Poll::Pending,
                        }
                    }
                    Message::Pong(_) => continue,
                    Message::Close(_) => return Poll::Ready(Ok(())),
                    Message::Frame(_) => continue,
                },
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(ws_err(err))),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        let mut ws = Pin::new(&mut this.ws);
        match ws.as_mut().poll_ready(cx) {
            Poll::Ready(Ok(())) => {
                if let Err(err) = ws.start_send(Message::Binary(data.to_vec())) {
                    return Poll::Ready(Err(ws_err(err)));
                }
                Poll::Ready(Ok(data.len()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(ws_err(err))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.ws).poll_flush(cx).map_err(ws_err)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.ws).poll_close(cx) {
            // Closing an already-closed channel is fine.
            Poll::Ready(Err(WsError::ConnectionClosed)) | Poll::Ready(Err(WsError::AlreadyClosed)) => {
                Poll::Ready(Ok(()))
            }
            other => other.map_err(ws_err),
        }
    }
}

fn ws_err(err: WsError) -> std::io::Error {
    std::io::Error::other(err)
}
