//! Bidirectional data relay with full-close semantics.
//!
//! Both directions are driven as independent poll-based state machines
//! within a single future, so back-pressure on one direction never stalls
//! the other. Unlike a half-close relay, the pair is torn down as a whole:
//! the first direction to reach end-of-input (or to fail) ends the relay,
//! after which the opposite direction is drained of whatever data is
//! immediately available and both writers are shut down. Proxied sessions
//! are all-or-nothing; no half-duplex shutdown is attempted.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Trait for recording relay byte counters.
///
/// The Acceptor aggregates per-session totals through this; callers that
/// only need the returned per-relay totals use [`NoOpMetrics`].
pub trait RelayMetrics {
    /// Record bytes copied local-to-remote (first argument of the relay).
    fn record_forward(&self, bytes: u64);
    /// Record bytes copied remote-to-local (second argument of the relay).
    fn record_backward(&self, bytes: u64);
}

/// No-op metrics implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl RelayMetrics for NoOpMetrics {
    #[inline]
    fn record_forward(&self, _bytes: u64) {}
    #[inline]
    fn record_backward(&self, _bytes: u64) {}
}

/// State machine for one-directional copy with flush.
enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),       // bytes flushing
    Done,
}

/// Result of polling one copy direction.
enum CopyPoll {
    /// Data was flushed — contains byte count for metrics.
    Flushed(usize),
    /// Direction observed end-of-input.
    Finished,
}

/// Poll-driven one-directional copy: read → write → flush.
fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *state = CopyState::Done;
                            return Poll::Ready(Ok(CopyPoll::Finished));
                        }
                        *state = CopyState::Writing(0, n);
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            let total = *len;
                            *state = CopyState::Flushing(total);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Copy whatever the direction can produce without waiting, then stop.
///
/// Used after the relay has decided to close: data already buffered in the
/// opposite direction still reaches its destination, but nothing blocks.
async fn drain_direction<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
    mut record: F,
) where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    std::future::poll_fn(|cx| loop {
        match poll_copy_direction(cx, reader, writer, buf, state) {
            Poll::Ready(Ok(CopyPoll::Flushed(n))) => record(n as u64),
            Poll::Ready(Ok(CopyPoll::Finished)) | Poll::Ready(Err(_)) | Poll::Pending => {
                return Poll::Ready(())
            }
        }
    })
    .await;
}

/// Bidirectional relay between a logical stream and a real connection.
///
/// Runs until either direction reaches end-of-input or fails, drains the
/// surviving direction of immediately available data, shuts down both
/// writers and returns the byte totals `(forward, backward)`.
///
/// # Arguments
///
/// * `local` - The local side (e.g. an accepted proxy client connection)
/// * `remote` - The remote side (e.g. the tunnel stream or dialed target)
/// * `buffer_size` - Size of the per-direction copy buffers
/// * `metrics` - Byte counter recorder
pub async fn relay_bidirectional<A, B, M>(
    local: A,
    remote: B,
    buffer_size: usize,
    metrics: &M,
) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    M: RelayMetrics,
{
    let (mut local_r, mut local_w) = tokio::io::split(local);
    let (mut remote_r, mut remote_w) = tokio::io::split(remote);

    let mut buf_fwd = vec![0u8; buffer_size];
    let mut buf_bwd = vec![0u8; buffer_size];
    let mut state_fwd = CopyState::Reading;
    let mut state_bwd = CopyState::Reading;

    let mut forward = 0u64;
    let mut backward = 0u64;
    let mut fwd_done = false;
    let mut bwd_done = false;
    let mut first_error: Option<io::Error> = None;

    // Poll both directions with a shared context so either can progress
    // independently; stop as soon as one direction finishes or fails.
    std::future::poll_fn(|cx| {
        loop {
            let mut any_ready = false;

            match poll_copy_direction(cx, &mut local_r, &mut remote_w, &mut buf_fwd, &mut state_fwd)
            {
                Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                    metrics.record_forward(n as u64);
                    forward += n as u64;
                    any_ready = true;
                }
                Poll::Ready(Ok(CopyPoll::Finished)) => {
                    fwd_done = true;
                    return Poll::Ready(());
                }
                Poll::Ready(Err(e)) => {
                    first_error = Some(e);
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            match poll_copy_direction(cx, &mut remote_r, &mut local_w, &mut buf_bwd, &mut state_bwd)
            {
                Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                    metrics.record_backward(n as u64);
                    backward += n as u64;
                    any_ready = true;
                }
                Poll::Ready(Ok(CopyPoll::Finished)) => {
                    bwd_done = true;
                    return Poll::Ready(());
                }
                Poll::Ready(Err(e)) => {
                    first_error = Some(e);
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            if !any_ready {
                return Poll::Pending;
            }
        }
    })
    .await;

    // One direction ended; let the other deliver what it already has.
    if fwd_done && !bwd_done {
        drain_direction(&mut remote_r, &mut local_w, &mut buf_bwd, &mut state_bwd, |n| {
            metrics.record_backward(n);
            backward += n;
        })
        .await;
    } else if bwd_done && !fwd_done {
        drain_direction(&mut local_r, &mut remote_w, &mut buf_fwd, &mut state_fwd, |n| {
            metrics.record_forward(n);
            forward += n;
        })
        .await;
    }

    let _ = local_w.shutdown().await;
    let _ = remote_w.shutdown().await;

    match first_error {
        Some(e) => Err(e),
        None => Ok((forward, backward)),
    }
}
