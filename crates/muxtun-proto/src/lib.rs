//! Tunnel control protocol: encode and decode.
//!
//! Exactly one exchange happens at the start of every logical stream,
//! before the relay begins:
//!
//! ```text
//! Initiator -> Acceptor   [addr_len: u8][addr: addr_len bytes, UTF-8]
//! Acceptor  -> Initiator  [status: u8]     0x00 = ok, else = failure
//! ```
//!
//! The one-byte length field is a hard boundary: there is no escape for
//! addresses longer than 255 bytes, so construction rejects them before the
//! length byte could overflow. A zero-length address is syntactically valid;
//! the dial on the Acceptor fails naturally and produces a failure status.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encodable target address length in bytes.
pub const MAX_TARGET_LEN: usize = 255;

/// Connect succeeded; the stream is now a raw relay pipe.
pub const STATUS_OK: u8 = 0x00;
/// Connect failed; the Initiator must close the stream.
pub const STATUS_CONNECT_FAILED: u8 = 0x01;

/// Errors from encoding or decoding the control exchange.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("target address is {0} bytes, limit is {MAX_TARGET_LEN}")]
    AddressTooLong(usize),

    #[error("malformed tunnel request: {0}")]
    Malformed(&'static str),

    #[error("target address is not valid UTF-8")]
    InvalidUtf8,
}

/// The per-stream connect request carrying the target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    target: String,
}

impl TunnelRequest {
    /// Build a request, rejecting addresses the length byte cannot encode.
    pub fn new(target: impl Into<String>) -> Result<Self, ProtoError> {
        let target = target.into();
        if target.len() > MAX_TARGET_LEN {
            return Err(ProtoError::AddressTooLong(target.len()));
        }
        Ok(Self { target })
    }

    /// The target address (`host:port`).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Encode to the wire form: length byte followed by the address bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.target.len());
        buf.push(self.target.len() as u8);
        buf.extend_from_slice(self.target.as_bytes());
        buf
    }
}

/// Write a tunnel request to the stream.
pub async fn write_request<W>(writer: &mut W, request: &TunnelRequest) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&request.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a tunnel request from the stream.
///
/// A stream that closes mid-request is a malformed request, not an I/O
/// error: the peer violated the control framing.
pub async fn read_request<R>(reader: &mut R) -> Result<TunnelRequest, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u8().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ProtoError::Malformed("stream closed before length byte"))
        }
        Err(e) => return Err(e.into()),
    };

    let mut addr = vec![0u8; len];
    if let Err(e) = reader.read_exact(&mut addr).await {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Err(ProtoError::Malformed("stream closed mid-address"));
        }
        return Err(e.into());
    }

    let target = String::from_utf8(addr).map_err(|_| ProtoError::InvalidUtf8)?;
    // len <= 255 by construction of the wire format.
    Ok(TunnelRequest { target })
}

/// Write the one-byte connect status.
pub async fn write_status<W>(writer: &mut W, status: u8) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[status]).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the one-byte connect status.
pub async fn read_status<R>(reader: &mut R) -> Result<u8, ProtoError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_u8().await {
        Ok(status) => Ok(status),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ProtoError::Malformed("stream closed before status byte"))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn request_round_trip() {
        let (mut client, mut server) = duplex(1024);

        let request = TunnelRequest::new("example.com:443").unwrap();
        let sent = request.clone();
        let write = tokio::spawn(async move {
            write_request(&mut client, &sent).await.unwrap();
        });

        let got = read_request(&mut server).await.unwrap();
        assert_eq!(got, request);
        assert_eq!(got.target(), "example.com:443");
        write.await.unwrap();
    }

    #[tokio::test]
    async fn empty_address_is_valid() {
        let (mut client, mut server) = duplex(64);

        let request = TunnelRequest::new("").unwrap();
        write_request(&mut client, &request).await.unwrap();

        let got = read_request(&mut server).await.unwrap();
        assert_eq!(got.target(), "");
    }

    #[test]
    fn rejects_addresses_over_the_length_byte() {
        let long = "a".repeat(MAX_TARGET_LEN + 1);
        match TunnelRequest::new(long) {
            Err(ProtoError::AddressTooLong(n)) => assert_eq!(n, MAX_TARGET_LEN + 1),
            other => panic!("expected AddressTooLong, got {other:?}"),
        }

        // The boundary itself is fine.
        let max = "a".repeat(MAX_TARGET_LEN);
        let request = TunnelRequest::new(max).unwrap();
        assert_eq!(request.encode().len(), 1 + MAX_TARGET_LEN);
        assert_eq!(request.encode()[0], MAX_TARGET_LEN as u8);
    }

    #[tokio::test]
    async fn short_read_is_malformed() {
        let (mut client, mut server) = duplex(64);

        // Length byte promises 10 bytes but only 3 arrive before close.
        client.write_all(&[10, b'a', b'b', b'c']).await.unwrap();
        drop(client);

        match read_request(&mut server).await {
            Err(ProtoError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_before_length_is_malformed() {
        let (client, mut server) = duplex(64);
        drop(client);

        assert!(matches!(
            read_request(&mut server).await,
            Err(ProtoError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_rejected() {
        let (mut client, mut server) = duplex(64);

        client.write_all(&[2, 0xff, 0xfe]).await.unwrap();

        assert!(matches!(
            read_request(&mut server).await,
            Err(ProtoError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn status_round_trip() {
        let (mut client, mut server) = duplex(8);

        write_status(&mut client, STATUS_OK).await.unwrap();
        assert_eq!(read_status(&mut server).await.unwrap(), STATUS_OK);

        write_status(&mut client, STATUS_CONNECT_FAILED).await.unwrap();
        assert_eq!(
            read_status(&mut server).await.unwrap(),
            STATUS_CONNECT_FAILED
        );
    }

    #[tokio::test]
    async fn eof_before_status_is_malformed() {
        let (client, mut server) = duplex(8);
        drop(client);

        assert!(matches!(
            read_status(&mut server).await,
            Err(ProtoError::Malformed(_))
        ));
    }
}
