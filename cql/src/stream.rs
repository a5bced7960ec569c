//! The byte-oriented duplex transport (§2 component A): connect, read exactly
//! n bytes, write a full buffer, close, and report connectedness. Grounded on
//! the teacher's `Stream` wrapper around a `BufStream<TcpStream>`, trimmed down
//! to the plain TCP case — this protocol has no TLS negotiation step.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::error::{CqlError, Result};

#[derive(Debug)]
pub struct ByteStream {
  inner: BufStream<TcpStream>,
  peer: SocketAddr,
  connected: bool,
}

impl ByteStream {
  pub async fn connect(addrs: impl Into<Vec<SocketAddr>>) -> Result<Self> {
    let addrs = addrs.into();
    let stream = TcpStream::connect(addrs.as_slice()).await?;
    let peer = stream.peer_addr()?;
    Ok(Self { inner: BufStream::new(stream), peer, connected: true })
  }

  pub fn peer_addr(&self) -> SocketAddr {
    self.peer
  }

  pub fn is_connected(&self) -> bool {
    self.connected
  }

  /// Reads exactly `len` bytes, or fails with `WireFormat` on early EOF.
  pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
    let mut buf = BytesMut::zeroed(len);
    match self.inner.read_exact(&mut buf).await {
      Ok(_) => Ok(buf.freeze()),
      Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
        self.connected = false;
        Err(CqlError::wire("connection closed mid-frame"))
      }
      Err(e) => {
        self.connected = false;
        Err(CqlError::Io(e))
      }
    }
  }

  pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
    self.inner.write_all(buf).await?;
    self.inner.flush().await?;
    Ok(())
  }

  pub async fn close(&mut self) -> Result<()> {
    if self.connected {
      self.connected = false;
      self.inner.shutdown().await?;
    }
    Ok(())
  }
}
