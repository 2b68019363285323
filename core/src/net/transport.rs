//! Byte-stream transports carrying sync commands.
//!
//! A [`Transport`] is a blocking `Read + Write` stream with a non-blocking
//! readiness check. The poll loops only call into the blocking side after
//! [`Transport::poll_readable`] reported data, so a read never waits on more
//! than the bytes already in flight.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Which framing a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw command bytes over TCP
    #[default]
    Tcp,
    /// Command bytes in binary WebSocket frames
    #[serde(alias = "ws")]
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

pub trait Transport: Read + Write + Send {
    /// Non-blocking check for pending input.
    ///
    /// End of stream counts as readable so the next read surfaces it.
    /// Errors keep their io form so framing violations stay recognisable.
    fn poll_readable(&mut self) -> io::Result<bool>;

    /// Bound blocking reads. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    fn kind(&self) -> TransportKind;

    /// Tear the connection down. Safe to call more than once.
    fn close(&mut self);

    /// Send `bytes` as one unit.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.write_all(bytes)?;
        self.flush()?;
        Ok(())
    }

    /// Block until exactly `len` bytes have arrived.
    fn recv(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Peek a socket without blocking.
pub(crate) fn peek_readable(stream: &TcpStream) -> io::Result<bool> {
    stream.set_nonblocking(true)?;
    let mut probe = [0u8; 1];
    let result = stream.peek(&mut probe);
    stream.set_nonblocking(false)?;

    match result {
        // Ok(0) is end of stream
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// Resolve `host:port` and connect within `timeout` per address.
pub(crate) fn connect_stream(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {}:{}", host, port))
    }))
}

/// Raw TCP pass-through.
pub struct TcpTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Wrap a connected stream (blocking mode, Nagle disabled).
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        // Accepted sockets may inherit non-blocking mode from the listener
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let stream = connect_stream(host, port, timeout)?;
        Ok(Self::new(stream)?)
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn poll_readable(&mut self) -> io::Result<bool> {
        peek_readable(&self.stream)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport").field("peer", &self.peer).finish()
    }
}
