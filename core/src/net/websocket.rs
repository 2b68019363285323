//! Minimal WebSocket transport (RFC 6455).
//!
//! Only what the sync protocol needs: every [`Write::write`] becomes one
//! binary frame with FIN set, inbound data frames are concatenated into a
//! byte stream, pings are answered, close ends the stream. Payloads of 64 KiB
//! or more (the 64-bit length form) are rejected.
//!
//! # Frame Header
//!
//! ```text
//! [FIN|RSV|opcode:4][MASK|len:7]([len:u16] if len == 126)([mask:4] if MASK)
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use thiserror::Error;

use super::transport::{Transport, TransportKind, connect_stream, peek_readable};
use crate::error::{HandshakeError, TransportError};

/// GUID appended to the client key before hashing
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest payload sent or accepted in a single frame
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

/// Largest control frame payload allowed by RFC 6455
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Upper bound for an HTTP upgrade request/response head
const MAX_UPGRADE_HEAD: usize = 8192;

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds 65535")]
    PayloadTooLarge(u64),
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(u64),
    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),
}

fn frame_error(e: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Which end of the upgrade this side was.
///
/// Clients mask every outbound frame, servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Fresh mask for the next outbound frame.
    fn outbound_mask(self) -> Option<[u8; 4]> {
        match self {
            Role::Client => Some(rand::random()),
            Role::Server => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: u8,
    pub length: u64,
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    pub fn is_control(&self) -> bool {
        self.opcode & 0x8 != 0
    }
}

/// `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn read_frame_header<R: Read>(reader: &mut R) -> io::Result<FrameHeader> {
    let b0 = reader.read_u8()?;
    let b1 = reader.read_u8()?;

    let fin = b0 & 0x80 != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & 0x80 != 0;
    let length = match b1 & 0x7F {
        126 => u64::from(reader.read_u16::<BigEndian>()?),
        127 => reader.read_u64::<BigEndian>()?,
        short => u64::from(short),
    };

    let mask = if masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask)?;
        Some(mask)
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        opcode,
        length,
        mask,
    })
}

/// XOR `data` in place with the repeating 4-byte `mask`.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Write one FIN frame. `mask` is applied to a copy of `payload`.
pub fn write_frame<W: Write>(
    writer: &mut W,
    opcode: u8,
    payload: &[u8],
    mask: Option<[u8; 4]>,
) -> io::Result<()> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(frame_error(FrameError::PayloadTooLarge(payload.len() as u64)));
    }

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.push(0x80 | (opcode & 0x0F));

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload.len() < 126 {
        frame.push(mask_bit | payload.len() as u8);
    } else {
        frame.push(mask_bit | 126);
        frame.write_u16::<BigEndian>(payload.len() as u16)?;
    }

    match mask {
        Some(mask) => {
            frame.extend_from_slice(&mask);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], mask);
        }
        None => frame.extend_from_slice(payload),
    }

    writer.write_all(&frame)
}

/// Command bytes carried in WebSocket frames.
pub struct WebSocketTransport {
    stream: TcpStream,
    role: Role,
    peer: Option<SocketAddr>,
    /// Payload of the last data frame
    pending: Vec<u8>,
    /// Read position in `pending`
    pos: usize,
    /// Close frame seen
    closed: bool,
}

impl WebSocketTransport {
    /// Wrap a stream that has already completed the HTTP upgrade.
    pub fn from_upgraded(stream: TcpStream, role: Role) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            role,
            peer,
            pending: Vec::new(),
            pos: 0,
            closed: false,
        })
    }

    /// Server side of the upgrade: read the request, answer `101`.
    pub fn accept(mut stream: TcpStream, timeout: Duration) -> Result<Self, HandshakeError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(timeout))?;

        let head = read_http_head(&mut stream)?;
        let Some(key) = header_value(&head, "sec-websocket-key") else {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
            return Err(HandshakeError::Upgrade(
                "missing Sec-WebSocket-Key header".to_string(),
            ));
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            accept_key(key)
        );
        stream.write_all(response.as_bytes())?;
        stream.set_read_timeout(None)?;

        tracing::debug!(peer = ?stream.peer_addr().ok(), "WebSocket upgrade accepted");
        Ok(Self::from_upgraded(stream, Role::Server)?)
    }

    /// Client side of the upgrade.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, HandshakeError> {
        let mut stream = connect_stream(host, port, timeout)?;
        stream.set_read_timeout(Some(timeout))?;

        let key = STANDARD.encode(rand::random::<[u8; 16]>());
        let request = format!(
            "GET / HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            host, port, key
        );
        stream.write_all(request.as_bytes())?;

        let head = read_http_head(&mut stream)?;
        let status = head.lines().next().unwrap_or_default();
        if status.split_whitespace().nth(1) != Some("101") {
            return Err(HandshakeError::Upgrade(format!("unexpected status '{}'", status)));
        }
        match header_value(&head, "sec-websocket-accept") {
            Some(accept) if accept == accept_key(&key) => {}
            _ => {
                return Err(HandshakeError::Upgrade(
                    "missing or wrong Sec-WebSocket-Accept".to_string(),
                ));
            }
        }
        stream.set_read_timeout(None)?;

        Ok(Self::from_upgraded(stream, Role::Client)?)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Read one frame, answering control frames.
    ///
    /// Data frame payloads replace `pending`.
    fn read_frame(&mut self) -> io::Result<()> {
        let header = read_frame_header(&mut self.stream)?;
        if header.length > MAX_FRAME_PAYLOAD as u64 {
            return Err(frame_error(FrameError::PayloadTooLarge(header.length)));
        }
        if header.is_control() && header.length > MAX_CONTROL_PAYLOAD {
            return Err(frame_error(FrameError::ControlTooLarge(header.length)));
        }

        let mut payload = vec![0u8; header.length as usize];
        self.stream.read_exact(&mut payload)?;
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        match header.opcode {
            OP_CONTINUATION | OP_TEXT | OP_BINARY => {
                self.pending = payload;
                self.pos = 0;
            }
            OP_PING => {
                tracing::trace!(len = payload.len(), "WebSocket ping");
                write_frame(&mut self.stream, OP_PONG, &payload, self.role.outbound_mask())?;
            }
            OP_PONG => {}
            OP_CLOSE => {
                tracing::debug!(peer = ?self.peer, "WebSocket close received");
                let _ = write_frame(&mut self.stream, OP_CLOSE, &[], self.role.outbound_mask());
                self.closed = true;
            }
            other => return Err(frame_error(FrameError::UnsupportedOpcode(other))),
        }
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.pos < self.pending.len()
    }
}

impl Read for WebSocketTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while !self.has_pending() {
            if self.closed {
                return Ok(0);
            }
            self.read_frame()?;
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for WebSocketTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let len = buf.len().min(MAX_FRAME_PAYLOAD);
        write_frame(&mut self.stream, OP_BINARY, &buf[..len], self.role.outbound_mask())?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for WebSocketTransport {
    fn poll_readable(&mut self) -> io::Result<bool> {
        loop {
            if self.has_pending() || self.closed {
                return Ok(true);
            }
            if !peek_readable(&self.stream)? {
                return Ok(false);
            }
            // A whole frame is in flight; it may only be a ping
            self.read_frame()?;
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        write_frame(&mut self.stream, OP_BINARY, bytes, self.role.outbound_mask())?;
        self.stream.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = write_frame(&mut self.stream, OP_CLOSE, &[], self.role.outbound_mask());
            self.closed = true;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Read an HTTP head up to and including the blank line.
///
/// Reads byte by byte so no frame data after the head is consumed.
fn read_http_head(stream: &mut TcpStream) -> Result<String, HandshakeError> {
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_UPGRADE_HEAD {
            return Err(HandshakeError::Upgrade("HTTP head too large".to_string()));
        }
        stream.read_exact(&mut byte)?;
        head.push(byte[0]);
    }
    String::from_utf8(head).map_err(|_| HandshakeError::Upgrade("HTTP head is not UTF-8".to_string()))
}

/// Case-insensitive header lookup.
fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    /// Upgraded server transport plus the raw client socket.
    fn server_pair() -> (WebSocketTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (WebSocketTransport::from_upgraded(server, Role::Server).unwrap(), client)
    }

    fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_frame(&mut bytes, opcode, payload, Some([0x12, 0x34, 0x56, 0x78])).unwrap();
        bytes
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_header_encoding_lengths() {
        let mut short = Vec::new();
        write_frame(&mut short, OP_BINARY, &[1, 2, 3], None).unwrap();
        assert_eq!(short, vec![0x82, 3, 1, 2, 3]);

        let payload = vec![0xAB; 300];
        let mut medium = Vec::new();
        write_frame(&mut medium, OP_BINARY, &payload, None).unwrap();
        assert_eq!(&medium[..4], &[0x82, 126, 0x01, 0x2C]);
        assert_eq!(medium.len(), 304);

        let header = read_frame_header(&mut Cursor::new(&medium)).unwrap();
        assert_eq!(header.length, 300);
        assert!(header.fin);
        assert_eq!(header.mask, None);
    }

    #[test]
    fn test_write_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        let err = write_frame(&mut Vec::new(), OP_BINARY, &payload, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_masked_header_roundtrip() {
        let bytes = masked_frame(OP_TEXT, b"hi");
        let mut cursor = Cursor::new(&bytes);
        let header = read_frame_header(&mut cursor).unwrap();
        assert_eq!(header.opcode, OP_TEXT);
        assert_eq!(header.mask, Some([0x12, 0x34, 0x56, 0x78]));

        let mut payload = bytes[cursor.position() as usize..].to_vec();
        apply_mask(&mut payload, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn test_server_unmasks_client_frames() {
        let (mut server, mut client) = server_pair();
        client.write_all(&masked_frame(OP_BINARY, &[3, 0, 0, 0, 7])).unwrap();
        client.write_all(&masked_frame(OP_BINARY, &[5])).unwrap();

        assert_eq!(server.recv(5).unwrap(), vec![3, 0, 0, 0, 7]);
        assert_eq!(server.recv(1).unwrap(), vec![5]);
    }

    #[test]
    fn test_server_frames_are_unmasked_binary() {
        let (mut server, mut client) = server_pair();
        server.send(&[4, 1]).unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x82, 2, 4, 1]);
    }

    #[test]
    fn test_ping_is_answered_with_pong() {
        let (mut server, mut client) = server_pair();
        client.write_all(&masked_frame(OP_PING, b"abc")).unwrap();
        thread::sleep(Duration::from_millis(10));

        // The ping is consumed without producing data
        assert!(!server.poll_readable().unwrap());

        let mut pong = [0u8; 5];
        client.read_exact(&mut pong).unwrap();
        assert_eq!(pong, [0x8A, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_client_role_masks_pong_and_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut editor, _) = listener.accept().unwrap();
        let mut player = WebSocketTransport::from_upgraded(stream, Role::Client).unwrap();

        let mut ping = Vec::new();
        write_frame(&mut ping, OP_PING, b"xy", None).unwrap();
        editor.write_all(&ping).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert!(!player.poll_readable().unwrap());
        player.send(&[4, 0]).unwrap();

        for (opcode, payload) in [(OP_PONG, &b"xy"[..]), (OP_BINARY, &[4, 0][..])] {
            let header = read_frame_header(&mut editor).unwrap();
            assert_eq!(header.opcode, opcode);
            let mask = header.mask.expect("client frames are masked");
            let mut body = vec![0u8; header.length as usize];
            editor.read_exact(&mut body).unwrap();
            apply_mask(&mut body, mask);
            assert_eq!(body, payload);
        }
    }

    #[test]
    fn test_close_ends_stream() {
        let (mut server, mut client) = server_pair();
        client.write_all(&masked_frame(OP_CLOSE, &[])).unwrap();
        thread::sleep(Duration::from_millis(10));

        assert!(server.poll_readable().unwrap());
        assert!(matches!(server.recv(1), Err(TransportError::Closed)));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x88, 0]);
    }

    #[test]
    fn test_64bit_length_rejected() {
        let (mut server, mut client) = server_pair();
        let mut frame = vec![0x82, 0x80 | 127];
        frame.extend_from_slice(&70_000u64.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);
        client.write_all(&frame).unwrap();

        let err = server.read(&mut [0u8; 1]).unwrap_err();
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<FrameError>());
        assert_eq!(inner, Some(&FrameError::PayloadTooLarge(70_000)));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let (mut server, mut client) = server_pair();
        client.write_all(&masked_frame(0x3, &[1])).unwrap();

        let err = server.read(&mut [0u8; 1]).unwrap_err();
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<FrameError>());
        assert_eq!(inner, Some(&FrameError::UnsupportedOpcode(0x3)));
    }

    #[test]
    fn test_upgrade_both_roles() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = thread::spawn(move || {
            let mut client =
                WebSocketTransport::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
            client.send(b"hello").unwrap();
            let reply = client.recv(2).unwrap();
            (client.role(), reply)
        });

        let (stream, _) = listener.accept().unwrap();
        let mut server = WebSocketTransport::accept(stream, Duration::from_secs(2)).unwrap();
        assert_eq!(server.recv(5).unwrap(), b"hello");
        server.send(b"ok").unwrap();

        let (role, reply) = client.join().unwrap();
        assert_eq!(role, Role::Client);
        assert_eq!(reply, b"ok");
    }

    #[test]
    fn test_upgrade_without_key_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n")
            .unwrap();

        let (stream, _) = listener.accept().unwrap();
        let result = WebSocketTransport::accept(stream, Duration::from_secs(1));
        assert!(matches!(result, Err(HandshakeError::Upgrade(_))));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let head = "GET / HTTP/1.1\r\nsec-websocket-KEY:  abc== \r\n\r\n";
        assert_eq!(header_value(head, "Sec-WebSocket-Key"), Some("abc=="));
        assert_eq!(header_value(head, "Upgrade"), None);
    }
}
