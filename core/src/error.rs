//! Error taxonomy for sync connections.
//!
//! - [`HandshakeError`] - the peer never reached the connected state
//! - [`ProtocolError`] - the peer sent something this side must not accept
//! - [`TransportError`] - the byte stream itself failed
//!
//! All three are fatal for the connection they occur on. Edit history
//! failures are a separate type ([`crate::edit::EditError`]) because they are
//! local logic errors, not peer misbehaviour.

use std::io;

use synctrack_shared::TrackFileError;
use thiserror::Error;

use crate::net::protocol::DecodeError;
use crate::net::websocket::FrameError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("timed out waiting for peer")]
    TimedOut,
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Closed,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::Io(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unexpected greeting {0:?}")]
    BadGreeting(String),
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<io::Error> for HandshakeError {
    fn from(e: io::Error) -> Self {
        Self::Transport(e.into())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed command: {0}")]
    Decode(DecodeError),
    #[error("unknown track index {0}")]
    UnknownTrack(u32),
    #[error("no key at row {row} on track {track}")]
    MissingKey { track: u32, row: u32 },
    #[error("unexpected {0} command")]
    UnexpectedCommand(&'static str),
    #[error("WebSocket frame error: {0}")]
    Frame(FrameError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("not connected")]
    NotConnected,
    #[error("track file error: {0}")]
    TrackFile(#[from] TrackFileError),
}

impl SyncError {
    /// True when the peer closed the connection rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Closed)
                | Self::Handshake(HandshakeError::Transport(TransportError::Closed))
        )
    }
}

impl From<io::Error> for SyncError {
    fn from(e: io::Error) -> Self {
        // WebSocket framing violations travel through `Read` as io errors
        let frame = e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<FrameError>())
            .cloned();
        match frame {
            Some(frame) => Self::Protocol(ProtocolError::Frame(frame)),
            None => Self::Transport(e.into()),
        }
    }
}

impl From<DecodeError> for SyncError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Io(io) => io.into(),
            other => Self::Protocol(ProtocolError::Decode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_is_a_disconnect() {
        let err = SyncError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_disconnect());
    }

    #[test]
    fn frame_errors_become_protocol_violations() {
        let io = io::Error::new(io::ErrorKind::InvalidData, FrameError::PayloadTooLarge(70_000));
        let err = SyncError::from(io);
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolError::Frame(FrameError::PayloadTooLarge(70_000)))
        ));
    }

    #[test]
    fn decode_io_is_transport() {
        let err = SyncError::from(DecodeError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(matches!(err, SyncError::Transport(TransportError::Closed)));

        let err = SyncError::from(DecodeError::UnknownCommand(42));
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolError::Decode(DecodeError::UnknownCommand(42)))
        ));
    }

    #[test]
    fn error_display() {
        let err = SyncError::Protocol(ProtocolError::UnknownTrack(7));
        assert_eq!(err.to_string(), "protocol violation: unknown track index 7");
    }
}
