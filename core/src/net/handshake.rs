//! Greeting exchange that opens every sync connection.
//!
//! The client speaks first. Neither side trusts command bytes until the
//! greeting matched exactly.

use super::transport::Transport;
use crate::error::HandshakeError;

/// Sent by the player when it connects
pub const CLIENT_GREETING: &[u8] = b"hello, synctracker!";

/// Editor reply to a valid client greeting
pub const SERVER_GREETING: &[u8] = b"hello, demo!";

/// Default editor port
pub const DEFAULT_SYNC_PORT: u16 = 1338;

/// Default editor port for WebSocket players
pub const DEFAULT_WEBSOCKET_PORT: u16 = 1339;

/// Player side: greet and wait for the editor's answer.
pub fn client_handshake<T: Transport + ?Sized>(transport: &mut T) -> Result<(), HandshakeError> {
    transport.send(CLIENT_GREETING)?;
    read_server_greeting(transport)
}

/// Player side, second half: check the editor's answer.
///
/// Blocks until the reply arrived, so non-blocking callers wait for
/// [`Transport::poll_readable`] first.
pub fn read_server_greeting<T: Transport + ?Sized>(transport: &mut T) -> Result<(), HandshakeError> {
    let reply = transport.recv(SERVER_GREETING.len())?;
    if reply != SERVER_GREETING {
        return Err(HandshakeError::BadGreeting(
            String::from_utf8_lossy(&reply).into_owned(),
        ));
    }
    Ok(())
}

/// Editor side: validate the player's greeting, then answer.
///
/// Nothing is sent back on a mismatch.
pub fn server_handshake<T: Transport + ?Sized>(transport: &mut T) -> Result<(), HandshakeError> {
    let greeting = transport.recv(CLIENT_GREETING.len())?;
    if greeting != CLIENT_GREETING {
        return Err(HandshakeError::BadGreeting(
            String::from_utf8_lossy(&greeting).into_owned(),
        ));
    }
    transport.send(SERVER_GREETING)?;
    Ok(())
}
