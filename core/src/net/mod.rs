//! Networking for synctrack
//!
//! Editor (server) and player (client) exchange the same six commands over
//! either transport:
//!
//! - [`protocol`] - command codec and GET_TRACK dialects
//! - [`transport`] - the [`Transport`] seam and raw TCP
//! - [`websocket`] - HTTP upgrade and binary frames
//! - [`handshake`] - greeting exchange
//! - [`session`] / [`server`] - editor side
//! - [`client`] - player side
//!
//! # Architecture
//!
//! ```text
//!   SyncServer (editor)                        SyncClient (player)
//!   +--------------------+                     +--------------------+
//!   | SyncDocument       |  SET_KEY/DELETE_KEY |  TrackStore        |
//!   |   edit history ----+--- SET_ROW/PAUSE -->|   value_at(row)    |
//!   | ClientSession x N  |  SAVE_TRACKS        |  SyncTimer         |
//!   |   remap table   <--+--- GET_TRACK -------+                    |
//!   |                 <--+--- SET_ROW ---------+                    |
//!   +--------------------+                     +--------------------+
//!            |                                          |
//!            +---------- TcpTransport / WebSocketTransport
//! ```

pub mod client;
pub mod handshake;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod tests;

pub use client::{SyncClient, SyncTimer};
pub use handshake::{CLIENT_GREETING, DEFAULT_SYNC_PORT, DEFAULT_WEBSOCKET_PORT, SERVER_GREETING};
pub use protocol::{DecodeError, SyncCommand, WireDialect};
pub use server::{ServerEvent, SyncServer};
pub use session::{ClientSession, SessionEvent, SessionState};
pub use transport::{TcpTransport, Transport, TransportKind};
pub use websocket::{Role, WebSocketTransport};
