//! Editor-side state for one connected player.
//!
//! A session owns its transport and the remap table from editor track index
//! to the index the player used when it requested the track. Key deltas are
//! only forwarded for tracks present in that table.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use synctrack_shared::TrackStore;

use super::handshake::server_handshake;
use super::protocol::{SyncCommand, WireDialect};
use super::transport::{Transport, TransportKind};
use crate::edit::TrackDelta;
use crate::error::{ProtocolError, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the client greeting
    Handshaking,
    /// Greeting exchanged, commands flow
    Connected,
    /// Torn down; the remap table is gone
    Closed,
}

/// Something a player asked of the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A player subscribed to a track (created if it did not exist)
    TrackRequested { index: usize, name: String },
    /// A playing player moved to a new row
    RowChanged(u32),
}

pub struct ClientSession {
    transport: Box<dyn Transport>,
    state: SessionState,
    dialect: WireDialect,
    /// Editor track index -> player track index
    remap: BTreeMap<usize, u32>,
    /// Next index handed out in the standard dialect
    next_client_index: u32,
    /// Last pause state sent to the player
    paused: bool,
    peer: Option<SocketAddr>,
}

impl ClientSession {
    pub fn new(transport: Box<dyn Transport>, dialect: WireDialect) -> Self {
        let peer = transport.peer_addr();
        Self {
            transport,
            state: SessionState::Handshaking,
            dialect,
            remap: BTreeMap::new(),
            next_client_index: 0,
            paused: false,
            peer,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Player index for an editor track, if the player requested it.
    pub fn client_index(&self, track: usize) -> Option<u32> {
        self.remap.get(&track).copied()
    }

    /// Editor indices of every subscribed track.
    pub fn subscribed_tracks(&self) -> impl Iterator<Item = usize> + '_ {
        self.remap.keys().copied()
    }

    /// Validate the greeting, bounded by `timeout`.
    pub fn handshake(&mut self, timeout: Duration) -> Result<(), SyncError> {
        if self.state != SessionState::Handshaking {
            return Err(SyncError::NotConnected);
        }

        match greet(self.transport.as_mut(), timeout) {
            Ok(()) => {
                self.state = SessionState::Connected;
                tracing::info!(peer = ?self.peer, transport = %self.kind(), "Player connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(peer = ?self.peer, error = %e, "Player handshake failed");
                self.close();
                Err(e)
            }
        }
    }

    /// Handle every command that is already readable.
    ///
    /// Any error closes the session before it is returned.
    pub fn poll(&mut self, store: &mut TrackStore) -> Result<Vec<SessionEvent>, SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let mut events = Vec::new();
        match self.drain(store, &mut events) {
            Ok(()) => Ok(events),
            Err(e) => {
                if e.is_disconnect() {
                    tracing::info!(peer = ?self.peer, "Player disconnected");
                } else {
                    tracing::warn!(peer = ?self.peer, error = %e, "Dropping player");
                }
                self.close();
                Err(e)
            }
        }
    }

    fn drain(&mut self, store: &mut TrackStore, events: &mut Vec<SessionEvent>) -> Result<(), SyncError> {
        while self.transport.poll_readable()? {
            let command = SyncCommand::decode(&mut self.transport, self.dialect)?;
            tracing::trace!(peer = ?self.peer, command = command.name(), "Received");

            match command {
                SyncCommand::GetTrack { index, name } => {
                    let track = self.subscribe(store, index, &name)?;
                    events.push(SessionEvent::TrackRequested { index: track, name });
                }
                SyncCommand::SetRow { row } => events.push(SessionEvent::RowChanged(row)),
                other => return Err(ProtocolError::UnexpectedCommand(other.name()).into()),
            }
        }
        Ok(())
    }

    /// Record the subscription and replay the track's keys in row order.
    fn subscribe(
        &mut self,
        store: &mut TrackStore,
        requested: Option<u32>,
        name: &str,
    ) -> Result<usize, SyncError> {
        let track = store.get_or_create(name);
        let client_index = requested.unwrap_or(self.next_client_index);
        self.next_client_index = self.next_client_index.max(client_index.saturating_add(1));
        self.remap.insert(track, client_index);

        tracing::debug!(peer = ?self.peer, name, track, client_index, "Track requested");

        let Some(keys) = store.get(track).map(|t| t.keys().to_vec()) else {
            return Ok(track);
        };
        for key in keys {
            self.send(&SyncCommand::SetKey {
                track: client_index,
                key,
            })?;
        }
        Ok(track)
    }

    /// Mirror one key change if the player subscribed to the track.
    pub fn forward(&mut self, delta: &TrackDelta) -> Result<(), SyncError> {
        let Some(track) = self.client_index(delta.track()) else {
            return Ok(());
        };
        let command = match *delta {
            TrackDelta::KeySet { key, .. } => SyncCommand::SetKey { track, key },
            TrackDelta::KeyDeleted { row, .. } => SyncCommand::DeleteKey { track, row },
        };
        self.send(&command)
    }

    pub fn send_row(&mut self, row: u32) -> Result<(), SyncError> {
        self.send(&SyncCommand::SetRow { row })
    }

    pub fn send_pause(&mut self, paused: bool) -> Result<(), SyncError> {
        self.send(&SyncCommand::Pause { paused })?;
        self.paused = paused;
        Ok(())
    }

    /// Ask the player to dump its tracks to disk.
    pub fn send_save(&mut self) -> Result<(), SyncError> {
        self.send(&SyncCommand::SaveTracks)
    }

    fn send(&mut self, command: &SyncCommand) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let bytes = command.encode(self.dialect);
        if let Err(e) = self.transport.send(&bytes) {
            tracing::warn!(peer = ?self.peer, error = %e, command = command.name(), "Send failed");
            self.close();
            return Err(e.into());
        }
        tracing::trace!(peer = ?self.peer, command = command.name(), "Sent");
        Ok(())
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.transport.close();
            self.state = SessionState::Closed;
            self.remap.clear();
        }
    }
}

fn greet(transport: &mut dyn Transport, timeout: Duration) -> Result<(), SyncError> {
    transport.set_read_timeout(Some(timeout))?;
    server_handshake(transport)?;
    transport.set_read_timeout(None)?;
    Ok(())
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("subscribed", &self.remap.len())
            .field("paused", &self.paused)
            .finish()
    }
}
