//! Editor-side sync server.
//!
//! Owns the [`SyncDocument`] and every [`ClientSession`]. The caller drives
//! it from its own loop: [`SyncServer::poll`] accepts players and handles
//! their commands without blocking, and every edit made through the server
//! is mirrored to the players that subscribed to the affected track.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;

use synctrack_shared::TrackFileError;

use super::session::{ClientSession, SessionEvent};
use super::transport::{TcpTransport, Transport, TransportKind};
use super::websocket::WebSocketTransport;
use crate::config::ServerConfig;
use crate::edit::{EditCommand, EditError, SyncDocument, TrackDelta};
use crate::error::SyncError;

/// Something that happened during [`SyncServer::poll`] or an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        peer: Option<SocketAddr>,
        kind: TransportKind,
    },
    ClientDisconnected {
        peer: Option<SocketAddr>,
    },
    /// A player subscribed to a track (created if it did not exist)
    TrackRequested { index: usize, name: String },
    /// A playing player moved the shared cursor
    RowChanged(u32),
}

pub struct SyncServer {
    tcp: TcpListener,
    websocket: Option<TcpListener>,
    sessions: Vec<ClientSession>,
    document: SyncDocument,
    /// Shared edit cursor
    edit_row: u32,
    /// Last pause state broadcast
    paused: bool,
    config: ServerConfig,
    /// Events raised outside `poll`, handed out by the next `poll`
    events: Vec<ServerEvent>,
}

impl SyncServer {
    /// Bind the TCP listener and, unless `websocket_port` is 0, the
    /// WebSocket listener.
    pub fn bind(config: &ServerConfig, document: SyncDocument) -> io::Result<Self> {
        let tcp = bind_listener(&config.bind, config.port)?;
        let websocket = match config.websocket_port {
            0 => None,
            port => Some(bind_listener(&config.bind, port)?),
        };

        tracing::info!(
            tcp = ?tcp.local_addr().ok(),
            websocket = ?websocket.as_ref().and_then(|l| l.local_addr().ok()),
            "Sync server listening"
        );

        Ok(Self {
            tcp,
            websocket,
            sessions: Vec::new(),
            document,
            edit_row: 0,
            paused: true,
            config: config.clone(),
            events: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn websocket_addr(&self) -> Option<SocketAddr> {
        self.websocket.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn document(&self) -> &SyncDocument {
        &self.document
    }

    /// Index of the named track, creating it empty if needed.
    pub fn create_track(&mut self, name: &str) -> usize {
        self.document.create_track(name)
    }

    pub fn edit_row(&self) -> u32 {
        self.edit_row
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &[ClientSession] {
        &self.sessions
    }

    /// Handle player traffic, then accept at most one player per listener.
    pub fn poll(&mut self) -> Vec<ServerEvent> {
        for session in &mut self.sessions {
            let Ok(events) = session.poll(self.document.tracks_mut()) else {
                // Closed and logged by the session
                continue;
            };
            for event in events {
                match event {
                    SessionEvent::TrackRequested { index, name } => {
                        self.events.push(ServerEvent::TrackRequested { index, name });
                    }
                    SessionEvent::RowChanged(row) => {
                        self.edit_row = row;
                        self.events.push(ServerEvent::RowChanged(row));
                    }
                }
            }
        }
        self.reap();

        self.accept(TransportKind::Tcp);
        self.accept(TransportKind::WebSocket);

        std::mem::take(&mut self.events)
    }

    /// Run an edit and mirror its deltas.
    pub fn execute(&mut self, command: EditCommand) -> Result<(), EditError> {
        let deltas = self.document.execute(command)?;
        self.broadcast(&deltas);
        Ok(())
    }

    /// `Ok(false)` when there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool, EditError> {
        match self.document.undo()? {
            Some(deltas) => {
                self.broadcast(&deltas);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `Ok(false)` when there was nothing to redo.
    pub fn redo(&mut self) -> Result<bool, EditError> {
        match self.document.redo()? {
            Some(deltas) => {
                self.broadcast(&deltas);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move the shared cursor and tell every player.
    pub fn set_row(&mut self, row: u32) {
        self.edit_row = row;
        self.for_each_session(|session| session.send_row(row));
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.for_each_session(|session| session.send_pause(paused));
    }

    /// Ask every player to write its own track files.
    pub fn save_remote_tracks(&mut self) {
        self.for_each_session(ClientSession::send_save);
    }

    /// Write the editor's track files.
    pub fn save_track_files(&mut self, dir: &Path, base: &str) -> Result<usize, TrackFileError> {
        self.document.save_track_files(dir, base)
    }

    /// Replace the document's keys with the track files and mirror the
    /// changes to subscribed players. Returns the number of key changes.
    pub fn load_track_files(&mut self, dir: &Path, base: &str) -> Result<usize, TrackFileError> {
        let deltas = self.document.load_track_files(dir, base)?;
        self.broadcast(&deltas);
        Ok(deltas.len())
    }

    fn broadcast(&mut self, deltas: &[TrackDelta]) {
        self.for_each_session(|session| deltas.iter().try_for_each(|delta| session.forward(delta)));
    }

    /// Apply `send` to every session, dropping the ones that fail.
    fn for_each_session<F>(&mut self, mut send: F)
    where
        F: FnMut(&mut ClientSession) -> Result<(), SyncError>,
    {
        for session in &mut self.sessions {
            // Failed sessions are closed; reap collects them
            let _ = send(session);
        }
        self.reap();
    }

    fn reap(&mut self) {
        let events = &mut self.events;
        self.sessions.retain(|session| {
            let keep = session.is_connected();
            if !keep {
                events.push(ServerEvent::ClientDisconnected {
                    peer: session.peer(),
                });
            }
            keep
        });
    }

    fn accept(&mut self, kind: TransportKind) {
        let listener = match kind {
            TransportKind::Tcp => Some(&self.tcp),
            TransportKind::WebSocket => self.websocket.as_ref(),
        };
        let Some(listener) = listener else {
            return;
        };

        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                tracing::warn!(error = %e, transport = %kind, "Accept failed");
                return;
            }
        };

        let serving = self.sessions.iter().filter(|s| s.kind() == kind).count();
        if serving >= self.config.max_clients_per_listener {
            tracing::info!(
                peer = ?stream.peer_addr().ok(),
                transport = %kind,
                "Listener full, closing connection"
            );
            return;
        }

        match self.open_session(stream, kind) {
            Ok(session) => self.admit(session),
            Err(e) => tracing::warn!(error = %e, transport = %kind, "Player rejected"),
        }
    }

    fn open_session(&self, stream: TcpStream, kind: TransportKind) -> Result<ClientSession, SyncError> {
        let timeout = self.config.handshake_timeout();
        let transport: Box<dyn Transport> = match kind {
            TransportKind::Tcp => Box::new(TcpTransport::new(stream)?),
            TransportKind::WebSocket => Box::new(WebSocketTransport::accept(stream, timeout)?),
        };
        let mut session = ClientSession::new(transport, self.config.dialect);
        session.handshake(timeout)?;
        Ok(session)
    }

    /// New players start paused at the editor's cursor.
    fn admit(&mut self, mut session: ClientSession) {
        if !self.paused {
            self.set_paused(true);
        }

        let row = self.edit_row;
        if let Err(e) = session.send_pause(true).and_then(|()| session.send_row(row)) {
            tracing::warn!(peer = ?session.peer(), error = %e, "Player dropped after handshake");
            return;
        }

        self.events.push(ServerEvent::ClientConnected {
            peer: session.peer(),
            kind: session.kind(),
        });
        self.sessions.push(session);
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("tcp", &self.tcp.local_addr().ok())
            .field("websocket", &self.websocket_addr())
            .field("sessions", &self.sessions.len())
            .field("edit_row", &self.edit_row)
            .field("paused", &self.paused)
            .finish()
    }
}

fn bind_listener(bind: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((bind, port))?;
    listener.set_nonblocking(true)?;
    tracing::debug!(bind, port, "Bound listener");
    Ok(listener)
}
