//! Player-side sync client.
//!
//! Mirrors the editor's tracks on demand. While disconnected, tracks come
//! from their per-track files and the last received keys stay in effect;
//! [`SyncClient::update`] keeps trying to reconnect and resyncs every track
//! once it succeeds.
//!
//! Reconnecting never stalls the caller's frame: the socket connect (and
//! WebSocket upgrade) runs on a short-lived worker thread, and the editor's
//! greeting is polled like any other input.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use synctrack_shared::track_file::{self, TrackFileError};
use synctrack_shared::{Track, TrackStore};

use super::handshake::{CLIENT_GREETING, client_handshake, read_server_greeting};
use super::protocol::{SyncCommand, WireDialect};
use super::transport::{TcpTransport, Transport, TransportKind};
use super::websocket::WebSocketTransport;
use crate::error::{HandshakeError, ProtocolError, SyncError, TransportError};

/// Deadline for the editor's greeting reply
const GREETING_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between failed connection attempts
const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Playback clock driven by the editor.
///
/// The client calls these while handling SET_ROW and PAUSE, and asks
/// [`is_playing`](SyncTimer::is_playing) to decide whether to report rows.
pub trait SyncTimer {
    fn pause(&mut self);
    fn play(&mut self);
    fn set_row(&mut self, row: u32);
    fn is_playing(&self) -> bool;
}

#[derive(Debug, Clone)]
struct ServerTarget {
    host: String,
    port: u16,
    kind: TransportKind,
    timeout: Duration,
}

type PendingTransport = Receiver<Result<Box<dyn Transport>, SyncError>>;

/// Connection progress, advanced by [`SyncClient::update`].
enum Link {
    Offline,
    /// Worker thread is opening the socket
    Connecting(PendingTransport),
    /// Greeting sent, reply not yet in
    Greeting {
        transport: Box<dyn Transport>,
        deadline: Instant,
    },
    Ready(Box<dyn Transport>),
}

impl Link {
    fn name(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Connecting(_) => "connecting",
            Self::Greeting { .. } => "greeting",
            Self::Ready(_) => "ready",
        }
    }
}

pub struct SyncClient {
    tracks: TrackStore,
    directory: PathBuf,
    base: String,
    dialect: WireDialect,
    link: Link,
    target: Option<ServerTarget>,
    /// Earliest time for the next background attempt
    retry_at: Option<Instant>,
    /// Row last reported with SET_ROW on this connection
    last_sent_row: Option<u32>,
}

impl SyncClient {
    /// Track files live at `<directory>/<base>_<name>.track`.
    pub fn new(directory: impl Into<PathBuf>, base: &str) -> Result<Self, TrackFileError> {
        if !track_file::is_safe_track_base(base) {
            return Err(TrackFileError::InvalidBase(base.to_string()));
        }
        Ok(Self {
            tracks: TrackStore::new(),
            directory: directory.into(),
            base: base.to_string(),
            dialect: WireDialect::default(),
            link: Link::Offline,
            target: None,
            retry_at: None,
            last_sent_row: None,
        })
    }

    pub fn with_dialect(mut self, dialect: WireDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn store(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Interpolated value of track `index`, 0 for an unknown index.
    pub fn value(&self, index: usize, row: f64) -> f64 {
        self.tracks.get(index).map_or(0.0, |track| track.value_at(row))
    }

    /// Index of the named track, creating and filling it on first use.
    ///
    /// Connected: the editor is asked for the keys. Otherwise the keys come
    /// from the track file; a missing file leaves the track empty.
    pub fn get_track(&mut self, name: &str) -> Result<usize, SyncError> {
        if let Some(index) = self.tracks.find(name) {
            return Ok(index);
        }
        let index = self.tracks.get_or_create(name);

        if self.is_connected() {
            match self.request_track(index) {
                Ok(()) => return Ok(index),
                Err(e) => {
                    tracing::warn!(name, error = %e, "Track request failed, using track file");
                    self.drop_connection();
                }
            }
        }

        if let Some(track) = self.tracks.get_mut(index) {
            let found = track_file::load_track(&self.directory, &self.base, track)?;
            if !found {
                tracing::debug!(name, "No track file, starting empty");
            }
        }
        Ok(index)
    }

    /// True once the greeting went through and commands flow.
    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Ready(_))
    }

    /// Remember the editor's address without connecting.
    ///
    /// The next [`update`](Self::update) starts a background attempt.
    pub fn set_server(&mut self, host: &str, port: u16, kind: TransportKind, timeout: Duration) {
        self.drop_connection();
        self.target = Some(ServerTarget {
            host: host.to_string(),
            port,
            kind,
            timeout,
        });
        self.retry_at = None;
    }

    /// Remember the editor's address and connect right away.
    ///
    /// Blocks for at most `timeout` plus the greeting deadline. On failure
    /// the address is kept, so [`update`](Self::update) retries.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        kind: TransportKind,
        timeout: Duration,
    ) -> Result<(), SyncError> {
        self.set_server(host, port, kind, timeout);
        let Some(target) = self.target.clone() else {
            return Err(SyncError::NotConnected);
        };
        let transport = open_transport(&target)?;
        self.greet(transport)
    }

    /// Use a transport the caller opened.
    ///
    /// Any stored address is forgotten: once this link drops, reconnecting
    /// is up to the caller.
    pub fn connect_with(&mut self, mut transport: Box<dyn Transport>) -> Result<(), SyncError> {
        self.drop_connection();
        self.target = None;
        transport.set_read_timeout(Some(GREETING_TIMEOUT))?;
        self.greet(transport)
    }

    /// Close the link but keep the address for later reconnects.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            tracing::info!("Disconnected from editor");
        }
        self.drop_connection();
        self.retry_at = None;
    }

    /// Advance the connection, handle every pending command and report the
    /// playback row while playing. Never waits on the network.
    ///
    /// Returns `Ok` while a connection attempt is still in progress.
    pub fn update(&mut self, row: u32, timer: &mut dyn SyncTimer) -> Result<(), SyncError> {
        if !self.advance_link()? {
            return Ok(());
        }

        if let Err(e) = self.drain(timer) {
            if e.is_disconnect() {
                tracing::info!("Editor closed the connection");
            } else {
                tracing::warn!(error = %e, "Dropping editor connection");
            }
            self.drop_connection();
            return Err(e);
        }

        if timer.is_playing() && self.last_sent_row != Some(row) {
            self.send(&SyncCommand::SetRow { row })?;
            self.last_sent_row = Some(row);
        }
        Ok(())
    }

    /// Dump every track to its track file.
    pub fn save_tracks(&self) -> Result<usize, TrackFileError> {
        track_file::save_all(&self.directory, &self.base, &self.tracks)
    }

    /// One non-blocking step towards a ready link. `Ok(true)` when ready.
    fn advance_link(&mut self) -> Result<bool, SyncError> {
        match std::mem::replace(&mut self.link, Link::Offline) {
            Link::Ready(transport) => {
                self.link = Link::Ready(transport);
                Ok(true)
            }
            Link::Offline => {
                let Some(target) = self.target.clone() else {
                    return Err(SyncError::NotConnected);
                };
                if self.retry_at.is_none_or(|at| Instant::now() >= at) {
                    tracing::debug!(host = %target.host, port = target.port, "Connecting to editor");
                    self.link = Link::Connecting(spawn_connect(target));
                }
                Ok(false)
            }
            Link::Connecting(pending) => match pending.try_recv() {
                Ok(Ok(mut transport)) => {
                    if let Err(e) = transport.send(CLIENT_GREETING) {
                        transport.close();
                        return Err(self.attempt_failed(e.into()));
                    }
                    self.link = Link::Greeting {
                        transport,
                        deadline: Instant::now() + GREETING_TIMEOUT,
                    };
                    self.advance_link()
                }
                Ok(Err(e)) => Err(self.attempt_failed(e)),
                Err(TryRecvError::Empty) => {
                    self.link = Link::Connecting(pending);
                    Ok(false)
                }
                Err(TryRecvError::Disconnected) => Err(self.attempt_failed(SyncError::NotConnected)),
            },
            Link::Greeting {
                mut transport,
                deadline,
            } => match transport.poll_readable() {
                Ok(true) => match read_server_greeting(transport.as_mut()) {
                    Ok(()) => {
                        self.on_connected(transport)?;
                        Ok(true)
                    }
                    Err(e) => {
                        transport.close();
                        Err(self.attempt_failed(e.into()))
                    }
                },
                Ok(false) if Instant::now() < deadline => {
                    self.link = Link::Greeting {
                        transport,
                        deadline,
                    };
                    Ok(false)
                }
                Ok(false) => {
                    transport.close();
                    let timed_out = HandshakeError::Transport(TransportError::TimedOut);
                    Err(self.attempt_failed(timed_out.into()))
                }
                Err(e) => {
                    transport.close();
                    Err(self.attempt_failed(e.into()))
                }
            },
        }
    }

    /// Log a failed background attempt and schedule the next one.
    fn attempt_failed(&mut self, error: SyncError) -> SyncError {
        tracing::debug!(error = %error, "Editor connection attempt failed");
        self.link = Link::Offline;
        self.retry_at = Some(Instant::now() + RECONNECT_INTERVAL);
        error
    }

    /// Blocking greeting on a freshly opened transport.
    fn greet(&mut self, mut transport: Box<dyn Transport>) -> Result<(), SyncError> {
        if let Err(e) = client_handshake(transport.as_mut()) {
            transport.close();
            return Err(e.into());
        }
        self.on_connected(transport)
    }

    /// Stale keys go; the editor replays everything it has.
    fn on_connected(&mut self, mut transport: Box<dyn Transport>) -> Result<(), SyncError> {
        transport.set_read_timeout(None)?;
        tracing::info!(peer = ?transport.peer_addr(), transport = %transport.kind(), "Connected to editor");
        self.link = Link::Ready(transport);
        self.retry_at = None;
        self.last_sent_row = None;

        for track in self.tracks.iter_mut() {
            track.clear_keys();
        }
        for index in 0..self.tracks.len() {
            if let Err(e) = self.request_track(index) {
                self.drop_connection();
                return Err(e);
            }
        }
        Ok(())
    }

    fn request_track(&mut self, index: usize) -> Result<(), SyncError> {
        let Some(name) = self.tracks.get(index).map(|t| t.name().to_string()) else {
            return Ok(());
        };
        tracing::debug!(name = %name, index, "Requesting track");
        self.send(&SyncCommand::GetTrack {
            index: Some(index as u32),
            name,
        })
    }

    fn drain(&mut self, timer: &mut dyn SyncTimer) -> Result<(), SyncError> {
        loop {
            let Link::Ready(transport) = &mut self.link else {
                return Err(SyncError::NotConnected);
            };
            if !transport.poll_readable()? {
                return Ok(());
            }
            let command = SyncCommand::decode(transport, self.dialect)?;
            tracing::trace!(command = command.name(), "Received");
            self.handle(command, timer)?;
        }
    }

    fn handle(&mut self, command: SyncCommand, timer: &mut dyn SyncTimer) -> Result<(), SyncError> {
        match command {
            SyncCommand::SetKey { track, key } => {
                let target = self
                    .tracks
                    .get_mut(track as usize)
                    .ok_or(ProtocolError::UnknownTrack(track))?;
                target.set_key(key);
            }
            SyncCommand::DeleteKey { track, row } => {
                let target = self
                    .tracks
                    .get_mut(track as usize)
                    .ok_or(ProtocolError::UnknownTrack(track))?;
                target
                    .delete_key(row)
                    .map_err(|_| ProtocolError::MissingKey { track, row })?;
            }
            SyncCommand::SetRow { row } => timer.set_row(row),
            SyncCommand::Pause { paused } => {
                if paused {
                    timer.pause();
                } else {
                    timer.play();
                }
            }
            SyncCommand::SaveTracks => {
                if let Err(e) = self.save_tracks() {
                    tracing::warn!(error = %e, "Failed to save tracks");
                }
            }
            other @ SyncCommand::GetTrack { .. } => {
                return Err(ProtocolError::UnexpectedCommand(other.name()).into());
            }
        }
        Ok(())
    }

    fn send(&mut self, command: &SyncCommand) -> Result<(), SyncError> {
        let Link::Ready(transport) = &mut self.link else {
            return Err(SyncError::NotConnected);
        };
        if let Err(e) = transport.send(&command.encode(self.dialect)) {
            tracing::warn!(error = %e, command = command.name(), "Send failed");
            self.drop_connection();
            return Err(e.into());
        }
        Ok(())
    }

    /// Close whatever link exists. A pending worker's socket closes when its
    /// result is dropped.
    fn drop_connection(&mut self) {
        match std::mem::replace(&mut self.link, Link::Offline) {
            Link::Ready(mut transport) | Link::Greeting { mut transport, .. } => transport.close(),
            Link::Connecting(_) | Link::Offline => {}
        }
    }
}

/// Open the socket on a worker thread; the result arrives on the receiver.
fn spawn_connect(target: ServerTarget) -> PendingTransport {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(open_transport(&target));
    });
    rx
}

/// Connect (and upgrade, for WebSocket) with greeting-sized read deadlines.
fn open_transport(target: &ServerTarget) -> Result<Box<dyn Transport>, SyncError> {
    let mut transport: Box<dyn Transport> = match target.kind {
        TransportKind::Tcp => Box::new(TcpTransport::connect(&target.host, target.port, target.timeout)?),
        TransportKind::WebSocket => Box::new(WebSocketTransport::connect(
            &target.host,
            target.port,
            target.timeout,
        )?),
    };
    transport.set_read_timeout(Some(GREETING_TIMEOUT))?;
    Ok(transport)
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("tracks", &self.tracks.len())
            .field("directory", &self.directory)
            .field("base", &self.base)
            .field("link", &self.link.name())
            .field("target", &self.target)
            .finish()
    }
}
