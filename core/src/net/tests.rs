//! Integration tests for editor/player sync over real sockets

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use synctrack_shared::{Interpolation, KeyFrame};

use super::*;
use crate::config::ServerConfig;
use crate::edit::{EditCommand, SyncDocument};

#[derive(Debug, Default)]
struct TestTimer {
    playing: bool,
    row: u32,
}

impl SyncTimer for TestTimer {
    fn pause(&mut self) {
        self.playing = false;
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn set_row(&mut self, row: u32) {
        self.row = row;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

fn linear(row: u32, value: f32) -> KeyFrame {
    KeyFrame::new(row, value, Interpolation::Linear)
}

/// Document with "fx.x" keyed 0 -> 0.0 and 10 -> 10.0, inserted out of order.
fn document_with_fx() -> SyncDocument {
    let mut doc = SyncDocument::new();
    let track = doc.create_track("fx.x");
    doc.execute(EditCommand::insert(track, linear(10, 10.0))).unwrap();
    doc.execute(EditCommand::insert(track, linear(0, 0.0))).unwrap();
    doc.clear_history();
    doc
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn server(max_clients: usize, websocket_port: u16) -> SyncServer {
    let config = ServerConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        websocket_port,
        handshake_timeout_ms: 1000,
        max_clients_per_listener: max_clients,
        ..Default::default()
    };
    SyncServer::bind(&config, document_with_fx()).unwrap()
}

/// Run `f` while another thread keeps polling the server.
fn with_server_running<R>(server: &mut SyncServer, f: impl FnOnce() -> R) -> R {
    let stop = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                server.poll();
                thread::sleep(Duration::from_millis(2));
            }
        });
        let result = f();
        stop.store(true, Ordering::Relaxed);
        result
    })
}

fn connect_client(server: &mut SyncServer, dir: &std::path::Path, kind: TransportKind) -> SyncClient {
    let port = match kind {
        TransportKind::Tcp => server.local_addr().unwrap().port(),
        TransportKind::WebSocket => server.websocket_addr().unwrap().port(),
    };
    let mut client = SyncClient::new(dir, "sync").unwrap();
    with_server_running(server, || {
        client
            .connect("127.0.0.1", port, kind, Duration::from_secs(1))
            .unwrap()
    });
    client
}

/// Alternate server and client polls, collecting server events.
fn pump(server: &mut SyncServer, client: &mut SyncClient, timer: &mut TestTimer, row: u32) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    for _ in 0..10 {
        events.extend(server.poll());
        client.update(row, timer).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    events
}

fn raw_player(port: u16) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    stream.write_all(CLIENT_GREETING).unwrap();
    stream
}

fn read_command(stream: &mut TcpStream) -> SyncCommand {
    SyncCommand::decode(stream, WireDialect::Standard).unwrap()
}

/// Consume the greeting and the pause/row sent to every new player.
fn expect_welcome(stream: &mut TcpStream) {
    let mut greeting = [0u8; 12];
    stream.read_exact(&mut greeting).unwrap();
    assert_eq!(&greeting, SERVER_GREETING);
    assert_eq!(read_command(stream), SyncCommand::Pause { paused: true });
    assert_eq!(read_command(stream), SyncCommand::SetRow { row: 0 });
}

fn poll_until<F>(server: &mut SyncServer, mut pred: F) -> Vec<ServerEvent>
where
    F: FnMut(&ServerEvent) -> bool,
{
    let mut seen = Vec::new();
    for _ in 0..200 {
        let events = server.poll();
        let done = events.iter().any(&mut pred);
        seen.extend(events);
        if done {
            return seen;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached, saw {:?}", seen);
}

// ============================================================================
// Server Tests
// ============================================================================

#[test]
fn test_wrong_greeting_closes_without_reply() {
    let mut server = server(1, 0);
    let mut stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    stream.write_all(b"hello, synctracker?").unwrap();

    let events = server.poll();
    assert!(events.is_empty());
    assert_eq!(server.client_count(), 0);

    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_one_accept_per_poll() {
    let mut server = server(2, 0);
    let port = server.local_addr().unwrap().port();
    let mut first = raw_player(port);
    let mut second = raw_player(port);

    server.poll();
    assert_eq!(server.client_count(), 1);
    server.poll();
    assert_eq!(server.client_count(), 2);

    expect_welcome(&mut first);
    expect_welcome(&mut second);
}

#[test]
fn test_listener_full_closes_extra_connection() {
    let mut server = server(1, 0);
    let port = server.local_addr().unwrap().port();
    let mut first = raw_player(port);
    poll_until(&mut server, |e| matches!(e, ServerEvent::ClientConnected { .. }));
    expect_welcome(&mut first);

    let mut extra = TcpStream::connect(("127.0.0.1", port)).unwrap();
    extra.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    server.poll();
    assert_eq!(server.client_count(), 1);

    let mut buf = [0u8; 1];
    assert_eq!(extra.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_get_track_replays_to_requester_only() {
    let mut server = server(2, 0);
    let port = server.local_addr().unwrap().port();
    let mut requester = raw_player(port);
    let mut bystander = raw_player(port);
    server.poll();
    server.poll();
    expect_welcome(&mut requester);
    expect_welcome(&mut bystander);

    let request = SyncCommand::GetTrack {
        index: None,
        name: "fx.x".to_string(),
    };
    requester.write_all(&request.encode(WireDialect::Standard)).unwrap();
    let events = poll_until(&mut server, |e| matches!(e, ServerEvent::TrackRequested { .. }));
    assert!(events.contains(&ServerEvent::TrackRequested {
        index: 0,
        name: "fx.x".to_string()
    }));

    assert_eq!(
        read_command(&mut requester),
        SyncCommand::SetKey {
            track: 0,
            key: linear(0, 0.0)
        }
    );
    assert_eq!(
        read_command(&mut requester),
        SyncCommand::SetKey {
            track: 0,
            key: linear(10, 10.0)
        }
    );

    // Later edits only reach the subscriber
    server.execute(EditCommand::insert(0, linear(5, 2.0))).unwrap();
    assert_eq!(
        read_command(&mut requester),
        SyncCommand::SetKey {
            track: 0,
            key: linear(5, 2.0)
        }
    );

    bystander
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let mut buf = [0u8; 1];
    assert!(bystander.read(&mut buf).is_err());
}

#[test]
fn test_player_disconnect_is_reported() {
    let mut server = server(1, 0);
    let port = server.local_addr().unwrap().port();
    let mut player = raw_player(port);
    poll_until(&mut server, |e| matches!(e, ServerEvent::ClientConnected { .. }));
    expect_welcome(&mut player);

    drop(player);
    poll_until(&mut server, |e| matches!(e, ServerEvent::ClientDisconnected { .. }));
    assert_eq!(server.client_count(), 0);
}

// ============================================================================
// Client/Server Tests
// ============================================================================

#[test]
fn test_edits_reach_player() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    let mut client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    let mut timer = TestTimer::default();

    let fx = client.get_track("fx.x").unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(fx, 5.0), 5.0);

    let edit = server
        .document()
        .set_key_command(0, KeyFrame::new(0, 0.0, Interpolation::Step))
        .unwrap();
    server.execute(edit).unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(fx, 5.0), 0.0);
    assert_eq!(client.value(fx, 12.0), 10.0);

    assert!(server.undo().unwrap());
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(fx, 5.0), 5.0);

    let delete = server.document().delete_key_command(0, 0).unwrap();
    server.execute(delete).unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.track(fx).unwrap().len(), 1);
}

#[test]
fn test_unknown_track_is_created_for_player() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    let mut client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    let mut timer = TestTimer::default();

    let cam = client.get_track("cam.zoom").unwrap();
    let events = pump(&mut server, &mut client, &mut timer, 0);
    assert!(events.contains(&ServerEvent::TrackRequested {
        index: 1,
        name: "cam.zoom".to_string()
    }));
    assert_eq!(server.document().tracks().find("cam.zoom"), Some(1));

    // Player index 0 maps to editor index 1
    server.execute(EditCommand::insert(1, linear(3, 7.0))).unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(cam, 3.0), 7.0);
}

#[test]
fn test_pause_play_and_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    let mut client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    let mut timer = TestTimer {
        playing: true,
        row: 99,
    };

    // Welcome pauses the player at the editor's row
    pump(&mut server, &mut client, &mut timer, 0);
    assert!(!timer.playing);
    assert_eq!(timer.row, 0);

    server.set_row(12);
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(timer.row, 12);

    server.set_paused(false);
    let events = pump(&mut server, &mut client, &mut timer, 7);
    assert!(timer.playing);
    assert!(events.contains(&ServerEvent::RowChanged(7)));
    assert_eq!(server.edit_row(), 7);

    // Unchanged row is not reported again
    let events = pump(&mut server, &mut client, &mut timer, 7);
    assert!(!events.iter().any(|e| matches!(e, ServerEvent::RowChanged(_))));

    server.set_paused(true);
    pump(&mut server, &mut client, &mut timer, 8);
    assert!(!timer.playing);
}

#[test]
fn test_new_player_pauses_editor() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    server.set_paused(false);
    assert!(!server.is_paused());

    let _client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    assert!(server.is_paused());
}

#[test]
fn test_remote_save_writes_player_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    let mut client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    let mut timer = TestTimer::default();

    client.get_track("fx.x").unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    server.save_remote_tracks();
    pump(&mut server, &mut client, &mut timer, 0);

    let path = synctrack_shared::track_file::track_path(dir.path(), "sync", "fx.x");
    assert!(path.exists());
}

#[test]
fn test_reconnect_drops_stale_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    let mut client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    let mut timer = TestTimer::default();

    let fx = client.get_track("fx.x").unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.track(fx).unwrap().len(), 2);

    client.disconnect();
    poll_until(&mut server, |e| matches!(e, ServerEvent::ClientDisconnected { .. }));

    // Missed while offline
    server.execute(EditCommand::delete(0, 10)).unwrap();
    assert_eq!(client.track(fx).unwrap().len(), 2);

    // Reconnects in the background over a few updates
    with_server_running(&mut server, || {
        for _ in 0..400 {
            client.update(0, &mut timer).unwrap();
            if client.is_connected() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    });
    assert!(client.is_connected());
    pump(&mut server, &mut client, &mut timer, 0);

    let keys = client.track(fx).unwrap().keys();
    assert_eq!(keys, &[linear(0, 0.0)]);
}

#[test]
fn test_reloaded_files_reach_player() {
    let dir = tempfile::tempdir().unwrap();
    let files = tempfile::tempdir().unwrap();
    let mut server = server(1, 0);
    server.save_track_files(files.path(), "sync").unwrap();

    let mut client = connect_client(&mut server, dir.path(), TransportKind::Tcp);
    let mut timer = TestTimer::default();
    let fx = client.get_track("fx.x").unwrap();
    pump(&mut server, &mut client, &mut timer, 0);

    server.execute(EditCommand::insert(0, linear(5, 50.0))).unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(fx, 5.0), 50.0);

    // Reverting to the files drops the unsaved key on the player too
    assert_eq!(server.load_track_files(files.path(), "sync").unwrap(), 1);
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.track(fx).unwrap().keys(), &[linear(0, 0.0), linear(10, 10.0)]);
    assert!(!server.document().modified());
}

#[test]
fn test_websocket_player() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(1, free_port());
    let mut client = connect_client(&mut server, dir.path(), TransportKind::WebSocket);
    let mut timer = TestTimer::default();
    assert_eq!(server.sessions()[0].kind(), TransportKind::WebSocket);

    let fx = client.get_track("fx.x").unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(fx, 2.5), 2.5);

    server.execute(EditCommand::insert(0, linear(5, 0.0))).unwrap();
    pump(&mut server, &mut client, &mut timer, 0);
    assert_eq!(client.value(fx, 5.0), 0.0);
}
