//! End-to-end tests against a relay on loopback ports

use holorelay_core::appearance::skin_color;
use holorelay_core::frame::encode_frame;
use holorelay_core::{Command, HeadlessEngine, RelayEvent};
use holorelay_daemon::client::{push_bytes, send_commands, HeartbeatWatcher};
use holorelay_daemon::config::Config;
use holorelay_daemon::server::RelayServer;
use holorelay_daemon::state::AppState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay(dir: &TempDir) -> (RelayServer, Arc<AppState>) {
    start_relay_with(dir, |_| {}).await
}

async fn start_relay_with<F>(dir: &TempDir, configure: F) -> (RelayServer, Arc<AppState>)
where
    F: FnOnce(&mut Config),
{
    let mut config = Config::default();
    config.daemon.bind = "127.0.0.1".to_string();
    config.daemon.shutdown_grace_ms = 500;
    config.transfer.port = 0;
    config.transfer.storage_root = dir.path().join("received");
    config.control.port = 0;
    config.heartbeat.port = 0;
    config.heartbeat.interval_ms = 100;
    config.markers.anchor = Some([0.0, 0.0, 1.5]);
    configure(&mut config);

    let engine = HeadlessEngine::new(config.markers.anchor);
    let state = AppState::new(config, engine).await.unwrap();
    let server = RelayServer::start(state.clone()).await.unwrap();
    (server, state)
}

async fn wait_for_event<F>(events: &mut broadcast::Receiver<RelayEvent>, mut matches: F) -> RelayEvent
where
    F: FnMut(&RelayEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn test_model_frame_then_unknown_child() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let payload = b"o Body\nv 1\n";
    assert_eq!(payload.len(), 11);
    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    push_bytes(&mut transfer, "a.obj", payload).await.unwrap();

    let stored = wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetStored { .. })).await;
    if let RelayEvent::AssetStored { file_name, bytes, path, .. } = stored {
        assert_eq!(file_name, "a.obj");
        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(path).unwrap(), payload);
    }
    let loaded = wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetLoaded { .. })).await;
    assert_eq!(
        loaded,
        RelayEvent::AssetLoaded {
            model: "a".to_string(),
            parts: 1,
            replaced: false,
        }
    );
    assert!(state.registry.get("a").await.is_some());

    send_commands(
        server.control_addr(),
        &[Command::UpdateColor {
            model: "A".to_string(),
            child: "X".to_string(),
            r: 1.0,
            g: 0.0,
            b: 0.0,
        }],
    )
    .await
    .unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, RelayEvent::UnknownChild { .. })).await;
    assert_eq!(
        event,
        RelayEvent::UnknownChild {
            model: "a".to_string(),
            child: "X".to_string(),
        }
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_reload_replaces_model() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    push_bytes(&mut transfer, "Skin.obj", b"o A\n").await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetLoaded { .. })).await;
    let first = state.registry.get("skin").await.unwrap();

    push_bytes(&mut transfer, "skin.obj", b"o A\no B\n").await.unwrap();
    let event = wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetLoaded { .. })).await;
    assert_eq!(
        event,
        RelayEvent::AssetLoaded {
            model: "skin".to_string(),
            parts: 2,
            replaced: true,
        }
    );

    let second = state.registry.get("skin").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(state.registry.models().await, vec!["skin".to_string()]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_clients_are_independent() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;

    let mut first = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();
    let second = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();
    let mut third = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();

    let clients = &state.clients;
    eventually(|| async move { clients.len().await == 3 }).await;

    for watcher in [&mut first, &mut third] {
        let line = tokio::time::timeout(WAIT, watcher.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, "{}");
    }

    drop(second);
    eventually(|| async move { clients.len().await == 2 }).await;

    for watcher in [&mut first, &mut third] {
        for _ in 0..2 {
            let snapshot = tokio::time::timeout(WAIT, watcher.next_snapshot())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert!(snapshot.is_empty());
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_name_list_renames_skin_parts() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    push_bytes(&mut transfer, "name.txt", "皮肤\n\n  血肿  \n".as_bytes())
        .await
        .unwrap();
    push_bytes(&mut transfer, "skin.obj", b"o A\no B\no C\n").await.unwrap();

    let updated = wait_for_event(&mut events, |e| matches!(e, RelayEvent::NameListUpdated { .. })).await;
    assert_eq!(updated, RelayEvent::NameListUpdated { count: 2 });
    wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetLoaded { .. })).await;

    let mut watcher = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();
    let snapshot = tokio::time::timeout(WAIT, watcher.next_snapshot())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let children = &snapshot.0["skin"];
    let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["皮肤", "血肿", "C"]);
    assert_eq!(children[0].color, Some(skin_color("皮肤")));
    assert_eq!(children[1].color, Some(skin_color("血肿")));
    assert_eq!(children[2].alpha, Some(1.0));

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_command_closes_only_that_connection() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let mut control = TcpStream::connect(server.control_addr()).await.unwrap();
    control.write_all(b"not json\n").await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, RelayEvent::MalformedCommand { .. })).await;

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, control.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    send_commands(server.control_addr(), &[Command::AddPoint, Command::AddPoint, Command::RemovePoint])
        .await
        .unwrap();
    let event = wait_for_event(&mut events, |e| matches!(e, RelayEvent::PointRemoved { .. })).await;
    assert_eq!(event, RelayEvent::PointRemoved { count: 1 });
    assert_eq!(state.point_count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_model_and_type_are_reported() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let mut control = TcpStream::connect(server.control_addr()).await.unwrap();
    control
        .write_all(b"{\"type\":\"update_opacity\",\"model_name\":\"ghost\",\"child_name\":\"x\",\"opacity\":0.5}\r\n")
        .await
        .unwrap();
    control.write_all(b"{\"type\":\"spin\"}\n").await.unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, RelayEvent::UnknownModel { .. })).await;
    assert_eq!(event, RelayEvent::UnknownModel { model: "ghost".to_string() });
    let event = wait_for_event(&mut events, |e| matches!(e, RelayEvent::UnknownCommand { .. })).await;
    assert_eq!(event, RelayEvent::UnknownCommand { kind: "spin".to_string() });
    assert!(state.registry.models().await.is_empty());

    // A blank line ends the session
    control.write_all(b"\n").await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, control.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    let mut header = Vec::new();
    header.extend_from_slice(&u64::MAX.to_be_bytes());
    header.extend_from_slice(&5u16.to_be_bytes());
    header.extend_from_slice(b"a.obj");
    transfer.write_all(&header).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, transfer.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    push_bytes(&mut transfer, "notes.md", b"# hi\n").await.unwrap();
    let stored = wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetStored { .. })).await;
    assert!(matches!(stored, RelayEvent::AssetStored { bytes: 5, .. }));
    assert!(state.registry.models().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_with_open_heartbeat_client() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;

    let mut watcher = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();
    let clients = &state.clients;
    eventually(|| async move { clients.len().await == 1 }).await;

    tokio::time::timeout(WAIT, server.shutdown()).await.unwrap();
    assert_eq!(state.clients.len().await, 0);

    let closed = tokio::time::timeout(WAIT, async {
        while let Ok(Some(_)) = watcher.next_line().await {}
    })
    .await;
    assert!(closed.is_ok());
}

/// Wait for the server to close `stream`, tolerating a reset
async fn assert_closed_by_server(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server kept the connection open");
}

#[tokio::test]
async fn test_half_closed_heartbeat_client_keeps_receiving() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;

    let mut stream = TcpStream::connect(server.heartbeat_addr()).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    for _ in 0..3 {
        let line = tokio::time::timeout(WAIT, lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .expect("heartbeat stream ended");
        assert_eq!(line, "{}");
    }
    assert_eq!(state.clients.len().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unstorable_name_is_drained() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;
    let mut events = state.subscribe();

    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    push_bytes(&mut transfer, " / ", b"o Lost\n").await.unwrap();
    push_bytes(&mut transfer, "b.obj", b"o Kept\n").await.unwrap();

    let stored = wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetStored { .. })).await;
    assert!(matches!(stored, RelayEvent::AssetStored { ref file_name, .. } if file_name == "b.obj"));
    let loaded = wait_for_event(&mut events, |e| matches!(e, RelayEvent::AssetLoaded { .. })).await;
    assert!(matches!(loaded, RelayEvent::AssetLoaded { ref model, parts: 1, .. } if model == "b"));

    let stored_files: Vec<_> = std::fs::read_dir(dir.path().join("received"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(stored_files, vec![std::ffi::OsString::from("b.obj")]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_truncated_payload_removes_partial_file() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay(&dir).await;

    let frame = encode_frame("c.obj", &[b'x'; 100]).unwrap();
    let mut transfer = TcpStream::connect(server.transfer_addr()).await.unwrap();
    transfer.write_all(&frame[..frame.len() - 90]).await.unwrap();
    transfer.shutdown().await.unwrap();

    assert_closed_by_server(&mut transfer).await;
    assert!(!dir.path().join("received").join("c.obj").exists());
    assert!(state.registry.models().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_overlong_control_line_closes_connection() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay_with(&dir, |config| config.control.max_line_bytes = 1024).await;
    let mut events = state.subscribe();

    let mut control = TcpStream::connect(server.control_addr()).await.unwrap();
    let mut line = vec![b'a'; 2000];
    line.push(b'\n');
    let _ = control.write_all(&line).await;
    assert_closed_by_server(&mut control).await;

    send_commands(server.control_addr(), &[Command::AddPoint]).await.unwrap();
    let event = wait_for_event(&mut events, |e| matches!(e, RelayEvent::PointAdded { .. })).await;
    assert_eq!(event, RelayEvent::PointAdded { count: 1 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_connection_limit_queues_extra_clients() {
    let dir = TempDir::new().unwrap();
    let (server, state) = start_relay_with(&dir, |config| config.daemon.max_connections = 1).await;
    let clients = &state.clients;

    let mut first = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();
    eventually(|| async move { clients.len().await == 1 }).await;
    tokio::time::timeout(WAIT, first.next_line()).await.unwrap().unwrap();

    let mut second = HeartbeatWatcher::connect(server.heartbeat_addr()).await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(400), second.next_line()).await;
    assert!(waiting.is_err(), "second client was served past the limit");
    assert_eq!(clients.len().await, 1);

    drop(first);
    let line = tokio::time::timeout(WAIT, second.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(line, "{}");
    assert_eq!(clients.len().await, 1);

    server.shutdown().await;
}
