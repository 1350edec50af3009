//! Wiring of the Matrix sync task into the service lifecycle

mod fixtures;

use std::sync::Arc;

use tokio::sync::watch;

use fixtures::FakeHomeserver;
use lokiunimore::application::LokiBot;
use lokiunimore::bootstrap::spawn_sync;
use lokiunimore::{ExtendedClient, MatrixError, MemoryStore};

fn bot() -> LokiBot {
    LokiBot::new(Arc::new(MemoryStore::new()), "https://loki.example.org", None)
}

#[tokio::test]
async fn test_sync_failure_triggers_shutdown() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = ExtendedClient::new(hs.client_config(dir.path())).unwrap();
    client.restore_login("stale").await;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let task = spawn_sync(Arc::new(client), bot(), shutdown_tx.clone());

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, MatrixError::Request(ref e) if e.status == 401));

    // the web server waits on this receiver
    assert!(shutdown_rx.has_changed().unwrap());
    assert!(*shutdown_rx.borrow_and_update());
}

#[tokio::test]
async fn test_sync_stops_cleanly_on_shutdown() {
    let hs = FakeHomeserver::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = hs.logged_in_client(dir.path()).await;

    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let task = spawn_sync(Arc::new(client), bot(), shutdown_tx.clone());

    assert!(fixtures::eventually(|| !hs.state.syncs.lock().unwrap().is_empty()).await);
    shutdown_tx.send(true).unwrap();

    task.await.unwrap().unwrap();
}
