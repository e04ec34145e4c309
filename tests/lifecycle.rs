//! Close handshake against a real store.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use timesheet_store::{
    CloseOutcome, HostWindow, ShutdownConfig, ShutdownCoordinator, ShutdownState, Store,
    StoreConfig,
};

#[derive(Default)]
struct RecordingWindow {
    events: Mutex<Vec<&'static str>>,
    notified: AtomicUsize,
}

impl HostWindow for RecordingWindow {
    fn notify_save_required(&self) {
        self.events.lock().push("save-required");
        self.notified.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.events.lock().push("destroy");
    }
}

fn open_slow_store(dir: &TempDir) -> Arc<Store> {
    // Debounce far beyond the test so only the final save can write.
    Arc::new(
        Store::open(StoreConfig {
            path: dir.path().join("data"),
            debounce: Duration::from_secs(60),
            ..Default::default()
        })
        .unwrap(),
    )
}

fn hours_on_disk(store: &Store) -> usize {
    let document: Value =
        serde_json::from_slice(&fs::read(store.document_path()).unwrap()).unwrap();
    document["uren"].as_array().map_or(0, Vec::len)
}

#[test]
fn test_acknowledged_close_persists_pending_edits() {
    let dir = TempDir::new().unwrap();
    let store = open_slow_store(&dir);
    store.create("uren", json!({"uren": 8})).unwrap();
    assert!(store.has_pending_save());
    assert_eq!(hours_on_disk(&store), 0);

    let coordinator = Arc::new(ShutdownCoordinator::new(
        Arc::clone(&store),
        ShutdownConfig {
            save_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(20),
        },
    ));
    let window = Arc::new(RecordingWindow::default());

    let handle = coordinator.spawn_close(Arc::clone(&window)).unwrap();
    while window.notified.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }

    // The interactive layer finishes its own edit before acknowledging.
    store.create("uren", json!({"uren": 4})).unwrap();
    coordinator.acknowledge_save();

    assert_eq!(handle.join().unwrap(), CloseOutcome::Saved);
    assert_eq!(hours_on_disk(&store), 2);
    assert!(!store.has_pending_save());
    assert_eq!(*window.events.lock(), vec!["save-required", "destroy"]);
    assert_eq!(coordinator.state(), ShutdownState::Idle);
}

#[test]
fn test_unacknowledged_close_is_bounded() {
    let dir = TempDir::new().unwrap();
    let store = open_slow_store(&dir);

    let coordinator = ShutdownCoordinator::new(
        Arc::clone(&store),
        ShutdownConfig {
            save_timeout: Duration::from_millis(150),
            settle_delay: Duration::from_millis(20),
        },
    );
    let window = RecordingWindow::default();

    let start = Instant::now();
    let outcome = coordinator.request_close(&window);
    let elapsed = start.elapsed();

    assert_eq!(outcome, CloseOutcome::TimedOut);
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(*window.events.lock(), vec!["save-required", "destroy"]);
}

#[test]
fn test_close_can_be_requested_again() {
    let dir = TempDir::new().unwrap();
    let store = open_slow_store(&dir);
    let coordinator = ShutdownCoordinator::new(
        Arc::clone(&store),
        ShutdownConfig {
            save_timeout: Duration::from_millis(30),
            settle_delay: Duration::ZERO,
        },
    );
    let window = RecordingWindow::default();

    assert_eq!(coordinator.request_close(&window), CloseOutcome::TimedOut);
    assert_eq!(coordinator.request_close(&window), CloseOutcome::TimedOut);
    assert_eq!(window.notified.load(Ordering::SeqCst), 2);
}
