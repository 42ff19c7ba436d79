/// Capture-retain loop tests
///
/// Exercises the trigger-capture-retain engine end to end against a
/// temporary snapshot directory.
/// Run with: cargo test --test watcher_loop_tests
use heapwatch::{WatchError, Watcher, WatcherConfig, condition};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

fn counting_capture(
    counter: Arc<AtomicU64>,
) -> impl FnMut() -> heapwatch::Result<Vec<u8>> + Send + 'static {
    move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("snapshot {}", n).into_bytes())
    }
}

fn spawn_run(watcher: &Arc<Watcher>) -> JoinHandle<heapwatch::Result<()>> {
    let watcher = watcher.clone();
    tokio::spawn(async move { watcher.run().await })
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn test_no_capture_while_gauge_stays_below_limit() {
    let dir = TempDir::new().unwrap();
    // 1 MiB of usage against a 1 GiB limit.
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .max_records(3)
        .check(condition::threshold(1024 * 1024 * 1024, || 1024 * 1024))
        .capture_with(|| Ok(vec![0u8; 8]));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    watcher.stop();
    handle.await.unwrap().unwrap();

    assert!(watcher.store().list().unwrap().is_empty());
    assert_eq!(watcher.captured_count(), 0);
}

#[tokio::test]
async fn test_retention_keeps_only_newest_snapshots() {
    let dir = TempDir::new().unwrap();
    let captures = Arc::new(AtomicU64::new(0));
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .max_records(3)
        .check(condition::threshold(0, || 1))
        .capture_with(counting_capture(captures.clone()));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let handle = spawn_run(&watcher);
    assert!(
        wait_for(
            || captures.load(Ordering::SeqCst) >= 6,
            Duration::from_secs(5)
        )
        .await
    );
    watcher.stop();
    handle.await.unwrap().unwrap();

    let names = watcher.store().list().unwrap();
    assert_eq!(names.len(), 3);

    // Survivors are the three most recent captures.
    let total = captures.load(Ordering::SeqCst);
    let mut ids: Vec<u64> = names
        .iter()
        .map(|name| {
            let bytes = watcher.store().read(name).unwrap();
            String::from_utf8(bytes)
                .unwrap()
                .trim_start_matches("snapshot ")
                .parse()
                .unwrap()
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![total - 2, total - 1, total]);
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let dir = TempDir::new().unwrap();
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .check(condition::threshold(u64::MAX, || 0))
        .capture_with(|| Ok(Vec::new()));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);

    // A second start returns immediately instead of spawning a second
    // loop.
    watcher.run().await.unwrap();
    assert!(watcher.is_running());

    watcher.stop();
    handle.await.unwrap().unwrap();
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_stop_is_idempotent_and_safe_while_idle() {
    let dir = TempDir::new().unwrap();
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .check(condition::threshold(u64::MAX, || 0))
        .capture_with(|| Ok(Vec::new()));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    watcher.stop();
    watcher.stop();
    assert!(!watcher.is_running());

    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);
    watcher.stop();
    watcher.stop();
    handle.await.unwrap().unwrap();
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_capture_failure_keeps_loop_alive() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let capture_calls = calls.clone();
    let error_count = errors.clone();
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .max_records(10)
        .check(condition::threshold(0, || 1))
        .capture_with(move || {
            let n = capture_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                Err(WatchError::Capture("injected".to_string()))
            } else {
                Ok(b"ok".to_vec())
            }
        })
        .on_error(move |_| {
            error_count.fetch_add(1, Ordering::SeqCst);
        });
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let handle = spawn_run(&watcher);
    assert!(
        wait_for(
            || calls.load(Ordering::SeqCst) >= 3,
            Duration::from_secs(5)
        )
        .await
    );
    watcher.stop();
    handle.await.unwrap().unwrap();

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(!watcher.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_before_first_tick_captures_nothing() {
    let dir = TempDir::new().unwrap();
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(500))
        .check(condition::threshold(0, || 1))
        .capture_with(|| Ok(b"x".to_vec()));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);
    watcher.stop();
    handle.await.unwrap().unwrap();

    assert!(watcher.store().list().unwrap().is_empty());
    assert_eq!(watcher.captured_count(), 0);
}

#[tokio::test]
async fn test_restart_resets_captured_count() {
    let dir = TempDir::new().unwrap();
    let armed = Arc::new(AtomicBool::new(true));
    let trigger = armed.clone();
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .max_records(100)
        .check(move |_| trigger.load(Ordering::SeqCst))
        .capture_with(|| Ok(b"x".to_vec()));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.captured_count() >= 2, Duration::from_secs(5)).await);
    watcher.stop();
    handle.await.unwrap().unwrap();
    assert!(watcher.captured_count() >= 2);

    // Disarm the trigger; the restarted loop must begin from zero.
    armed.store(false, Ordering::SeqCst);
    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watcher.captured_count(), 0);
    watcher.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_until_observes_external_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = WatcherConfig::new(dir.path())
        .interval(Duration::from_millis(10))
        .check(condition::threshold(u64::MAX, || 0))
        .capture_with(|| Ok(Vec::new()));
    let watcher = Arc::new(Watcher::new(config).unwrap());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn({
        let watcher = watcher.clone();
        async move {
            watcher
                .run_until(async {
                    let _ = shutdown_rx.await;
                })
                .await
        }
    });
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!watcher.is_running());

    // The watcher is reusable after an external shutdown.
    let handle = spawn_run(&watcher);
    assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)).await);
    watcher.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_start_fails_when_directory_cannot_be_created() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("store");
    std::fs::write(&blocker, b"occupied").unwrap();

    let config = WatcherConfig::new(&blocker)
        .interval(Duration::from_millis(10))
        .check(condition::threshold(0, || 1))
        .capture_with(|| Ok(Vec::new()));
    let watcher = Watcher::new(config).unwrap();

    let err = watcher.run().await.unwrap_err();
    assert!(matches!(err, WatchError::Startup(_)));
    assert!(!watcher.is_running());
}
