//! The trigger-capture-retain engine.
//!
//! A [`Watcher`] runs one background loop: every interval it evaluates a
//! trigger predicate and, when the predicate fires, captures a snapshot
//! into the configured [`SnapshotStore`], evicting the oldest files
//! beyond the retention bound.

pub mod capture;
pub mod condition;

use crate::core::{Result, WatchError};
use crate::store::SnapshotStore;
use capture::CaptureFn;
use condition::CheckFn;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};

/// Read-only view of the running watcher, passed to trigger predicates.
pub struct WatchView<'a> {
    /// Snapshots captured by the current loop instance.
    pub captured: u64,
    /// Configured retention bound.
    pub max_records: usize,
    /// Snapshot store root.
    pub directory: &'a Path,
}

/// Sink for non-fatal loop errors.
pub type ErrorSink = Box<dyn Fn(&WatchError) + Send + Sync>;

/// Watcher configuration.
///
/// # Examples
///
/// ```no_run
/// use heapwatch::{Watcher, WatcherConfig, condition};
/// use std::time::Duration;
///
/// # fn main() -> heapwatch::Result<()> {
/// let config = WatcherConfig::new("./profiles")
///     .interval(Duration::from_secs(1))
///     .max_records(3)
///     .check(condition::threshold(512 * 1024 * 1024, || 0))
///     .capture_with(|| Ok(b"snapshot".to_vec()));
/// let watcher = Watcher::new(config)?;
/// # Ok(())
/// # }
/// ```
pub struct WatcherConfig {
    interval: Duration,
    directory: PathBuf,
    check: Option<CheckFn>,
    capture: Option<CaptureFn>,
    error_sink: Option<ErrorSink>,
    max_records: usize,
}

impl WatcherConfig {
    /// Creates a configuration writing snapshots under `directory`.
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            interval: Duration::from_secs(30),
            directory: directory.into(),
            check: None,
            capture: None,
            error_sink: None,
            max_records: 10,
        }
    }

    /// Sets the time between condition checks. Must be non-zero.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the retained-snapshot upper bound.
    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Sets the trigger predicate evaluated once per tick.
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: FnMut(&WatchView<'_>) -> bool + Send + 'static,
    {
        self.check = Some(Box::new(check));
        self
    }

    /// Sets the snapshot acquisition function.
    ///
    /// With the `jemalloc` feature enabled this defaults to
    /// [`capture::stats_report`].
    pub fn capture_with<F>(mut self, capture: F) -> Self
    where
        F: FnMut() -> Result<Vec<u8>> + Send + 'static,
    {
        self.capture = Some(Box::new(capture));
        self
    }

    /// Sets a sink for non-fatal loop errors (capture and sweep
    /// failures). The loop never stops on a reported error.
    pub fn on_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.error_sink = Some(Box::new(sink));
        self
    }
}

/// Trigger and capture closures, used only inside the sequential tick
/// body of the single active loop.
struct Hooks {
    check: CheckFn,
    capture: CaptureFn,
}

/// Run token of the active loop, if any.
///
/// `generation` identifies which loop instance owns `stop_tx`: a loop
/// that lost a start/stop race must not clear a successor's token.
#[derive(Default)]
struct Lifecycle {
    stop_tx: Option<oneshot::Sender<()>>,
    generation: u64,
}

/// The capture-retain engine.
///
/// At most one loop instance is active per watcher. Starting while
/// already running is a no-op, as is stopping while idle; both are safe
/// to call from concurrent tasks.
pub struct Watcher {
    interval: Duration,
    max_records: usize,
    store: SnapshotStore,
    hooks: Mutex<Hooks>,
    error_sink: Option<ErrorSink>,
    lifecycle: Mutex<Lifecycle>,
    captured: AtomicU64,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("interval", &self.interval)
            .field("max_records", &self.max_records)
            .field("captured", &self.captured.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Validates `config` and builds the engine. The loop is not
    /// started; see [`run`](Self::run).
    pub fn new(config: WatcherConfig) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(WatchError::InvalidConfig(
                "interval must be greater than zero".to_string(),
            ));
        }
        let Some(check) = config.check else {
            return Err(WatchError::InvalidConfig(
                "a trigger condition is required".to_string(),
            ));
        };
        let capture = match config.capture {
            Some(capture) => capture,
            None => default_capture()?,
        };
        Ok(Self {
            interval: config.interval,
            max_records: config.max_records,
            store: SnapshotStore::new(config.directory),
            hooks: Mutex::new(Hooks { check, capture }),
            error_sink: config.error_sink,
            lifecycle: Mutex::new(Lifecycle::default()),
            captured: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Whether a loop instance is currently active.
    pub fn is_running(&self) -> bool {
        self.lifecycle_state().stop_tx.is_some()
    }

    /// Snapshots captured by the current loop instance.
    ///
    /// Reset to zero on every (re)start; not a proxy for on-disk file
    /// count.
    pub fn captured_count(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Runs the loop until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the loop until `shutdown` completes or [`stop`](Self::stop)
    /// is called, whichever happens first.
    ///
    /// Returns immediately with `Ok(())` when a loop is already active.
    /// Fails only when the snapshot directory cannot be created; every
    /// steady-state fault is reported through the error sink and the
    /// loop keeps running.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (generation, mut stop_rx) = {
            let mut lifecycle = self.lifecycle_state();
            if lifecycle.stop_tx.is_some() {
                return Ok(());
            }
            self.store.ensure_root()?;
            let (stop_tx, stop_rx) = oneshot::channel();
            lifecycle.stop_tx = Some(stop_tx);
            lifecycle.generation += 1;
            (lifecycle.generation, stop_rx)
        };
        self.captured.store(0, Ordering::Relaxed);
        tracing::debug!(
            directory = %self.store.root().display(),
            interval = ?self.interval,
            "watcher loop started"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // A tokio interval's first tick completes immediately; consume
        // it so the first condition check happens one full interval in.
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = &mut stop_rx => break,
                _ = ticker.tick() => self.tick(),
            }
        }

        let mut lifecycle = self.lifecycle_state();
        if lifecycle.generation == generation {
            lifecycle.stop_tx = None;
        }
        tracing::debug!("watcher loop stopped");
        Ok(())
    }

    /// Signals the active loop to exit. No-op when idle; idempotent.
    pub fn stop(&self) {
        let stop_tx = self.lifecycle_state().stop_tx.take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
    }

    /// One iteration: evaluate the condition, capture on trigger, sweep
    /// past the retention bound. Never fails the loop.
    fn tick(&self) {
        // A closure panic on an earlier tick poisons this lock; keep
        // evaluating, loop faults are never fatal.
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let view = WatchView {
            captured: self.captured.load(Ordering::Relaxed),
            max_records: self.max_records,
            directory: self.store.root(),
        };
        if !(hooks.check)(&view) {
            return;
        }

        let bytes = match (hooks.capture)() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.report(&err);
                return;
            }
        };
        let name = match self.store.create(&bytes) {
            Ok(name) => name,
            Err(err) => {
                self.report(&err);
                return;
            }
        };
        let captured = self.captured.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(snapshot = %name, captured, "captured snapshot");

        if captured > self.max_records as u64 {
            match self.store.retain_newest(self.max_records) {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "retention sweep evicted old snapshots");
                }
                Ok(_) => {}
                Err(err) => self.report(&err),
            }
        }
    }

    pub(crate) fn report(&self, err: &WatchError) {
        tracing::warn!(error = %err, "watcher error");
        if let Some(sink) = &self.error_sink {
            sink(err);
        }
    }

    fn lifecycle_state(&self) -> MutexGuard<'_, Lifecycle> {
        // No user code runs under this lock; recover rather than wedge
        // start/stop.
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "jemalloc")]
fn default_capture() -> Result<CaptureFn> {
    Ok(capture::stats_report())
}

#[cfg(not(feature = "jemalloc"))]
fn default_capture() -> Result<CaptureFn> {
    Err(WatchError::InvalidConfig(
        "a capture function is required (enable the `jemalloc` feature for the built-in one)"
            .to_string(),
    ))
}
