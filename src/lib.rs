// ============================================================================
// heapwatch Library
// ============================================================================

//! In-process heap watcher with bounded snapshot retention.
//!
//! `heapwatch` runs a small background loop inside the embedding
//! process: every interval it evaluates a trigger condition (the
//! built-in one compares the allocator's live heap against a byte
//! limit) and, when the condition fires, captures an opaque resource
//! snapshot into a directory, keeping at most a configured number of
//! files. An axum router exposes start/stop/list/fetch-latest for
//! out-of-band control.
//!
//! # Examples
//!
//! ```no_run
//! use heapwatch::{Watcher, WatcherConfig, condition};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> heapwatch::Result<()> {
//! let config = WatcherConfig::new("./profiles")
//!     .interval(Duration::from_secs(1))
//!     .max_records(3)
//!     .check(condition::threshold(64 * 1024 * 1024, current_rss))
//!     .capture_with(|| Ok(b"...".to_vec()));
//! let watcher = Arc::new(Watcher::new(config)?);
//!
//! tokio::spawn({
//!     let watcher = watcher.clone();
//!     async move { watcher.run().await }
//! });
//!
//! // Serve the control surface next to the rest of the app:
//! let app = heapwatch::web::router(watcher);
//! # Ok(())
//! # }
//! # fn current_rss() -> u64 { 0 }
//! ```

pub mod core;
pub mod store;
pub mod watcher;
pub mod web;

// Re-export main types for convenience
pub use crate::core::{Result, WatchError};
pub use store::SnapshotStore;
pub use watcher::capture::{self, CaptureFn};
pub use watcher::condition::{self, CheckFn};
pub use watcher::{ErrorSink, WatchView, Watcher, WatcherConfig};
