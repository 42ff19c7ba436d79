//! Snapshot acquisition.

use crate::core::Result;

/// Produces one opaque snapshot of current process resource state.
pub type CaptureFn = Box<dyn FnMut() -> Result<Vec<u8>> + Send>;

/// Capture source that serializes the allocator's statistics report.
///
/// The report is jemalloc's full textual stats dump: a point-in-time
/// view of arenas, bins and live allocations.
#[cfg(feature = "jemalloc")]
pub fn stats_report() -> CaptureFn {
    use crate::core::WatchError;
    use jemalloc_ctl::stats_print::{self, Options};

    Box::new(|| {
        let mut buf = Vec::new();
        stats_print::stats_print(&mut buf, Options::default())
            .map_err(|e| WatchError::Capture(format!("Failed to dump allocator stats: {}", e)))?;
        Ok(buf)
    })
}
