//! Trigger predicates evaluated once per watcher tick.

use crate::watcher::WatchView;

/// Decides on each tick whether a capture should happen now.
///
/// Evaluators must not block and must not panic; any internal fault is
/// treated as "do not trigger".
pub type CheckFn = Box<dyn FnMut(&WatchView<'_>) -> bool + Send>;

/// Predicate that triggers while `reader` reports a value above `limit`.
///
/// `reader` can be any gauge of the embedding process: resident set
/// size, thread count, queue depth.
pub fn threshold<R>(limit: u64, mut reader: R) -> CheckFn
where
    R: FnMut() -> u64 + Send + 'static,
{
    Box::new(move |_| reader() > limit)
}

/// Predicate that triggers while the allocator's live heap exceeds
/// `limit` bytes.
///
/// The jemalloc control MIBs are resolved once here and reused on every
/// tick. A failed stats read evaluates to false.
#[cfg(feature = "jemalloc")]
pub fn memory_limit(limit: u64) -> CheckFn {
    use jemalloc_ctl::{epoch, stats};

    let (epoch_mib, allocated_mib) = match (epoch::mib(), stats::allocated::mib()) {
        (Ok(epoch_mib), Ok(allocated_mib)) => (epoch_mib, allocated_mib),
        _ => {
            tracing::warn!("jemalloc stats unavailable, memory_limit will never trigger");
            return Box::new(|_| false);
        }
    };

    Box::new(move |_| {
        // stats.allocated is cached; advancing the epoch refreshes it.
        if epoch_mib.advance().is_err() {
            return false;
        }
        match allocated_mib.read() {
            Ok(allocated) => allocated as u64 > limit,
            Err(_) => false,
        }
    })
}
