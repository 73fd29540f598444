//! Platform abstraction trait definitions.

use std::fmt::Debug;

/// Source of the monotonic, low-overhead cycle counts that timestamp every sample.
///
/// The counter is read once at every start, mark and end, so implementations should be
/// a handful of instructions at most. The unit is arbitrary - exported timestamps are only
/// converted to milliseconds when the profiler knows the counter frequency.
///
/// The default implementation is [`TimestampCounter`](crate::TimestampCounter).
#[cfg_attr(test, mockall::automock)]
pub trait CycleCounter: Debug + Send + Sync + 'static {
    /// Reads the current value of the counter.
    fn cycles(&self) -> u64;
}
