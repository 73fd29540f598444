//! Fake cycle counter for testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pal::CycleCounter;

/// Fake cycle counter whose value is controlled by the test.
///
/// Multiple clones of the same `FakeClock` share the same underlying counter, allowing
/// tests to move time forward after the clock has been handed to a profiler.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeClock {
    now: Arc<AtomicU64>,
}

impl FakeClock {
    /// Creates a new fake clock reading zero.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sets the value returned by subsequent reads.
    pub(crate) fn set(&self, cycles: u64) {
        self.now.store(cycles, Ordering::Relaxed);
    }

    /// Moves the clock forward by `cycles`.
    pub(crate) fn advance(&self, cycles: u64) {
        self.now.fetch_add(cycles, Ordering::Relaxed);
    }
}

impl CycleCounter for FakeClock {
    fn cycles(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn initializes_with_zero() {
        assert_eq!(FakeClock::new().cycles(), 0);
    }

    #[test]
    fn set_and_advance() {
        let clock = FakeClock::new();

        clock.set(100);
        assert_eq!(clock.cycles(), 100);

        clock.advance(25);
        assert_eq!(clock.cycles(), 125);
    }

    #[test]
    fn shared_state_between_clones() {
        let clock1 = FakeClock::new();
        let clock2 = clock1.clone();

        clock1.set(42);
        assert_eq!(clock2.cycles(), 42);
    }
}
