//! Hardware timestamp counter.

use crate::pal::CycleCounter;

/// Reads the processor's own cycle counter.
///
/// * On x86_64 this is the time stamp counter (`rdtsc`).
/// * On aarch64 this is the virtual counter (`cntvct_el0`).
/// * Elsewhere (and under Miri) this falls back to nanoseconds elapsed since the first read,
///   derived from [`Instant`](std::time::Instant).
#[derive(Clone, Copy, Debug, Default)]
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
pub struct TimestampCounter;

impl CycleCounter for TimestampCounter {
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Real hardware values cannot be asserted on exactly.
    fn cycles(&self) -> u64 {
        read()
    }
}

#[cfg(all(target_arch = "x86_64", not(miri)))]
#[inline(always)]
#[allow(
    unused_unsafe,
    reason = "the intrinsic is only an unsafe fn on some toolchain versions"
)]
fn read() -> u64 {
    // SAFETY: rdtsc has no preconditions and only reads a processor register.
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
}

#[cfg(all(target_arch = "aarch64", not(miri)))]
#[inline(always)]
fn read() -> u64 {
    let value: u64;

    // SAFETY: reading the virtual counter register has no side effects and is permitted
    // from user mode on all mainstream aarch64 operating systems.
    unsafe {
        core::arch::asm!("mrs {}, cntvct_el0", out(reg) value, options(nomem, nostack));
    }

    value
}

#[cfg(any(miri, not(any(target_arch = "x86_64", target_arch = "aarch64"))))]
fn read() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();

    let epoch = EPOCH.get_or_init(Instant::now);

    // u64 nanoseconds covers several centuries of uptime.
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot read the real hardware counter.
    fn counter_does_not_go_backwards() {
        let counter = TimestampCounter;

        let first = counter.cycles();
        let second = counter.cycles();

        assert!(second >= first, "counter went from {first} back to {second}");
    }
}
