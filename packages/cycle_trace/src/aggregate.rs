//! Per-record aggregate counters.
//!
//! Each record keeps its hit count and cycle count packed into a single 64-bit word:
//! the top 32 bits hold hits, the bottom 32 bits hold cycles. Packing lets both halves
//! be updated with one addition, which becomes a single atomic instruction when the
//! [`Shared`] counter model is selected.
//!
//! Both halves wrap at 2^32. A cycle total that overflows its half carries into the hit
//! count. Read the totals often enough that this does not happen.

use std::cell::Cell;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64};

use crate::Sealed;

const CYCLES_MASK: u64 = 0xFFFF_FFFF;
const HITS_SHIFT: u32 = 32;

/// Relaxed ordering is enough here: the counters carry no happens-before relationship
/// with any other data, readers only need some recent value of each word.
const SHARED_COUNTER_ORDERING: atomic::Ordering = atomic::Ordering::Relaxed;

/// Packs a hit count and an elapsed cycle count into one aggregate delta.
///
/// Only the low 32 bits of `elapsed_cycles` are kept.
#[must_use]
#[inline]
pub(crate) fn pack(hits: u32, elapsed_cycles: u64) -> u64 {
    (u64::from(hits) << HITS_SHIFT) | (elapsed_cycles & CYCLES_MASK)
}

/// Accumulated hit count and cycle count of a record.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Totals {
    hits: u32,
    cycles: u32,
}

impl Totals {
    #[must_use]
    pub(crate) fn from_packed(word: u64) -> Self {
        Self {
            hits: u32::try_from(word >> HITS_SHIFT).expect("shifted value fits in 32 bits"),
            cycles: u32::try_from(word & CYCLES_MASK).expect("masked value fits in 32 bits"),
        }
    }

    /// Number of hits folded into the record.
    ///
    /// Each closed span contributes the hit count passed to `end_n()` (1 for `end()`).
    #[must_use]
    pub fn hits(&self) -> u32 {
        self.hits
    }

    /// Number of cycles folded into the record, wrapping at 2^32.
    #[must_use]
    pub fn cycles(&self) -> u32 {
        self.cycles
    }
}

/// Determines how the aggregate word of each record is updated.
///
/// This is a type-level choice made when building the profiler:
///
/// * [`Local`] (the default) uses plain non-atomic additions.
/// * [`Shared`] uses atomic additions on a word that can be handed to other threads
///   and bound to records of other profilers, merging their totals.
pub trait CounterModel: Sealed + Debug + 'static {
    /// Storage for one packed aggregate word.
    type Word: Debug + Default;

    /// Adds a packed delta to the word, wrapping on overflow.
    fn add(word: &Self::Word, delta: u64);

    /// Reads the current value of the word.
    fn load(word: &Self::Word) -> u64;

    /// Reads the current value of the word and resets it to zero.
    fn take(word: &Self::Word) -> u64;
}

/// Counter model that updates aggregates with plain, non-atomic additions.
///
/// This is the cheapest model and the default.
#[derive(Debug)]
pub enum Local {}

impl Sealed for Local {}

impl CounterModel for Local {
    type Word = Cell<u64>;

    #[inline]
    fn add(word: &Self::Word, delta: u64) {
        word.set(word.get().wrapping_add(delta));
    }

    fn load(word: &Self::Word) -> u64 {
        word.get()
    }

    fn take(word: &Self::Word) -> u64 {
        word.replace(0)
    }
}

/// Counter model that updates aggregates with atomic additions on words that may be
/// shared between profilers living on different threads.
///
/// Use [`Profiler::shared_totals()`][1] to obtain a record's word and
/// [`Profiler::bind_totals()`][2] to make a record of another profiler fold into it.
///
/// [1]: crate::Profiler::shared_totals
/// [2]: crate::Profiler::bind_totals
#[derive(Debug)]
pub enum Shared {}

impl Sealed for Shared {}

impl CounterModel for Shared {
    type Word = SharedTotals;

    #[inline]
    fn add(word: &Self::Word, delta: u64) {
        word.word.fetch_add(delta, SHARED_COUNTER_ORDERING);
    }

    fn load(word: &Self::Word) -> u64 {
        word.word.load(SHARED_COUNTER_ORDERING)
    }

    fn take(word: &Self::Word) -> u64 {
        word.word.swap(0, SHARED_COUNTER_ORDERING)
    }
}

/// Thread-safe handle to the aggregate word of a record using the [`Shared`] counter model.
///
/// Clones refer to the same word.
///
/// # Examples
///
/// ```
/// use cycle_trace::Profiler;
///
/// let profiler = Profiler::builder().shared_counters().build();
/// let record = profiler.register("parse", file!(), line!()).unwrap();
///
/// let totals = profiler.shared_totals(record).unwrap();
///
/// profiler.start(record).unwrap();
/// profiler.end();
///
/// std::thread::spawn(move || assert_eq!(totals.read().hits(), 1))
///     .join()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct SharedTotals {
    word: Arc<AtomicU64>,
}

impl SharedTotals {
    /// Reads the current totals without resetting them.
    #[must_use]
    pub fn read(&self) -> Totals {
        Totals::from_packed(Shared::load(self))
    }

    /// Reads the current totals and resets them to zero.
    #[must_use]
    pub fn take(&self) -> Totals {
        Totals::from_packed(Shared::take(self))
    }

    /// Whether two handles refer to the same aggregate word.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.word, &other.word)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SharedTotals: Send, Sync);
    assert_impl_all!(Totals: Send, Sync, Copy);
    assert_not_impl_any!(Cell<u64>: Sync);

    #[test]
    fn pack_places_hits_in_high_half() {
        assert_eq!(pack(3, 10), (3 << 32) | 10);
    }

    #[test]
    fn pack_truncates_cycles_to_low_half() {
        assert_eq!(pack(0, 0x1_0000_0005), 5);
    }

    #[test]
    fn single_fold_reads_back_exactly() {
        let word = Cell::new(0);

        Local::add(&word, pack(4, 1234));

        let totals = Totals::from_packed(Local::load(&word));
        assert_eq!(totals.hits(), 4);
        assert_eq!(totals.cycles(), 1234);
    }

    #[test]
    fn local_folds_accumulate() {
        let word = Cell::new(0);

        Local::add(&word, pack(1, 100));
        Local::add(&word, pack(2, 50));

        assert_eq!(Totals::from_packed(Local::load(&word)), Totals {
            hits: 3,
            cycles: 150
        });
    }

    #[test]
    fn load_does_not_clear() {
        let word = Cell::new(0);
        Local::add(&word, pack(1, 1));

        _ = Local::load(&word);

        assert_eq!(Local::load(&word), pack(1, 1));
    }

    #[test]
    fn take_clears() {
        let word = Cell::new(0);
        Local::add(&word, pack(1, 9));

        assert_eq!(Local::take(&word), pack(1, 9));
        assert_eq!(Local::load(&word), 0);
    }

    #[test]
    fn hits_wrap_at_32_bits() {
        let word = Cell::new(0);

        Local::add(&word, pack(u32::MAX, 0));
        Local::add(&word, pack(2, 0));

        assert_eq!(Totals::from_packed(Local::load(&word)).hits(), 1);
    }

    #[test]
    fn cycle_overflow_carries_into_hits() {
        let word = Cell::new(0);

        Local::add(&word, pack(0, u64::from(u32::MAX)));
        Local::add(&word, pack(0, 1));

        let totals = Totals::from_packed(Local::load(&word));
        assert_eq!(totals.hits(), 1);
        assert_eq!(totals.cycles(), 0);
    }

    #[test]
    fn shared_folds_from_many_threads() {
        let totals = SharedTotals::default();

        thread::scope(|s| {
            for _ in 0..4 {
                let totals = totals.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        Shared::add(&totals, pack(1, 2));
                    }
                });
            }
        });

        let result = totals.read();
        assert_eq!(result.hits(), 4000);
        assert_eq!(result.cycles(), 8000);
    }

    #[test]
    fn shared_take_clears_all_clones() {
        let totals = SharedTotals::default();
        let clone = totals.clone();

        Shared::add(&totals, pack(1, 5));

        assert_eq!(clone.take().cycles(), 5);
        assert_eq!(totals.read(), Totals::default());
        assert!(totals.ptr_eq(&clone));
    }
}
