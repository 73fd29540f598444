use std::borrow::Cow;
use std::cell::RefCell;
use std::io::Write;
use std::num::NonZero;

use tracing::debug;

use crate::callsite::next_owner;
use crate::export::write_fragment;
use crate::pal::ClockFacade;
use crate::registry::Registry;
use crate::tree::SampleTree;
use crate::{
    Callsite, CounterModel, Error, Local, ProfilerBuilder, RecordId, RecordInfo, Result, Sample,
    SampleIndex, Shared, SharedTotals, SpanGuard, Totals,
};

/// Instrumentation context that owns the record registry and the sample buffer.
///
/// All capture operations go through a profiler: there is no hidden global state. A
/// profiler is single-threaded - it can be moved to another thread but not shared. Use one
/// profiler per thread and the [`Shared`] counter model if totals need to be merged.
///
/// # Examples
///
/// ```
/// use cycle_trace::Profiler;
///
/// # fn main() -> cycle_trace::Result<()> {
/// let profiler = Profiler::new();
///
/// let frame = profiler.register("frame", file!(), line!())?;
/// let draw = profiler.register("draw", file!(), line!())?;
///
/// profiler.start(frame)?;
/// profiler.start(draw)?;
/// assert_eq!(profiler.end(), draw);
/// assert_eq!(profiler.end(), frame);
///
/// assert_eq!(profiler.totals(frame).unwrap().hits(), 1);
///
/// let mut trace = Vec::new();
/// profiler.export(&mut trace, true)?;
/// assert_eq!(profiler.sample_count(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Profiler<M: CounterModel = Local> {
    clock: ClockFacade,

    /// Cycle counter ticks per second, used to convert exported timestamps to milliseconds.
    frequency: Option<NonZero<u64>>,

    registry: RefCell<Registry<M>>,
    tree: RefCell<SampleTree>,
}

impl Profiler<Local> {
    /// Creates a profiler that reads the hardware timestamp counter, exports raw cycle
    /// counts and uses non-atomic aggregate counters.
    ///
    /// Use [`builder()`](Self::builder) to configure it differently.
    #[expect(
        clippy::new_without_default,
        reason = "a profiler is a context object, not a value with a meaningful default"
    )]
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a new profiler.
    #[must_use]
    pub fn builder() -> ProfilerBuilder<Local> {
        ProfilerBuilder::new()
    }
}

impl<M: CounterModel> Profiler<M> {
    pub(crate) fn from_parts(clock: ClockFacade, frequency: Option<NonZero<u64>>) -> Self {
        Self {
            clock,
            frequency,
            registry: RefCell::new(Registry::new(next_owner())),
            tree: RefCell::new(SampleTree::new()),
        }
    }

    /// Registers a new record and returns its id.
    ///
    /// Every call creates a new record, even for an identity that is already registered.
    /// For instrumentation inside loops or frequently called functions, register once and
    /// keep the id, or use a [`Callsite`] (see [`register_callsite()`][1]) which remembers
    /// its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record table cannot grow.
    ///
    /// [1]: Self::register_callsite
    pub fn register(
        &self,
        name: impl Into<Cow<'static, str>>,
        file: impl Into<Cow<'static, str>>,
        line: u32,
    ) -> Result<RecordId> {
        self.registry
            .borrow_mut()
            .register(name.into(), file.into(), line)
    }

    /// Resolves a static call site to its record, registering it the first time.
    ///
    /// Repeated calls with the same call site return the same id without touching the
    /// record table.
    ///
    /// # Errors
    ///
    /// Returns an error if the call site is new and the record table cannot grow.
    #[inline]
    pub fn register_callsite(&self, site: &'static Callsite) -> Result<RecordId> {
        self.registry.borrow_mut().resolve(site)
    }

    /// Opens a span for `record` nested under the currently open span, if any.
    ///
    /// The span stays open until [`end()`](Self::end) is called. Spans must be closed in
    /// reverse order of opening.
    ///
    /// # Errors
    ///
    /// Returns an error if the record was not registered with this profiler or if the
    /// sample buffer cannot grow.
    #[inline]
    pub fn start(&self, record: RecordId) -> Result<SampleIndex> {
        let now = self.clock.cycles();

        self.ensure_registered(record)?;
        self.tree.borrow_mut().open(record, now)
    }

    /// Records an instantaneous mark for `record` under the currently open span, if any.
    ///
    /// Marks never become parents and do not contribute to any record's totals.
    ///
    /// # Errors
    ///
    /// Returns an error if the record was not registered with this profiler or if the
    /// sample buffer cannot grow.
    #[inline]
    pub fn mark(&self, record: RecordId) -> Result<SampleIndex> {
        let now = self.clock.cycles();

        self.ensure_registered(record)?;
        self.tree.borrow_mut().mark(record, now)
    }

    /// Closes the most recently opened span that is still open, counting one hit.
    ///
    /// Returns the record of the closed span so the caller can check that starts and ends
    /// are paired as intended.
    ///
    /// # Panics
    ///
    /// Panics if no span is open. This always indicates mismatched start and end calls.
    #[inline]
    pub fn end(&self) -> RecordId {
        self.end_n(1)
    }

    /// Closes the most recently opened span that is still open, counting `hits` hits.
    ///
    /// Use a hit count above one when a single span covers a batch of iterations.
    ///
    /// # Panics
    ///
    /// Panics if no span is open. This always indicates mismatched start and end calls.
    #[inline]
    pub fn end_n(&self, hits: u32) -> RecordId {
        match self.try_end_n(hits) {
            Ok(record) => record,
            Err(error) => panic!("{error}"),
        }
    }

    /// Closes the most recently opened span that is still open, counting `hits` hits.
    ///
    /// The elapsed cycles and the hit count are folded into the record's totals. If the
    /// closed span was a root, no span is open afterwards; otherwise its parent becomes
    /// the open span again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOpenSpan`] if no span is open.
    #[inline]
    pub fn try_end_n(&self, hits: u32) -> Result<RecordId> {
        let now = self.clock.cycles();

        let closed = self.tree.borrow_mut().close(now)?;

        self.registry
            .borrow()
            .fold(closed.record, closed.elapsed_cycles, hits);

        Ok(closed.record)
    }

    /// Opens a span that is closed (with one hit) when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`start()`](Self::start).
    pub fn scope(&self, record: RecordId) -> Result<SpanGuard<'_, M>> {
        self.scope_n(record, 1)
    }

    /// Opens a span that is closed with `hits` hits when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`start()`](Self::start).
    pub fn scope_n(&self, record: RecordId, hits: u32) -> Result<SpanGuard<'_, M>> {
        self.start(record)?;
        Ok(SpanGuard::new(self, record, hits))
    }

    /// Current totals of a record, without resetting them.
    ///
    /// Returns `None` if the record is not registered with this profiler.
    #[must_use]
    pub fn totals(&self, record: RecordId) -> Option<Totals> {
        self.registry.borrow().totals(record)
    }

    /// Current totals of a record, resetting them to zero.
    ///
    /// Returns `None` if the record is not registered with this profiler.
    pub fn take_totals(&self, record: RecordId) -> Option<Totals> {
        self.registry.borrow().take_totals(record)
    }

    /// Identity and current totals of a record.
    #[must_use]
    pub fn record(&self, record: RecordId) -> Option<RecordInfo> {
        self.registry.borrow().info(record)
    }

    /// Identity and current totals of every registered record, in registration order.
    #[must_use]
    pub fn records(&self) -> Vec<(RecordId, RecordInfo)> {
        self.registry.borrow().infos()
    }

    /// Number of registered records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// The sample at `index`, if it has been captured since the last export.
    #[must_use]
    pub fn sample(&self, index: SampleIndex) -> Option<Sample> {
        self.tree.borrow().get(index).copied()
    }

    /// Number of samples captured since the last export.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.tree.borrow().len()
    }

    /// Index of the deepest open span, if any span is open.
    #[must_use]
    pub fn open_sample(&self) -> Option<SampleIndex> {
        self.tree.borrow().cursor()
    }

    /// Record of the deepest open span, if any span is open.
    #[must_use]
    pub fn open_record(&self) -> Option<RecordId> {
        let tree = self.tree.borrow();

        tree.cursor()
            .and_then(|index| tree.get(index))
            .map(Sample::record)
    }

    /// Cycle counter frequency used to convert exported timestamps, if configured.
    #[must_use]
    pub fn frequency_hz(&self) -> Option<NonZero<u64>> {
        self.frequency
    }

    /// Writes every completed sample to `out` as a fragment of a JSON array of trace
    /// events, then truncates the sample buffer.
    ///
    /// Spans that are still open are not written. They stay in the buffer (renumbered from
    /// zero, still nested in each other) and are written by the first export after they
    /// close. Everything else is removed, so a span that stays open across many exports
    /// does not keep the buffer growing.
    ///
    /// Events are separated by commas. When `is_first_chunk` is `false` and there is
    /// anything to write, the fragment starts with a comma so that consecutive fragments
    /// concatenate into one array. The caller writes the surrounding brackets; see
    /// [`TraceWriter`](crate::TraceWriter) for a helper that does this.
    ///
    /// Returns the number of events written. An empty buffer writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error if writing fails. The buffer is left
    /// untouched on error.
    pub fn export(&self, out: impl Write, is_first_chunk: bool) -> Result<usize> {
        let mut tree = self.tree.borrow_mut();

        let written = write_fragment(
            &tree,
            &self.registry.borrow(),
            self.frequency,
            out,
            is_first_chunk,
        )?;

        tree.retain_open();

        debug!(
            events = written,
            still_open = tree.len(),
            is_first_chunk,
            "exported trace fragment"
        );

        Ok(written)
    }

    /// Lists every pair of records that share the same name, file and line.
    ///
    /// Registration never checks for duplicates, so two distinct call sites declared on
    /// the same line with the same name end up as separate records. This scan is
    /// quadratic in the number of records and intended for debug checks.
    #[must_use]
    pub fn duplicate_records(&self) -> Vec<(RecordId, RecordId)> {
        self.registry.borrow().duplicates()
    }

    /// Whether every record has a unique name, file and line.
    ///
    /// Quadratic in the number of records.
    #[must_use]
    pub fn has_unique_records(&self) -> bool {
        self.duplicate_records().is_empty()
    }

    fn ensure_registered(&self, record: RecordId) -> Result<()> {
        if self.registry.borrow().contains(record) {
            Ok(())
        } else {
            Err(Error::UnknownRecord {
                record: record.get(),
            })
        }
    }
}

impl Profiler<Shared> {
    /// Handle to the aggregate word of a record, usable from any thread.
    ///
    /// Returns `None` if the record is not registered with this profiler.
    #[must_use]
    pub fn shared_totals(&self, record: RecordId) -> Option<SharedTotals> {
        self.registry.borrow().word(record).cloned()
    }

    /// Makes `record` fold its totals into `totals`, which typically belongs to a record
    /// of a profiler on another thread.
    ///
    /// Totals accumulated by the record before binding stay in its previous word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRecord`] if the record is not registered with this profiler.
    pub fn bind_totals(&self, record: RecordId, totals: &SharedTotals) -> Result<()> {
        self.registry
            .borrow_mut()
            .replace_word(record, totals.clone())
    }
}
