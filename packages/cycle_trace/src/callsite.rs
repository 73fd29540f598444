use std::sync::atomic::{self, AtomicU32, AtomicU64};

use crate::RecordId;

/// Memo value meaning "not yet registered with any profiler".
const UNSET: u64 = 0;

const OWNER_SHIFT: u32 = 32;
const RECORD_MASK: u64 = 0xFFFF_FFFF;

/// The memo is written once and then only read. Relaxed is enough because the record id
/// is only ever interpreted by the owning profiler, which wrote it.
const MEMO_ORDERING: atomic::Ordering = atomic::Ordering::Relaxed;

/// Source of unique profiler identities used to tag call-site memos. Zero is reserved
/// for [`UNSET`].
static NEXT_OWNER: AtomicU32 = AtomicU32::new(1);

/// Allocates a new owner identity for a profiler.
///
/// # Panics
///
/// Panics if more than `u32::MAX - 1` profilers are created during the lifetime
/// of the process.
pub(crate) fn next_owner() -> u32 {
    let owner = NEXT_OWNER.fetch_add(1, atomic::Ordering::Relaxed);
    assert!(owner != 0, "profiler identities exhausted");
    owner
}

/// Static identity of one instrumented program location.
///
/// Call sites are normally declared by the [`callsite!`](crate::callsite) macro (or
/// indirectly by [`start!`](crate::start), [`mark!`](crate::mark) and
/// [`scope!`](crate::scope)), which places one `static Callsite` at each location.
///
/// Each call site remembers the record id it was given the first time it was
/// registered, so later executions resolve their record without touching the
/// registry. The memo belongs to the first profiler that registered the call site;
/// other profilers resolve the same call site through their own lookup table.
#[derive(Debug)]
pub struct Callsite {
    name: &'static str,
    file: &'static str,
    line: u32,

    /// Owner identity in the top half, record id in the bottom half. `UNSET` until the
    /// first registration.
    memo: AtomicU64,
}

impl Callsite {
    /// Creates a new call site identity.
    ///
    /// Prefer the [`callsite!`](crate::callsite) macro, which fills in the file and line.
    #[must_use]
    pub const fn new(name: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            name,
            file,
            line,
            memo: AtomicU64::new(UNSET),
        }
    }

    /// The name shown for samples of this call site in exported traces.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The source file containing the call site.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// The source line of the call site.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Returns the memoized record id if `owner` is the profiler that registered
    /// this call site first.
    #[inline]
    pub(crate) fn memoized_for(&self, owner: u32) -> Option<RecordId> {
        let memo = self.memo.load(MEMO_ORDERING);

        if memo >> OWNER_SHIFT != u64::from(owner) {
            return None;
        }

        u32::try_from(memo & RECORD_MASK).ok().map(RecordId::new)
    }

    /// Writes the memo if no profiler has claimed this call site yet.
    ///
    /// The memo is written at most once for the lifetime of the call site.
    pub(crate) fn claim(&self, owner: u32, record: RecordId) {
        let memo = (u64::from(owner) << OWNER_SHIFT) | u64::from(record.get());

        // Losing the race means another profiler owns the memo. That is fine, we
        // resolve through our own lookup table instead.
        _ = self
            .memo
            .compare_exchange(UNSET, memo, MEMO_ORDERING, MEMO_ORDERING);
    }
}

/// Declares a `static` [`Callsite`] at the current location and evaluates to a
/// `&'static Callsite` referencing it.
///
/// # Examples
///
/// ```
/// use cycle_trace::{Profiler, callsite};
///
/// let profiler = Profiler::new();
///
/// let site = callsite!("decode_frame");
/// let record = profiler.register_callsite(site).unwrap();
///
/// assert_eq!(site.name(), "decode_frame");
/// assert_eq!(profiler.register_callsite(site).unwrap(), record);
/// ```
#[macro_export]
macro_rules! callsite {
    ($name:expr) => {{
        static CALLSITE: $crate::Callsite = $crate::Callsite::new($name, file!(), line!());
        &CALLSITE
    }};
}

/// Registers the call site (once) and opens a span for it.
///
/// Evaluates to `cycle_trace::Result<SampleIndex>`. Close the span with
/// [`Profiler::end()`](crate::Profiler::end).
///
/// # Examples
///
/// ```
/// use cycle_trace::{Profiler, start};
///
/// # fn main() -> cycle_trace::Result<()> {
/// let profiler = Profiler::new();
///
/// start!(profiler, "load_config")?;
/// // ... work ...
/// profiler.end();
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! start {
    ($profiler:expr, $name:expr) => {{
        let profiler = &$profiler;
        profiler
            .register_callsite($crate::callsite!($name))
            .and_then(move |record| profiler.start(record))
    }};
}

/// Registers the call site (once) and records an instantaneous mark for it.
///
/// Evaluates to `cycle_trace::Result<SampleIndex>`.
///
/// # Examples
///
/// ```
/// use cycle_trace::{Profiler, mark};
///
/// # fn main() -> cycle_trace::Result<()> {
/// let profiler = Profiler::new();
///
/// mark!(profiler, "cache_miss")?;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! mark {
    ($profiler:expr, $name:expr) => {{
        let profiler = &$profiler;
        profiler
            .register_callsite($crate::callsite!($name))
            .and_then(move |record| profiler.mark(record))
    }};
}

/// Registers the call site (once) and opens a span that is closed when the returned
/// guard is dropped.
///
/// Evaluates to `cycle_trace::Result<SpanGuard>`. The optional third argument is the hit
/// count folded into the record when the span closes (default 1).
///
/// # Examples
///
/// ```
/// use cycle_trace::{Profiler, scope};
///
/// # fn main() -> cycle_trace::Result<()> {
/// let profiler = Profiler::new();
///
/// {
///     let _frame = scope!(profiler, "frame")?;
///     let _batch = scope!(profiler, "process_batch", 128)?;
///     // ... 128 items of work ...
/// }
///
/// assert!(profiler.open_sample().is_none());
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! scope {
    ($profiler:expr, $name:expr) => {
        $crate::scope!($profiler, $name, 1)
    };
    ($profiler:expr, $name:expr, $hits:expr) => {{
        let profiler = &$profiler;
        profiler
            .register_callsite($crate::callsite!($name))
            .and_then(move |record| profiler.scope_n(record, $hits))
    }};
}
