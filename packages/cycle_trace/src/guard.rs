use std::thread;

use tracing::warn;

use crate::{CounterModel, Local, Profiler, RecordId};

/// An open span that is closed when the guard is dropped.
///
/// Created by [`Profiler::scope()`], [`Profiler::scope_n()`] or the
/// [`scope!`](crate::scope) macro. Guards nest naturally: inner guards are dropped
/// before outer ones, which matches the order in which spans must be closed.
///
/// # Examples
///
/// ```
/// use cycle_trace::Profiler;
///
/// # fn main() -> cycle_trace::Result<()> {
/// let profiler = Profiler::new();
/// let frame = profiler.register("frame", file!(), line!())?;
///
/// {
///     let _span = profiler.scope(frame)?;
///     // Work done here is attributed to "frame".
/// }
///
/// assert_eq!(profiler.totals(frame).unwrap().hits(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
#[must_use = "the span is closed when the guard is dropped - bind it with `let _span = ...`"]
pub struct SpanGuard<'a, M: CounterModel = Local> {
    profiler: &'a Profiler<M>,
    record: RecordId,
    hits: u32,
}

impl<'a, M: CounterModel> SpanGuard<'a, M> {
    pub(crate) fn new(profiler: &'a Profiler<M>, record: RecordId, hits: u32) -> Self {
        Self {
            profiler,
            record,
            hits,
        }
    }

    /// The record the span was opened for.
    #[must_use]
    pub fn record(&self) -> RecordId {
        self.record
    }
}

impl<M: CounterModel> Drop for SpanGuard<'_, M> {
    fn drop(&mut self) {
        match self.profiler.try_end_n(self.hits) {
            Ok(closed) if closed == self.record => {}
            Ok(closed) => {
                warn!(
                    opened = self.record.get(),
                    closed = closed.get(),
                    "span guard closed a different record than it opened - start and end calls are mismatched"
                );
            }
            Err(error) => {
                // A second panic while unwinding would abort the process.
                if !thread::panicking() {
                    panic!("span guard for record {} could not close its span: {error}", self.record);
                }
            }
        }
    }
}
