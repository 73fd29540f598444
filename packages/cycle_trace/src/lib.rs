#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Cycle-accurate span and mark instrumentation with a flat sample tree.
//!
//! Call sites mark timed spans and instantaneous marks; every sample is timestamped with
//! the processor's cycle counter and appended to one flat buffer. The nesting of spans is
//! encoded in the samples themselves (each sample stores the index of its parent), so
//! arbitrarily deep and re-entrant nesting costs nothing beyond the sample itself.
//! Closed spans are also folded into per-call-site totals (hit count and cycle count).
//!
//! The buffer can be exported as a Chrome tracing JSON timeline at any point. Exporting
//! writes every completed sample and empties the buffer for the next round of captures,
//! keeping only the spans that are still open.
//!
//! The core types are:
//!
//! - [`Profiler`] - the instrumentation context. Owns the records and the sample buffer.
//! - [`Callsite`] - the static identity of an instrumented location, declared by macros.
//! - [`RecordId`] - identifies a record (one per call site) within a profiler.
//! - [`Sample`] - one span or mark in the capture buffer.
//! - [`Totals`] - accumulated hit and cycle counts of a record.
//! - [`TraceWriter`] - assembles export chunks into one trace file.
//!
//! # Simple usage
//!
//! ```
//! use cycle_trace::{Profiler, mark, scope};
//!
//! # fn main() -> cycle_trace::Result<()> {
//! let profiler = Profiler::new();
//!
//! for _ in 0..3 {
//!     let _frame = scope!(profiler, "frame")?;
//!
//!     {
//!         let _update = scope!(profiler, "update")?;
//!         mark!(profiler, "input_polled")?;
//!     }
//!
//!     let _render = scope!(profiler, "render")?;
//! }
//!
//! let mut trace = Vec::new();
//! let events = profiler.export(&mut trace, true)?;
//! assert_eq!(events, 12);
//! # Ok(())
//! # }
//! ```
//!
//! # Explicit start and end
//!
//! Spans do not have to follow lexical scopes. Any span can be closed with
//! [`Profiler::end()`], which always closes the most recently opened span that is still
//! open and returns its record so the caller can check the pairing:
//!
//! ```
//! use cycle_trace::{Profiler, start};
//!
//! # fn main() -> cycle_trace::Result<()> {
//! let profiler = Profiler::new();
//! let load = profiler.register("load", file!(), line!())?;
//!
//! profiler.start(load)?;
//! start!(profiler, "decompress")?;
//! profiler.end();
//! assert_eq!(profiler.end(), load);
//! # Ok(())
//! # }
//! ```
//!
//! # Timestamps
//!
//! Timestamps are raw cycle counts unless the profiler is given the counter frequency
//! (see [`ProfilerBuilder::frequency_hz()`] and [`ProfilerBuilder::calibrated_frequency()`]),
//! in which case exported timestamps and durations are in milliseconds.
//!
//! # Threading
//!
//! A profiler is single-threaded: it can be moved between threads but not shared. Use one
//! profiler per thread. Totals of profilers on different threads can be merged through the
//! [`Shared`] counter model.
//!
//! # Panic policy
//!
//! [`Profiler::end()`] panics if no span is open, since that always means starts and ends
//! are mismatched. Use [`Profiler::try_end_n()`] to get an error instead.
//!
//! # Mathematics policy
//!
//! Hit counts and cycle counts are 32-bit and wrap around silently. A cycle total that
//! overflows carries into the hit count. Read or reset totals regularly if spans are long
//! or numerous.

mod aggregate;
mod builder;
mod callsite;
mod error;
mod export;
mod growth;
mod guard;
mod pal;
mod profiler;
mod registry;
mod tree;

pub use aggregate::{CounterModel, Local, Shared, SharedTotals, Totals};
pub use builder::ProfilerBuilder;
pub use callsite::Callsite;
pub use error::{Error, Result};
pub use export::TraceWriter;
pub use guard::SpanGuard;
pub use pal::{CycleCounter, TimestampCounter};
pub use profiler::Profiler;
pub use registry::{RecordId, RecordInfo};
pub use tree::{Sample, SampleIndex};

/// Prevents implementations of crate traits outside the crate.
trait Sealed {}
