use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

/// Errors that can occur while capturing or exporting samples.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `end` was called while no span was open. Start and end calls are mismatched.
    #[error("no open span to end - start and end calls are mismatched")]
    NoOpenSpan,

    /// A record id was used with a profiler that did not issue it.
    #[error("record {record} is not registered with this profiler")]
    UnknownRecord {
        /// The offending record id.
        record: u32,
    },

    /// Growing the record table or the sample buffer failed.
    #[error("failed to grow {buffer}: {source}")]
    Allocation {
        /// Which buffer was being grown.
        buffer: &'static str,

        /// The underlying reservation failure.
        #[source]
        source: TryReserveError,
    },

    /// The record table or sample buffer already holds the maximum number of entries
    /// addressable by a 32-bit index.
    #[error("{buffer} is full: no more 32-bit indexes are available")]
    IndexSpaceExhausted {
        /// Which buffer ran out of indexes.
        buffer: &'static str,
    },

    /// Writing a trace fragment to its destination failed.
    #[error("failed to write trace output: {0}")]
    Io(#[from] io::Error),

    /// Rendering a trace event as JSON failed.
    #[error("failed to render trace event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A specialized `Result` type for `cycle_trace` operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
