//! Sample tree buffer.
//!
//! Samples live in one flat, append-only buffer. The hierarchy is encoded in each sample
//! as the index of its parent; a span whose parent index equals its own index is the root
//! of a subtree. The only traversal state is the cursor: the index of the deepest span
//! that is still open. Closing a span moves the cursor back to the parent recorded in
//! that span, so no separate stack exists.

use std::fmt;

use crate::growth::reserve_one;
use crate::{Error, RecordId, Result};

const BUFFER_NAME: &str = "sample buffer";

/// End timestamp of a span that has not been closed yet.
const OPEN: u64 = u64::MAX;

/// Position of a sample in the capture buffer.
///
/// Indexes are only meaningful until the next export, which empties the buffer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SampleIndex(u32);

impl SampleIndex {
    #[must_use]
    pub(crate) const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The numeric value of the index.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SampleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One concrete occurrence of a record: a span or a mark.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sample {
    record: RecordId,

    /// Own index for root spans. `None` only for marks taken while no span was open.
    parent: Option<SampleIndex>,

    start_cycles: u64,

    /// `OPEN` while the span is open, equal to `start_cycles` for marks.
    end_cycles: u64,
}

impl Sample {
    /// The record this sample is an occurrence of.
    #[must_use]
    pub fn record(&self) -> RecordId {
        self.record
    }

    /// Index of the enclosing span.
    ///
    /// Root spans point at themselves. Marks taken while no span was open have no parent.
    #[must_use]
    pub fn parent(&self) -> Option<SampleIndex> {
        self.parent
    }

    /// Cycle count at which the sample was taken.
    #[must_use]
    pub fn start_cycles(&self) -> u64 {
        self.start_cycles
    }

    /// Cycle count at which the span was closed, or `None` if it is still open.
    ///
    /// For marks this equals the start.
    #[must_use]
    pub fn end_cycles(&self) -> Option<u64> {
        (self.end_cycles != OPEN).then_some(self.end_cycles)
    }

    /// Whether this sample is an instantaneous mark rather than a span.
    ///
    /// A span that happened to open and close on the same cycle count is indistinguishable
    /// from a mark and is treated as one.
    #[must_use]
    pub fn is_mark(&self) -> bool {
        self.start_cycles == self.end_cycles
    }

    /// Cycles between start and end, or `None` while the span is open.
    #[must_use]
    pub fn elapsed_cycles(&self) -> Option<u64> {
        self.end_cycles()
            .map(|end| end.wrapping_sub(self.start_cycles))
    }
}

/// Outcome of closing the span under the cursor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ClosedSpan {
    pub(crate) record: RecordId,
    pub(crate) elapsed_cycles: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SampleTree {
    samples: Vec<Sample>,
    cursor: Option<SampleIndex>,
}

impl SampleTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Index of the deepest open span.
    pub(crate) fn cursor(&self) -> Option<SampleIndex> {
        self.cursor
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn get(&self, index: SampleIndex) -> Option<&Sample> {
        self.samples.get(index.as_index())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Appends an open span under the cursor and moves the cursor to it.
    pub(crate) fn open(&mut self, record: RecordId, now: u64) -> Result<SampleIndex> {
        let index = self.next_index()?;

        self.append(Sample {
            record,
            parent: Some(self.cursor.unwrap_or(index)),
            start_cycles: now,
            end_cycles: OPEN,
        })?;

        self.cursor = Some(index);
        Ok(index)
    }

    /// Appends a mark under the cursor. The cursor does not move: marks never have children.
    pub(crate) fn mark(&mut self, record: RecordId, now: u64) -> Result<SampleIndex> {
        let index = self.next_index()?;

        self.append(Sample {
            record,
            parent: self.cursor,
            start_cycles: now,
            end_cycles: now,
        })?;

        Ok(index)
    }

    /// Closes the span under the cursor and moves the cursor to its parent.
    pub(crate) fn close(&mut self, now: u64) -> Result<ClosedSpan> {
        let index = self.cursor.ok_or(Error::NoOpenSpan)?;

        let sample = self
            .samples
            .get_mut(index.as_index())
            .expect("the cursor always points into the buffer");

        sample.end_cycles = now;

        // A root points at itself; closing it leaves no span open.
        self.cursor = sample.parent.filter(|&parent| parent != index);

        Ok(ClosedSpan {
            record: sample.record,
            elapsed_cycles: now.wrapping_sub(sample.start_cycles),
        })
    }

    /// Drops every closed span and every mark, keeping only the chain of open spans.
    ///
    /// The open spans are exactly the ancestors of the cursor (plus the cursor itself) and
    /// appear in the buffer in nesting order. They are moved to the front and renumbered
    /// from zero: the outermost becomes a root, each other one points at the one before
    /// it and the cursor ends up on the last one. Capacity is retained.
    pub(crate) fn retain_open(&mut self) {
        let mut kept = 0_u32;

        self.samples.retain_mut(|sample| {
            if sample.end_cycles != OPEN {
                return false;
            }

            sample.parent = Some(SampleIndex::new(kept.saturating_sub(1)));
            kept = kept.wrapping_add(1);
            true
        });

        debug_assert_eq!(
            self.cursor.is_some(),
            kept > 0,
            "open spans and the cursor must agree"
        );

        self.cursor = kept.checked_sub(1).map(SampleIndex::new);
    }

    fn next_index(&self) -> Result<SampleIndex> {
        u32::try_from(self.samples.len())
            .map(SampleIndex::new)
            .map_err(|_overflow| Error::IndexSpaceExhausted {
                buffer: BUFFER_NAME,
            })
    }

    #[inline]
    fn append(&mut self, sample: Sample) -> Result<()> {
        reserve_one(&mut self.samples, BUFFER_NAME)?;
        self.samples.push(sample);
        Ok(())
    }
}
