//! Trace export in the Chrome tracing JSON format.
//!
//! Every sample becomes one trace event: spans become complete events (`"ph": "X"`) with
//! a start and a duration, marks become instant events (`"ph": "i"`). All events share
//! process and thread id zero. The resulting file can be loaded into `chrome://tracing`,
//! Perfetto or Speedscope.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZero;
use std::path::Path;

use serde::Serialize;

use crate::registry::Registry;
use crate::tree::SampleTree;
use crate::{CounterModel, Profiler, Result};

const CHUNK_SEPARATOR: &[u8] = b",\n\n";
const EVENT_SEPARATOR: &[u8] = b",\n";
const EVENT_INDENT: &[u8] = b"    ";

#[derive(Debug, Serialize)]
struct TraceEvent<'a> {
    name: &'a str,
    ph: &'static str,
    ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u32,
    tid: u32,
}

/// Converts cycle counts to the unit written to the trace.
#[derive(Clone, Copy, Debug)]
struct TimeScale {
    cycles_per_unit: f64,
}

impl TimeScale {
    /// Milliseconds if the counter frequency is known, otherwise raw cycles.
    #[expect(
        clippy::cast_precision_loss,
        reason = "trace timestamps are floating point by definition"
    )]
    fn new(frequency: Option<NonZero<u64>>) -> Self {
        Self {
            cycles_per_unit: frequency.map_or(1.0, |hz| hz.get() as f64 / 1000.0),
        }
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "trace timestamps are floating point by definition"
    )]
    fn convert(self, cycles: u64) -> f64 {
        cycles as f64 / self.cycles_per_unit
    }
}

/// Writes every sample in `tree` as one fragment of a JSON array of trace events.
///
/// Returns the number of events written. Writes nothing at all for an empty tree.
pub(crate) fn write_fragment<M: CounterModel>(
    tree: &SampleTree,
    registry: &Registry<M>,
    frequency: Option<NonZero<u64>>,
    mut out: impl Write,
    is_first_chunk: bool,
) -> Result<usize> {
    let scale = TimeScale::new(frequency);
    let mut written = 0_usize;

    for sample in tree.iter() {
        // Open spans stay in the buffer and are written once they close.
        let Some(elapsed) = sample.elapsed_cycles() else {
            continue;
        };

        if written == 0 {
            if !is_first_chunk {
                out.write_all(CHUNK_SEPARATOR)?;
            }
        } else {
            out.write_all(EVENT_SEPARATOR)?;
        }

        let event = TraceEvent {
            name: registry
                .name(sample.record())
                .expect("samples only reference registered records"),
            ph: if sample.is_mark() { "i" } else { "X" },
            ts: scale.convert(sample.start_cycles()),
            dur: (!sample.is_mark()).then(|| scale.convert(elapsed)),
            pid: 0,
            tid: 0,
        };

        out.write_all(EVENT_INDENT)?;
        serde_json::to_writer(&mut out, &event)?;

        written = written.wrapping_add(1);
    }

    out.flush()?;

    Ok(written)
}

/// Writes a complete trace (one JSON array) from any number of export rounds.
///
/// The opening bracket is written on creation, each [`write_chunk()`][1] appends the
/// samples captured since the previous chunk and [`finish()`][2] writes the closing
/// bracket. The writer keeps track of whether a separator is needed between chunks.
///
/// # Examples
///
/// ```
/// use cycle_trace::{Profiler, TraceWriter};
///
/// # fn main() -> cycle_trace::Result<()> {
/// let profiler = Profiler::new();
/// let frame = profiler.register("frame", file!(), line!())?;
///
/// let mut trace = TraceWriter::new(Vec::new())?;
///
/// for _ in 0..3 {
///     profiler.start(frame)?;
///     profiler.end();
///     trace.write_chunk(&profiler)?;
/// }
///
/// let json = trace.finish()?;
/// let events: serde_json::Value = serde_json::from_slice(&json).unwrap();
/// assert_eq!(events.as_array().unwrap().len(), 3);
/// # Ok(())
/// # }
/// ```
///
/// [1]: Self::write_chunk
/// [2]: Self::finish
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    out: W,

    /// Whether any event has been written, which means the next chunk needs a separator.
    has_events: bool,
}

impl TraceWriter<BufWriter<File>> {
    /// Creates (or truncates) the file at `path` and writes the opening bracket.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> TraceWriter<W> {
    /// Wraps `out` and writes the opening bracket to it.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `out` fails.
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(b"[\n")?;

        Ok(Self {
            out,
            has_events: false,
        })
    }

    /// Exports all samples captured by `profiler` since its previous export.
    ///
    /// Returns the number of events written.
    ///
    /// # Errors
    ///
    /// Same as [`Profiler::export()`].
    pub fn write_chunk<M: CounterModel>(&mut self, profiler: &Profiler<M>) -> Result<usize> {
        let written = profiler.export(&mut self.out, !self.has_events)?;

        if written > 0 {
            self.has_events = true;
        }

        Ok(written)
    }

    /// Writes the closing bracket, flushes and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.out.write_all(b"\n]\n")?;
        self.out.flush()?;

        Ok(self.out)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::callsite::next_owner;
    use crate::{Local, RecordId};

    fn registry_with(names: &[&'static str]) -> (Registry<Local>, Vec<RecordId>) {
        let mut registry = Registry::new(next_owner());
        let ids = names
            .iter()
            .map(|name| registry.register((*name).into(), "x.rs".into(), 1).unwrap())
            .collect();
        (registry, ids)
    }

    fn render(
        tree: &SampleTree,
        registry: &Registry<Local>,
        frequency: Option<u64>,
        is_first_chunk: bool,
    ) -> String {
        let mut out = Vec::new();
        write_fragment(
            tree,
            registry,
            frequency.and_then(NonZero::new),
            &mut out,
            is_first_chunk,
        )
        .unwrap();
        String::from_utf8(out).unwrap()
    }

    fn parse(fragment: &str) -> Vec<Value> {
        let value: Value = serde_json::from_str(&format!("[{fragment}]")).unwrap();
        value.as_array().unwrap().clone()
    }

    #[test]
    fn empty_tree_writes_nothing() {
        let (registry, _) = registry_with(&[]);
        let tree = SampleTree::new();

        assert_eq!(render(&tree, &registry, None, true), "");
        assert_eq!(render(&tree, &registry, None, false), "");
    }

    #[test]
    fn span_becomes_complete_event() {
        let (registry, ids) = registry_with(&["work"]);
        let mut tree = SampleTree::new();
        tree.open(ids[0], 100).unwrap();
        tree.close(350).unwrap();

        let events = parse(&render(&tree, &registry, None, true));

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event["name"], "work");
        assert_eq!(event["ph"], "X");
        assert_eq!(event["ts"].as_f64(), Some(100.0));
        assert_eq!(event["dur"].as_f64(), Some(250.0));
        assert_eq!(event["pid"], 0);
        assert_eq!(event["tid"], 0);
    }

    #[test]
    fn mark_becomes_instant_event_without_duration() {
        let (registry, ids) = registry_with(&["tick"]);
        let mut tree = SampleTree::new();
        tree.mark(ids[0], 77).unwrap();

        let events = parse(&render(&tree, &registry, None, true));

        let event = &events[0];
        assert_eq!(event["ph"], "i");
        assert_eq!(event["ts"].as_f64(), Some(77.0));
        assert!(event.get("dur").is_none());
    }

    #[test]
    fn events_are_in_buffer_order() {
        let (registry, ids) = registry_with(&["outer", "inner", "tick"]);
        let mut tree = SampleTree::new();
        tree.open(ids[0], 0).unwrap();
        tree.open(ids[1], 1).unwrap();
        tree.mark(ids[2], 2).unwrap();
        tree.close(3).unwrap();
        tree.close(4).unwrap();

        let names: Vec<_> = parse(&render(&tree, &registry, None, true))
            .into_iter()
            .map(|event| event["name"].as_str().unwrap().to_owned())
            .collect();

        assert_eq!(names, ["outer", "inner", "tick"]);
    }

    #[test]
    fn frequency_converts_to_milliseconds() {
        let (registry, ids) = registry_with(&["work"]);
        let mut tree = SampleTree::new();
        tree.open(ids[0], 3_000_000).unwrap();
        tree.close(9_000_000).unwrap();

        // 2 GHz means 2_000_000 cycles per millisecond.
        let events = parse(&render(&tree, &registry, Some(2_000_000_000), true));

        let ts = events[0]["ts"].as_f64().unwrap();
        let dur = events[0]["dur"].as_f64().unwrap();
        assert!((ts - 1.5).abs() < 1e-9, "ts was {ts}");
        assert!((dur - 3.0).abs() < 1e-9, "dur was {dur}");
    }

    #[test]
    fn continuation_chunk_starts_with_separator() {
        let (registry, ids) = registry_with(&["tick"]);
        let mut tree = SampleTree::new();
        tree.mark(ids[0], 1).unwrap();

        let first = render(&tree, &registry, None, true);
        let continuation = render(&tree, &registry, None, false);

        assert!(!first.starts_with(','));
        assert!(continuation.starts_with(",\n\n"));
        assert_eq!(continuation.trim_start_matches([',', '\n']), first);
    }

    #[test]
    fn open_span_is_skipped() {
        let (registry, ids) = registry_with(&["open", "tick"]);
        let mut tree = SampleTree::new();
        tree.open(ids[0], 0).unwrap();
        tree.mark(ids[1], 1).unwrap();

        let events = parse(&render(&tree, &registry, None, true));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["name"], "tick");
    }

    #[test]
    fn names_are_escaped() {
        let (registry, ids) = registry_with(&["say \"hi\"\n"]);
        let mut tree = SampleTree::new();
        tree.mark(ids[0], 1).unwrap();

        let events = parse(&render(&tree, &registry, None, true));

        assert_eq!(events[0]["name"], "say \"hi\"\n");
    }

    #[test]
    fn writer_produces_one_array_across_chunks() {
        let profiler = Profiler::builder()
            .fake_clock(crate::pal::FakeClock::new())
            .build();
        let record = profiler.register("r", "x.rs", 1).unwrap();
        let mut writer = TraceWriter::new(Vec::new()).unwrap();

        // An empty first chunk must not cause a leading separator later.
        assert_eq!(writer.write_chunk(&profiler).unwrap(), 0);

        profiler.mark(record).unwrap();
        assert_eq!(writer.write_chunk(&profiler).unwrap(), 1);

        profiler.mark(record).unwrap();
        profiler.mark(record).unwrap();
        assert_eq!(writer.write_chunk(&profiler).unwrap(), 2);

        let json = writer.finish().unwrap();
        let value: Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn writer_with_no_chunks_is_empty_array() {
        let writer = TraceWriter::new(Vec::new()).unwrap();

        let json = writer.finish().unwrap();

        let value: Value = serde_json::from_slice(&json).unwrap();
        assert!(value.as_array().unwrap().is_empty());
    }
}
