use std::hint;
use std::marker::PhantomData;
use std::num::NonZero;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[cfg(test)]
use crate::pal::FakeClock;
use crate::pal::{ClockFacade, CycleCounter};
use crate::{CounterModel, Local, Profiler, Shared};

/// How long the frequency calibration spins against the wall clock.
const CALIBRATION_WINDOW: Duration = Duration::from_millis(2);

/// Creates instances of [`Profiler`].
///
/// Use [`Profiler::builder()`] to create a new instance of this builder.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use cycle_trace::Profiler;
///
/// let profiler = Profiler::builder()
///     .frequency_hz(NonZero::new(3_000_000_000).unwrap())
///     .shared_counters()
///     .build();
///
/// assert_eq!(profiler.frequency_hz().map(NonZero::get), Some(3_000_000_000));
/// ```
#[derive(Debug)]
pub struct ProfilerBuilder<M = Local>
where
    M: CounterModel,
{
    clock: ClockFacade,

    /// Ticks per second of the cycle counter. Without it, exported timestamps are raw
    /// cycle counts.
    frequency: Option<NonZero<u64>>,

    _model: PhantomData<M>,
}

impl ProfilerBuilder<Local> {
    pub(crate) fn new() -> Self {
        Self {
            clock: ClockFacade::real(),
            frequency: None,
            _model: PhantomData,
        }
    }

    /// Switches the profiler to the [`Shared`] counter model, whose aggregates are
    /// updated atomically and can be merged with those of profilers on other threads.
    #[must_use]
    pub fn shared_counters(self) -> ProfilerBuilder<Shared> {
        ProfilerBuilder {
            clock: self.clock,
            frequency: self.frequency,
            _model: PhantomData,
        }
    }
}

impl<M> ProfilerBuilder<M>
where
    M: CounterModel,
{
    /// Sets the cycle counter frequency, which makes exported timestamps and durations
    /// milliseconds instead of raw cycle counts.
    #[must_use]
    pub fn frequency_hz(self, frequency: NonZero<u64>) -> Self {
        Self {
            frequency: Some(frequency),
            ..self
        }
    }

    /// Estimates the cycle counter frequency by comparing it against the wall clock for
    /// a couple of milliseconds.
    ///
    /// This blocks the calling thread while measuring. If the counter does not advance
    /// during the measurement, no frequency is set.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Depends on real wall clock timing.
    pub fn calibrated_frequency(self) -> Self {
        let frequency = calibrate(&self.clock, CALIBRATION_WINDOW);

        match frequency {
            Some(hz) => debug!(frequency_hz = hz.get(), "calibrated cycle counter"),
            None => warn!("cycle counter did not advance during calibration"),
        }

        Self { frequency, ..self }
    }

    /// Reads timestamps from `counter` instead of the hardware timestamp counter.
    #[must_use]
    pub fn cycle_counter(self, counter: impl CycleCounter) -> Self {
        Self {
            clock: ClockFacade::custom(counter),
            ..self
        }
    }

    #[cfg(test)]
    pub(crate) fn fake_clock(self, clock: FakeClock) -> Self {
        Self {
            clock: clock.into(),
            ..self
        }
    }

    /// Creates the profiler.
    #[must_use]
    pub fn build(self) -> Profiler<M> {
        Profiler::from_parts(self.clock, self.frequency)
    }
}

/// Measures counter ticks per second over `window` of wall clock time.
#[cfg_attr(test, mutants::skip)] // Depends on real wall clock timing.
fn calibrate(clock: &ClockFacade, window: Duration) -> Option<NonZero<u64>> {
    let wall_start = Instant::now();
    let cycles_start = clock.cycles();

    while wall_start.elapsed() < window {
        hint::spin_loop();
    }

    let cycles = clock.cycles().wrapping_sub(cycles_start);
    let elapsed_nanos = wall_start.elapsed().as_nanos();

    let hz = u128::from(cycles)
        .checked_mul(1_000_000_000)?
        .checked_div(elapsed_nanos)?;

    NonZero::new(u64::try_from(hz).ok()?)
}
