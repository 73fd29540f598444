use std::fmt::{self, Debug};
use std::sync::Arc;

#[cfg(test)]
use crate::pal::FakeClock;
use crate::pal::{CycleCounter, TimestampCounter};

/// Dispatches cycle counter reads to whichever source the profiler was built with.
///
/// The real counter is matched first so the common case compiles down to the bare
/// intrinsic without a virtual call.
#[derive(Clone)]
pub(crate) enum ClockFacade {
    Real(TimestampCounter),
    Custom(Arc<dyn CycleCounter>),

    #[cfg(test)]
    Fake(FakeClock),
}

impl ClockFacade {
    pub(crate) fn real() -> Self {
        Self::Real(TimestampCounter)
    }

    pub(crate) fn custom(counter: impl CycleCounter) -> Self {
        Self::Custom(Arc::new(counter))
    }

    #[inline]
    pub(crate) fn cycles(&self) -> u64 {
        match self {
            Self::Real(counter) => counter.cycles(),
            Self::Custom(counter) => counter.cycles(),
            #[cfg(test)]
            Self::Fake(clock) => clock.cycles(),
        }
    }
}

#[cfg(test)]
impl From<FakeClock> for ClockFacade {
    fn from(clock: FakeClock) -> Self {
        Self::Fake(clock)
    }
}

impl Debug for ClockFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(counter) => counter.fmt(f),
            Self::Custom(counter) => counter.fmt(f),
            #[cfg(test)]
            Self::Fake(clock) => clock.fmt(f),
        }
    }
}
