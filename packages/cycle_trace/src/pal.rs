//! Platform abstraction layer for reading the cycle counter.
//!
//! This module allows switching between the real hardware timestamp counter,
//! a counter supplied by the embedder and fake implementations for testing purposes.

mod abstractions;
mod facade;
#[cfg(test)]
mod fake;
mod real;

pub use abstractions::CycleCounter;
#[cfg(test)]
pub(crate) use abstractions::MockCycleCounter;
pub(crate) use facade::ClockFacade;
#[cfg(test)]
pub(crate) use fake::FakeClock;
pub use real::TimestampCounter;
