use tracing::debug;

use crate::{Error, Result};

/// Capacity of a buffer on its first growth.
pub(crate) const INITIAL_CAPACITY: usize = 64;

/// Ensures `buffer` has room for one more item, growing it to 64 items on first use and
/// doubling it on every later overflow.
///
/// Reservation failures are returned instead of aborting the process.
#[inline]
pub(crate) fn reserve_one<T>(buffer: &mut Vec<T>, name: &'static str) -> Result<()> {
    if buffer.len() < buffer.capacity() {
        return Ok(());
    }

    grow(buffer, name)
}

#[cold]
fn grow<T>(buffer: &mut Vec<T>, name: &'static str) -> Result<()> {
    let target = if buffer.capacity() == 0 {
        INITIAL_CAPACITY
    } else {
        buffer
            .capacity()
            .checked_mul(2)
            .ok_or(Error::IndexSpaceExhausted { buffer: name })?
    };

    let additional = target.saturating_sub(buffer.len());

    buffer
        .try_reserve_exact(additional)
        .map_err(|source| Error::Allocation {
            buffer: name,
            source,
        })?;

    debug!(buffer = name, capacity = buffer.capacity(), "grew buffer");

    Ok(())
}
