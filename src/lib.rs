#![no_std]
//! This is a platform agnostic library for the Micron MT25QL serial NOR flash family using [embedded-hal](https://github.com/rust-embedded/embedded-hal).
//!
//! Multiple densities are supported:
//! * [MT25QL64ABA](https://www.micron.com/products/nor-flash/serial-nor-flash)
//! * [MT25QL128ABA](https://www.micron.com/products/nor-flash/serial-nor-flash)
//! * [MT25QL256ABA](https://www.micron.com/products/nor-flash/serial-nor-flash)
//! * [MT25QL512ABB](https://www.micron.com/products/nor-flash/serial-nor-flash)
//! * [MT25QL01GBBB](https://www.micron.com/products/nor-flash/serial-nor-flash)
//!
//! The driver issues plain 3-byte-address commands, so a single instance can
//! reach at most the first 16 MiB of a chip. Destructive commands are
//! sequenced the way the device expects them: write-enable latch armed before
//! each erase or page program, ready-polls on both status registers around
//! the command, and page-boundary-aware chunking for program operations.

pub mod address;
pub mod asynchronous;
pub mod blocking;
mod command;
pub mod error;
pub mod register;

use crate::error::Error;

/// Default bound on consecutive status polls before an operation gives up
/// with [`Error::Timeout`].
pub const DEFAULT_POLL_LIMIT: u32 = 1_000_000;

pub(crate) fn check_range<E>(capacity: usize, offset: u32, length: usize) -> Result<(), Error<E>> {
    let capacity = capacity as u32;
    let length = length as u32;
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}
