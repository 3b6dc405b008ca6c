//! An [`embedded-hal`]-based driver for SST25VF-series SPI NOR flash chips.
//!
//! Supported parts are the SST25VF016B, SST25VF032B and SST25VF064C
//! (JEDEC manufacturer `0xBF`, memory type `0x25`). The part is detected at
//! initialization and its geometry is fixed from then on: 4 KiB sectors, which
//! are also the block size exposed through [`BlockDevice`].
//!
//! Writes use the chip's Auto Address Increment (AAI) mode and always erase
//! the containing sector first.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

#![doc(html_root_url = "https://docs.rs/sst25vf/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
mod block;
mod error;
pub mod prelude;
#[cfg(test)]
mod sim;
pub mod sst25vf;
mod utils;

pub use crate::block::{attach, Control, SpiChannels};
pub use crate::error::Error;

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::{Mode, MODE_0};

/// SPI mode the chip must be driven in (mode 3 works as well).
pub const SPI_MODE: Mode = MODE_0;

/// Highest SPI clock frequency this driver configures, in Hz.
pub const MAX_CLOCK_HZ: u32 = 50_000_000;

/// A trait for reading operations from a memory chip.
pub trait Read<Addr, SPI: Transfer<u8>, CS: OutputPin> {
    /// Reads bytes from a memory chip.
    ///
    /// Returns the number of bytes transferred, which is always `buf.len()`.
    ///
    /// # Parameters
    /// * `addr`: The address to start reading at.
    /// * `buf`: The buffer to read `buf.len()` bytes into.
    fn read(&mut self, addr: Addr, buf: &mut [u8]) -> Result<usize, Error<SPI, CS>>;
}

/// The operations a host block-device layer performs on a flash device.
///
/// Positions and counts are in sectors; see [`Control::GetBlockGeometry`] for
/// the sector size.
pub trait BlockDevice<SPI: Transfer<u8>, CS: OutputPin> {
    /// Called once when the host brings the device up.
    fn init(&mut self) -> Result<(), Error<SPI, CS>> {
        Ok(())
    }

    /// Prepares the device for access. May be called any number of times.
    fn open(&mut self) -> Result<(), Error<SPI, CS>>;

    /// Ends a session started by [`open`](BlockDevice::open).
    fn close(&mut self) -> Result<(), Error<SPI, CS>> {
        Ok(())
    }

    /// Handles a device control request.
    fn control(&mut self, cmd: Control<'_>) -> Result<(), Error<SPI, CS>>;

    /// Reads `count` sectors starting at sector `pos` into `buf`.
    ///
    /// Returns the number of bytes transferred.
    fn read_blocks(
        &mut self,
        pos: u32,
        buf: &mut [u8],
        count: u32,
    ) -> Result<usize, Error<SPI, CS>>;

    /// Writes `count` sectors from `buf`, starting at sector `pos`.
    ///
    /// Each sector is erased before it is programmed. Returns the number of
    /// bytes transferred.
    fn write_blocks(&mut self, pos: u32, buf: &[u8], count: u32)
        -> Result<usize, Error<SPI, CS>>;
}
