use crate::Error;
use core::fmt;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

pub struct HexSlice<T>(pub T)
where
    T: AsRef<[u8]>;

impl<T: AsRef<[u8]>> fmt::Debug for HexSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.0.as_ref().iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        f.write_str("]")
    }
}

/// Sends `command` in a single chip-select frame.
pub(crate) fn spi_command<SPI, CS>(
    spi: &mut SPI,
    cs: &mut CS,
    command: &mut [u8],
) -> Result<(), Error<SPI, CS>>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    trace!("spi_command: {:?}", HexSlice(&*command));

    // If the SPI transfer fails, make sure to disable CS anyways
    cs.set_low().map_err(Error::Gpio)?;
    let spi_result = spi.transfer(command).map_err(Error::Spi);
    cs.set_high().map_err(Error::Gpio)?;
    spi_result?;
    Ok(())
}

/// Sends `command`, then clocks `buf.len()` bytes into `buf`, holding chip
/// select for the whole transaction.
pub(crate) fn spi_command_then_read<SPI, CS>(
    spi: &mut SPI,
    cs: &mut CS,
    command: &mut [u8],
    buf: &mut [u8],
) -> Result<(), Error<SPI, CS>>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    trace!(
        "spi_command_then_read: {:?} + {} bytes",
        HexSlice(&*command),
        buf.len()
    );

    cs.set_low().map_err(Error::Gpio)?;
    let mut spi_result = spi.transfer(command);
    if spi_result.is_ok() {
        spi_result = spi.transfer(buf);
    }
    cs.set_high().map_err(Error::Gpio)?;
    spi_result.map(|_| ()).map_err(Error::Spi)
}
