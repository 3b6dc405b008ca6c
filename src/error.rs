use core::fmt::{self, Debug, Display};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by this library.
///
/// This can encapsulate an SPI or GPIO error, and adds its own protocol errors
/// on top of that.
pub enum Error<SPI: Transfer<u8>, GPIO: OutputPin> {
    /// An SPI transfer failed.
    Spi(SPI::Error),

    /// A GPIO could not be set.
    Gpio(GPIO::Error),

    /// The named SPI channel could not be located.
    DeviceNotFound,

    /// The JEDEC ID does not belong to the SST25VF family.
    ///
    /// Usually this means the wrong chip is connected, the chip is not
    /// powered, or the bus is misconfigured.
    DeviceMismatch {
        /// Manufacturer byte that was read (expected `0xBF`).
        manufacturer: u8,
        /// Memory type byte that was read (expected `0x25`).
        memory_type: u8,
    },

    /// The chip reported a capacity code this driver has no geometry for.
    UnsupportedCapacity(u8),

    /// The busy bit did not clear within the configured number of polls.
    Timeout,

    /// A buffer or request length the operation cannot handle.
    InvalidLength(usize),

    /// The request addresses sectors past the end of the chip.
    OutOfBounds,

    /// A control command was issued without its required argument.
    MissingArgument,

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<SPI: Transfer<u8>, GPIO: OutputPin> Debug for Error<SPI, GPIO>
where
    SPI::Error: Debug,
    GPIO::Error: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::DeviceNotFound => f.write_str("Error::DeviceNotFound"),
            Error::DeviceMismatch {
                manufacturer,
                memory_type,
            } => write!(
                f,
                "Error::DeviceMismatch {{ manufacturer: {:#04x}, memory_type: {:#04x} }}",
                manufacturer, memory_type
            ),
            Error::UnsupportedCapacity(code) => {
                write!(f, "Error::UnsupportedCapacity({:#04x})", code)
            }
            Error::Timeout => f.write_str("Error::Timeout"),
            Error::InvalidLength(len) => write!(f, "Error::InvalidLength({})", len),
            Error::OutOfBounds => f.write_str("Error::OutOfBounds"),
            Error::MissingArgument => f.write_str("Error::MissingArgument"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<SPI: Transfer<u8>, GPIO: OutputPin> Display for Error<SPI, GPIO>
where
    SPI::Error: Display,
    GPIO::Error: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "SPI error: {}", spi),
            Error::Gpio(gpio) => write!(f, "GPIO error: {}", gpio),
            Error::DeviceNotFound => f.write_str("SPI channel not found"),
            Error::DeviceMismatch {
                manufacturer,
                memory_type,
            } => write!(
                f,
                "not an SST25VF chip (manufacturer {:02X}, memory type {:02X})",
                manufacturer, memory_type
            ),
            Error::UnsupportedCapacity(code) => {
                write!(f, "unsupported memory capacity code {:02X}", code)
            }
            Error::Timeout => f.write_str("timed out waiting for the chip to become ready"),
            Error::InvalidLength(len) => write!(f, "invalid length {}", len),
            Error::OutOfBounds => f.write_str("address out of bounds"),
            Error::MissingArgument => f.write_str("missing control argument"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}
