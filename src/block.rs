//! The host-facing side of the driver: sector-indexed block access and
//! attaching to a named SPI channel.

use crate::sst25vf::{Flash, Geometry, PollPolicy};
use crate::{BlockDevice, Error, Read};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// Device control requests understood by [`BlockDevice::control`].
#[derive(Debug)]
pub enum Control<'a> {
    /// Copy the block geometry into the given slot.
    ///
    /// Fails with [`Error::MissingArgument`] when no slot is given.
    GetBlockGeometry(Option<&'a mut Geometry>),
    /// Any other host request. Accepted and ignored.
    Other(u8),
}

/// Named SPI channels a host can hand out, such as `spi10`.
pub trait SpiChannels {
    type Spi: Transfer<u8>;
    type Cs: OutputPin;

    /// Returns the bus and chip select of channel `name`, configured for
    /// 8-bit words in [`SPI_MODE`](crate::SPI_MODE) at no more than
    /// [`MAX_CLOCK_HZ`](crate::MAX_CLOCK_HZ), or `None` if there is no such
    /// channel.
    fn find(&mut self, name: &str) -> Option<(Self::Spi, Self::Cs)>;
}

/// Binds a flash device to the SPI channel `channel_name` and identifies it.
///
/// `flash_name` only labels the device in log output. The returned device
/// is ready for [`BlockDevice`] access.
pub fn attach<C: SpiChannels>(
    channels: &mut C,
    flash_name: &str,
    channel_name: &str,
    poll: PollPolicy,
) -> Result<Flash<C::Spi, C::Cs>, Error<C::Spi, C::Cs>> {
    let (spi, cs) = match channels.find(channel_name) {
        Some(channel) => channel,
        None => {
            warn!("{}: SPI channel {} not found", flash_name, channel_name);
            return Err(Error::DeviceNotFound);
        }
    };

    let flash = Flash::init_with_policy(spi, cs, poll)?;
    info!(
        "{}: {} on {}, {} sectors of {} bytes",
        flash_name,
        flash.part().name(),
        channel_name,
        flash.geometry().sector_count,
        flash.geometry().bytes_per_sector
    );
    Ok(flash)
}

impl<SPI: Transfer<u8>, CS: OutputPin> Flash<SPI, CS> {
    /// Byte offset and length of `count` sectors at `pos`, checked against
    /// the chip size and a buffer of `buf_len` bytes.
    fn sector_span(&self, pos: u32, count: u32, buf_len: usize) -> Result<(u32, usize), Error<SPI, CS>> {
        let geometry = self.geometry();
        match pos.checked_add(count) {
            Some(end) if end <= geometry.sector_count => {}
            _ => return Err(Error::OutOfBounds),
        }

        let len = count as usize * geometry.bytes_per_sector as usize;
        if buf_len < len {
            return Err(Error::InvalidLength(buf_len));
        }
        Ok((pos * geometry.bytes_per_sector, len))
    }
}

impl<SPI: Transfer<u8>, CS: OutputPin> BlockDevice<SPI, CS> for Flash<SPI, CS> {
    fn open(&mut self) -> Result<(), Error<SPI, CS>> {
        self.unlock()
    }

    fn control(&mut self, cmd: Control<'_>) -> Result<(), Error<SPI, CS>> {
        match cmd {
            Control::GetBlockGeometry(Some(out)) => {
                *out = self.geometry();
                Ok(())
            }
            Control::GetBlockGeometry(None) => Err(Error::MissingArgument),
            Control::Other(cmd) => {
                debug!("Flash::control: ignoring command {}", cmd);
                Ok(())
            }
        }
    }

    fn read_blocks(
        &mut self,
        pos: u32,
        buf: &mut [u8],
        count: u32,
    ) -> Result<usize, Error<SPI, CS>> {
        let (offset, len) = self.sector_span(pos, count, buf.len())?;
        if len == 0 {
            return Ok(0);
        }
        self.read(offset, &mut buf[..len])
    }

    fn write_blocks(&mut self, pos: u32, buf: &[u8], count: u32) -> Result<usize, Error<SPI, CS>> {
        let (offset, len) = self.sector_span(pos, count, buf.len())?;
        let sector = self.geometry().bytes_per_sector;

        let mut addr = offset;
        for chunk in buf[..len].chunks(sector as usize) {
            self.program_page(addr, chunk)?;
            addr += sector;
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{self, SimCs, SimSpi};

    struct Channels {
        name: &'static str,
        channel: Option<(SimSpi, SimCs)>,
    }

    impl SpiChannels for Channels {
        type Spi = SimSpi;
        type Cs = SimCs;

        fn find(&mut self, name: &str) -> Option<(SimSpi, SimCs)> {
            if name == self.name {
                self.channel.take()
            } else {
                None
            }
        }
    }

    fn attached(code: u8) -> (sim::Shared, Flash<SimSpi, SimCs>) {
        let (chip, spi, cs) = sim::sst25vf(code);
        let mut channels = Channels {
            name: "spi10",
            channel: Some((spi, cs)),
        };
        let flash = attach(&mut channels, "flash0", "spi10", PollPolicy::default()).unwrap();
        (chip, flash)
    }

    #[test]
    fn test_attach_missing_channel() {
        let (_chip, spi, cs) = sim::sst25vf(0x41);
        let mut channels = Channels {
            name: "spi10",
            channel: Some((spi, cs)),
        };
        assert!(matches!(
            attach(&mut channels, "flash0", "spi11", PollPolicy::default()),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn test_attach_foreign_chip() {
        let (_chip, spi, cs) = sim::with_id([0xC2, 0x20, 0x16], 0x1000);
        let mut channels = Channels {
            name: "spi10",
            channel: Some((spi, cs)),
        };
        assert!(matches!(
            attach(&mut channels, "flash0", "spi10", PollPolicy::default()),
            Err(Error::DeviceMismatch {
                manufacturer: 0xC2,
                memory_type: 0x20
            })
        ));
    }

    #[test]
    fn test_get_geometry() {
        let (_chip, mut flash) = attached(0x4A);
        BlockDevice::init(&mut flash).unwrap();

        let mut geometry = Geometry::default();
        flash
            .control(Control::GetBlockGeometry(Some(&mut geometry)))
            .unwrap();
        assert_eq!(
            geometry,
            Geometry {
                bytes_per_sector: 4096,
                sector_count: 1024,
                block_size: 4096,
            }
        );

        assert!(matches!(
            flash.control(Control::GetBlockGeometry(None)),
            Err(Error::MissingArgument)
        ));
        flash.control(Control::Other(0x10)).unwrap();
    }

    #[test]
    fn test_open_clears_protection() {
        let (chip, mut flash) = attached(0x41);
        chip.borrow_mut().protect = 0x0F;

        // Protected: erase and program are ignored by the chip
        chip.borrow_mut().memory[..4].copy_from_slice(&[0, 0, 0, 0]);
        flash.write_blocks(0, &[0xAB; 4096], 1).unwrap();
        assert_eq!(&chip.borrow().memory[..4], &[0, 0, 0, 0]);

        flash.open().unwrap();
        flash.open().unwrap();
        assert_eq!(chip.borrow().protect, 0);

        flash.write_blocks(0, &[0xAB; 4096], 1).unwrap();
        assert!(chip.borrow().memory[..4096].iter().all(|&b| b == 0xAB));
        flash.close().unwrap();
    }

    #[test]
    fn test_block_round_trip() {
        let (_chip, mut flash) = attached(0x41);
        flash.open().unwrap();

        let data: Vec<u8> = (0..3 * 4096u32).map(|i| (i / 4096 + i) as u8).collect();
        assert_eq!(flash.write_blocks(10, &data, 3).unwrap(), 3 * 4096);

        let mut buf = vec![0; 3 * 4096];
        assert_eq!(flash.read_blocks(10, &mut buf, 3).unwrap(), 3 * 4096);
        assert_eq!(buf, data);

        // Block positions are sector indices
        let mut byte = [0];
        flash.read(11 * 4096, &mut byte).unwrap();
        assert_eq!(byte[0], data[4096]);
    }

    #[test]
    fn test_block_write_erases_every_sector() {
        let (chip, mut flash) = attached(0x41);
        chip.borrow_mut().memory[..0x3000]
            .iter_mut()
            .for_each(|b| *b = 0x00);

        let mut data = vec![0x5A; 2 * 4096];
        data[4095] = 0xFF;
        flash.write_blocks(1, &data, 2).unwrap();

        let chip = chip.borrow();
        assert!(chip.memory[..0x1000].iter().all(|&b| b == 0x00));
        assert_eq!(&chip.memory[0x1000..0x3000], &data[..]);
    }

    #[test]
    fn test_block_bounds() {
        let (chip, mut flash) = attached(0x41);
        chip.borrow_mut().trace.clear();

        let mut buf = vec![0; 2 * 4096];
        assert!(matches!(
            flash.read_blocks(511, &mut buf, 2),
            Err(Error::OutOfBounds)
        ));
        assert!(matches!(
            flash.write_blocks(u32::max_value(), &buf, 2),
            Err(Error::OutOfBounds)
        ));
        assert!(matches!(
            flash.read_blocks(0, &mut buf[..4095], 1),
            Err(Error::InvalidLength(4095))
        ));
        assert!(chip.borrow().trace.is_empty());

        assert_eq!(flash.read_blocks(511, &mut buf, 1).unwrap(), 4096);
        assert_eq!(flash.read_blocks(0, &mut buf, 0).unwrap(), 0);
    }
}
