//! Driver for SST25VF-series SPI Flash chips.

use crate::utils::{spi_command, spi_command_then_read, HexSlice};
use crate::{Error, Read};
use bitflags::bitflags;
use core::convert::TryFrom;
use core::fmt;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// JEDEC manufacturer ID of SST (now Microchip).
pub const MANUFACTURER_ID: u8 = 0xBF;

/// JEDEC memory type shared by all SST25VF parts.
pub const MEMORY_TYPE: u8 = 0x25;

/// Size of the smallest erasable unit in bytes.
///
/// Sectors and blocks are the same thing for this family.
pub const SECTOR_SIZE: u32 = 4096;

/// 3-Byte JEDEC manufacturer and device identification.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Identification {
    /// Manufacturer, memory type and memory capacity, in that order.
    bytes: [u8; 3],
}

impl Identification {
    /// Build an Identification from JEDEC ID bytes.
    pub fn from_jedec_id(buf: [u8; 3]) -> Identification {
        Self { bytes: buf }
    }

    /// The JEDEC manufacturer code for this chip.
    pub fn mfr_code(&self) -> u8 {
        self.bytes[0]
    }

    /// The memory type byte. `0x25` for the whole SST25VF family.
    pub fn memory_type(&self) -> u8 {
        self.bytes[1]
    }

    /// The memory capacity code, which selects the part.
    pub fn capacity_code(&self) -> u8 {
        self.bytes[2]
    }

    /// Resolves the part, checking the manufacturer and memory type first.
    pub fn part<SPI: Transfer<u8>, CS: OutputPin>(&self) -> Result<Part, Error<SPI, CS>> {
        if self.mfr_code() != MANUFACTURER_ID || self.memory_type() != MEMORY_TYPE {
            return Err(Error::DeviceMismatch {
                manufacturer: self.mfr_code(),
                memory_type: self.memory_type(),
            });
        }

        Part::from_capacity_code(self.capacity_code())
            .ok_or_else(|| Error::UnsupportedCapacity(self.capacity_code()))
    }
}

impl fmt::Debug for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identification")
            .field(&HexSlice(self.bytes))
            .finish()
    }
}

/// The supported members of the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// 16 Mbit, capacity code `0x41`.
    Sst25vf016b,
    /// 32 Mbit, capacity code `0x4A`.
    Sst25vf032b,
    /// 64 Mbit, capacity code `0x4B`.
    Sst25vf064c,
}

impl Part {
    /// Looks up the part for a JEDEC capacity code.
    pub fn from_capacity_code(code: u8) -> Option<Part> {
        match code {
            0x41 => Some(Part::Sst25vf016b),
            0x4A => Some(Part::Sst25vf032b),
            0x4B => Some(Part::Sst25vf064c),
            _ => None,
        }
    }

    /// The JEDEC capacity code reported by this part.
    pub fn capacity_code(self) -> u8 {
        match self {
            Part::Sst25vf016b => 0x41,
            Part::Sst25vf032b => 0x4A,
            Part::Sst25vf064c => 0x4B,
        }
    }

    /// Number of 4 KiB sectors on the chip.
    pub fn sector_count(self) -> u32 {
        match self {
            Part::Sst25vf016b => 512,
            Part::Sst25vf032b => 1024,
            Part::Sst25vf064c => 2048,
        }
    }

    /// Marketing name of the part, e.g. `SST25VF016B`.
    pub fn name(self) -> &'static str {
        match self {
            Part::Sst25vf016b => "SST25VF016B",
            Part::Sst25vf032b => "SST25VF032B",
            Part::Sst25vf064c => "SST25VF064C",
        }
    }

    /// Block geometry of the whole part.
    pub fn geometry(self) -> Geometry {
        Geometry {
            bytes_per_sector: SECTOR_SIZE,
            sector_count: self.sector_count(),
            block_size: SECTOR_SIZE,
        }
    }
}

/// Block geometry of a detected chip.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Sector size in bytes.
    pub bytes_per_sector: u32,
    /// Number of sectors on the chip.
    pub sector_count: u32,
    /// Erase block size in bytes.
    pub block_size: u32,
}

impl Geometry {
    /// Total size of the chip in bytes.
    pub fn capacity(&self) -> u32 {
        self.bytes_per_sector * self.sector_count
    }
}

/// How long [`Flash::wait_done`] keeps polling the busy bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPolicy {
    /// Spin until the chip reports ready, however long that takes.
    Unbounded,
    /// Give up with [`Error::Timeout`] after this many status reads.
    MaxAttempts(u32),
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::Unbounded
    }
}

enum Opcode {
    /// Read the 8-bit status register.
    ReadStatus = 0x05,
    /// Write the 8-bit status register. Must directly follow `EnableWriteStatus`.
    WriteStatus = 0x01,
    /// Unlock the status register for one `WriteStatus`.
    EnableWriteStatus = 0x50,
    /// Clear the write enable latch. Also terminates AAI programming.
    WriteDisable = 0x04,
    /// Set the write enable latch.
    WriteEnable = 0x06,
    Read = 0x03,
    /// Read with one dummy byte after the address.
    FastRead = 0x0B,
    ByteProgram = 0x02,
    /// Auto Address Increment word program.
    AaiProgram = 0xAD,
    SectorErase = 0x20,
    ChipErase = 0xC7,
    /// Read manufacturer, memory type and capacity.
    ReadJedecId = 0x9F,
    /// Stop reporting busy status on SO during AAI programming.
    DisableBusyOutput = 0x80,
}

bitflags! {
    /// Status register bits.
    pub struct Status: u8 {
        /// Erase or write in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 4 block protection bits.
        const PROT = 0b0011_1100;
        /// The chip is in Auto Address Increment programming mode.
        const AAI = 1 << 6;
        /// **B**lock **P**rotection **L**ock-down.
        const BPL = 1 << 7;
    }
}

/// Rounds `addr` down to the start of its sector.
pub fn sector_base(addr: u32) -> u32 {
    addr & !(SECTOR_SIZE - 1)
}

fn command_and_address(opcode: Opcode, addr: u32) -> [u8; 4] {
    [opcode as u8, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

/// Driver for SST25VF-series SPI Flash chips.
///
/// A `Flash` only exists for an identified chip, so its [`Geometry`] is
/// always valid.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master to which the flash chip is attached.
/// * **`CS`**: The **C**hip-**S**elect line attached to the `\CE` pin of
///   the flash chip.
#[derive(Debug)]
pub struct Flash<SPI: Transfer<u8>, CS: OutputPin> {
    spi: SPI,
    cs: CS,
    id: Identification,
    part: Part,
    geometry: Geometry,
    poll: PollPolicy,
}

impl<SPI: Transfer<u8>, CS: OutputPin> Flash<SPI, CS> {
    /// Creates a new SST25VF flash driver, waiting on the busy bit without
    /// a bound.
    ///
    /// # Parameters
    ///
    /// * **`spi`**: An SPI master. Must be configured for 8-bit words in
    ///   [`SPI_MODE`](crate::SPI_MODE), at most
    ///   [`MAX_CLOCK_HZ`](crate::MAX_CLOCK_HZ).
    /// * **`cs`**: The **C**hip-**S**elect Pin connected to the `\CE` pin
    ///   of the flash chip. Will be driven low when accessing the device.
    pub fn init(spi: SPI, cs: CS) -> Result<Self, Error<SPI, CS>> {
        Self::init_with_policy(spi, cs, PollPolicy::default())
    }

    /// Creates a new SST25VF flash driver using `poll` for busy waits.
    ///
    /// Identifies the chip and resolves its geometry. Fails with
    /// [`Error::DeviceMismatch`] or [`Error::UnsupportedCapacity`] if the chip
    /// is not a supported SST25VF part.
    pub fn init_with_policy(
        mut spi: SPI,
        mut cs: CS,
        poll: PollPolicy,
    ) -> Result<Self, Error<SPI, CS>> {
        // Leave whatever write state the chip was in
        spi_command(&mut spi, &mut cs, &mut [Opcode::WriteDisable as u8])?;

        let id = read_jedec_id(&mut spi, &mut cs)?;
        let part = match id.part() {
            Ok(part) => part,
            Err(e) => {
                warn!("Flash::init: unsupported chip, JEDEC ID = {:?}", id);
                return Err(e);
            }
        };
        info!("Flash::init: {} detected ({:?})", part.name(), id);

        Ok(Self {
            spi,
            cs,
            id,
            part,
            geometry: part.geometry(),
            poll,
        })
    }

    fn command(&mut self, bytes: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        spi_command(&mut self.spi, &mut self.cs, bytes)
    }

    /// The identification read during [`init`](Flash::init).
    pub fn identification(&self) -> Identification {
        self.id
    }

    pub fn part(&self) -> Part {
        self.part
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    pub fn set_poll_policy(&mut self, poll: PollPolicy) {
        self.poll = poll;
    }

    /// Reads the JEDEC manufacturer/device identification.
    pub fn read_jedec_id(&mut self) -> Result<Identification, Error<SPI, CS>> {
        read_jedec_id(&mut self.spi, &mut self.cs)
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<Status, Error<SPI, CS>> {
        let mut buf = [Opcode::ReadStatus as u8, 0];
        self.command(&mut buf)?;

        Ok(Status::from_bits_truncate(buf[1]))
    }

    fn write_enable(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&mut [Opcode::WriteEnable as u8])
    }

    fn write_disable(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&mut [Opcode::WriteDisable as u8])
    }

    /// Polls the status register until the chip is no longer busy.
    ///
    /// Gives up with [`Error::Timeout`] once the [`PollPolicy`] is exhausted.
    /// `MaxAttempts(n)` reads the status register at most `n` times.
    pub fn wait_done(&mut self) -> Result<(), Error<SPI, CS>> {
        let mut polls: u32 = 0;
        loop {
            if let PollPolicy::MaxAttempts(max) = self.poll {
                if polls >= max {
                    warn!("Flash::wait_done: still busy after {} polls", polls);
                    return Err(Error::Timeout);
                }
            }
            if !self.read_status()?.contains(Status::BUSY) {
                return Ok(());
            }
            polls = polls.saturating_add(1);
        }
    }

    /// Clears all block protection bits so the whole array can be written.
    ///
    /// Also turns off the busy indication on SO, which this driver never
    /// uses.
    pub fn unlock(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&mut [Opcode::DisableBusyOutput as u8])?;
        self.command(&mut [Opcode::EnableWriteStatus as u8])?;
        self.command(&mut [Opcode::WriteStatus as u8, 0])?;
        debug!("Flash::unlock: block protection cleared");
        Ok(())
    }

    fn check_range(&self, addr: u32, len: u32) -> Result<(), Error<SPI, CS>> {
        match addr.checked_add(len) {
            Some(end) if end <= self.geometry.capacity() => Ok(()),
            _ => Err(Error::OutOfBounds),
        }
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), Error<SPI, CS>> {
        self.write_enable()?;
        self.command(&mut command_and_address(Opcode::SectorErase, addr))?;
        self.wait_done()
    }

    fn byte_program(&mut self, addr: u32, byte: u8) -> Result<(), Error<SPI, CS>> {
        let [opcode, a2, a1, a0] = command_and_address(Opcode::ByteProgram, addr);
        self.write_enable()?;
        self.command(&mut [opcode, a2, a1, a0, byte])?;
        self.wait_done()
    }

    /// Erases the sector containing `page_base` and programs `data` at the
    /// start of that sector.
    ///
    /// `page_base` is rounded down to a sector boundary, and every other
    /// byte in that sector is left erased (`0xFF`). `data` must hold between
    /// 2 and [`SECTOR_SIZE`] bytes. Data is programmed two bytes at a time
    /// in AAI mode; an odd trailing byte is programmed on its own after AAI
    /// mode has been left.
    ///
    /// If a transfer fails part way, the sector content is undefined.
    pub fn program_page(&mut self, page_base: u32, data: &[u8]) -> Result<usize, Error<SPI, CS>> {
        if data.len() < 2 || data.len() > SECTOR_SIZE as usize {
            return Err(Error::InvalidLength(data.len()));
        }
        let base = sector_base(page_base);
        self.check_range(base, SECTOR_SIZE)?;
        debug!(
            "Flash::program_page: {} bytes at {:#08x}",
            data.len(),
            base
        );

        self.erase_sector(base)?;

        // The addressed AAI command loads the chip's internal address
        // pointer; the following ones carry data only.
        let [opcode, a2, a1, a0] = command_and_address(Opcode::AaiProgram, base);
        self.write_enable()?;
        self.command(&mut [opcode, a2, a1, a0, data[0], data[1]])?;
        self.wait_done()?;

        let mut pairs = data[2..].chunks_exact(2);
        for pair in &mut pairs {
            self.command(&mut [Opcode::AaiProgram as u8, pair[0], pair[1]])?;
            self.wait_done()?;
        }

        self.write_disable()?;

        if let [last] = pairs.remainder() {
            self.byte_program(base + data.len() as u32 - 1, *last)?;
        }

        Ok(data.len())
    }

    /// Erases `amount` sectors, starting with the one containing `addr`.
    pub fn erase_sectors(&mut self, addr: u32, amount: usize) -> Result<(), Error<SPI, CS>> {
        let base = sector_base(addr);
        let len = u32::try_from(amount)
            .ok()
            .and_then(|n| n.checked_mul(SECTOR_SIZE))
            .ok_or(Error::OutOfBounds)?;
        self.check_range(base, len)?;

        for c in 0..amount as u32 {
            self.erase_sector(base + c * SECTOR_SIZE)?;
        }

        Ok(())
    }

    /// Erases the memory chip fully.
    ///
    /// Warning: Full erase operations can take a significant amount of time.
    /// Check your device's datasheet for precise numbers.
    pub fn erase_all(&mut self) -> Result<(), Error<SPI, CS>> {
        self.write_enable()?;
        self.command(&mut [Opcode::ChipErase as u8])?;
        self.wait_done()
    }

    /// Like [`read`](Read::read), but uses the fast read command, which
    /// inserts a dummy byte after the address.
    pub fn fast_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, Error<SPI, CS>> {
        let [opcode, a2, a1, a0] = command_and_address(Opcode::FastRead, addr);
        self.write_disable()?;
        spi_command_then_read(
            &mut self.spi,
            &mut self.cs,
            &mut [opcode, a2, a1, a0, 0],
            buf,
        )?;
        Ok(buf.len())
    }

    /// Releases the SPI master and chip select pin.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

fn read_jedec_id<SPI: Transfer<u8>, CS: OutputPin>(
    spi: &mut SPI,
    cs: &mut CS,
) -> Result<Identification, Error<SPI, CS>> {
    let mut id = [0; 3];
    spi_command_then_read(spi, cs, &mut [Opcode::ReadJedecId as u8], &mut id)?;
    Ok(Identification::from_jedec_id(id))
}

impl<SPI: Transfer<u8>, CS: OutputPin> Read<u32, SPI, CS> for Flash<SPI, CS> {
    /// Reads flash contents into `buf`, starting at `addr`.
    ///
    /// Reads are byte-granular and may cross sector boundaries. Only 24 bits
    /// of `addr` are transferred to the device.
    ///
    /// # Parameters
    ///
    /// * `addr`: 24-bit address to start reading at.
    /// * `buf`: Destination buffer to fill.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, Error<SPI, CS>> {
        self.write_disable()?;
        spi_command_then_read(
            &mut self.spi,
            &mut self.cs,
            &mut command_and_address(Opcode::Read, addr),
            buf,
        )?;
        Ok(buf.len())
    }
}
