
use log::{info, error};

use std::collections::BTreeMap;

use structopt::StructOpt;

pub use linux_embedded_hal::sysfs_gpio::Direction;
pub use linux_embedded_hal::{spidev, Pin as Pindev, Spidev, spidev::SpiModeFlags};

use simplelog::{TermLogger, LevelFilter, TerminalMode};

use ihex::{Record, Reader};

use sst25vf::sst25vf::{Flash, PollPolicy, SECTOR_SIZE, sector_base};
use sst25vf::{attach, BlockDevice, Control, Error, Read, SpiChannels, MAX_CLOCK_HZ};

type LinuxFlash = Flash<Spidev, Pindev>;
type LinuxError = Error<Spidev, Pindev>;

#[derive(Debug, PartialEq, StructOpt)]
struct Options {
    #[structopt(subcommand)]
    operation: Operations,

    /// SPI channel, opened as /dev/<channel>
    #[structopt(long, default_value="spidev0.0", env = "SPI_DEV")]
    spi_dev: String,

    /// SPI baud rate, capped at 50 MHz
    #[structopt(long, default_value = "1000000", env = "SPI_BAUD")]
    spi_baud: u32,

    /// Chip Select (output) pin
    #[structopt(long, default_value = "8", env = "CS_PIN")]
    cs_pin: u64,

    /// Give up after this many busy polls instead of waiting forever
    #[structopt(long, env = "MAX_POLLS")]
    max_polls: Option<u32>,

    /// Configure log level
    #[structopt(long, default_value = "info", env="LOG_LEVEL")]
    log_level: LevelFilter,
}

#[derive(Debug, PartialEq, StructOpt)]
pub enum Operations {
    /// Read device information
    Info,
    /// Clear the block protection bits
    Unlock,
    /// Read data from the device
    Read {
        /// Flash address for read start in hex
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,
        /// Length of flash read in bytes
        #[structopt()]
        length: u32,
    },
    /// Erase the sector containing the address and write data at its start
    Write {
        /// Flash address in hex, rounded down to a 4 KiB sector
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,

        // Data to write in hexadecimal
        #[structopt(long)]
        data: HexData,
    },
    /// Erase sector(s) starting at the specified address
    EraseSectors {
        /// Flash address for sector erase in hex
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,

        /// Number of sectors to erase
        #[structopt(long, default_value="1")]
        count: u32,
    },
    /// Dump flash into a hex file
    Dump {
        /// Flash address for read start in hex
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,

        /// Length of flash read in bytes
        #[structopt()]
        length: u32,

        /// Output ihex file
        #[structopt(long, default_value="dump.ihex")]
        file: String,
    },
    /// Load flash from a hex file
    Load {
        /// Input ihex file
        file: String,
    },
    /// Erase all data on the device
    EraseAll,
}

#[derive(Debug, PartialEq)]
pub struct HexData(Vec<u8>);

impl std::str::FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// Linux spidev channels, with chip select on a sysfs GPIO.
struct LinuxChannels {
    baud: u32,
    cs_pin: u64,
}

impl SpiChannels for LinuxChannels {
    type Spi = Spidev;
    type Cs = Pindev;

    fn find(&mut self, name: &str) -> Option<(Spidev, Pindev)> {
        let path = format!("/dev/{}", name);

        let mut spi = match Spidev::open(&path) {
            Ok(spi) => spi,
            Err(e) => {
                error!("Cannot open {}: {}", path, e);
                return None;
            }
        };

        let mut spi_config = spidev::SpidevOptions::new();
        spi_config.bits_per_word(8);
        spi_config.lsb_first(false);
        spi_config.mode(SpiModeFlags::SPI_MODE_0 | SpiModeFlags::SPI_NO_CS);
        spi_config.max_speed_hz(self.baud.min(MAX_CLOCK_HZ));
        if let Err(e) = spi.configure(&spi_config) {
            error!("Cannot configure {}: {}", path, e);
            return None;
        }

        let cs_pin = Pindev::new(self.cs_pin);
        let cs_ready = cs_pin
            .export()
            .and_then(|_| cs_pin.set_direction(Direction::High));
        if let Err(e) = cs_ready {
            error!("Cannot set up chip select GPIO {}: {}", self.cs_pin, e);
            return None;
        }

        Some((spi, cs_pin))
    }
}

fn main() {
    // Load options
    let opts = Options::from_args();

    // Setup logging
    if let Err(e) = TermLogger::init(opts.log_level, simplelog::Config::default(), TerminalMode::Mixed) {
        eprintln!("Cannot set up logging: {}", e);
    }

    let poll = opts.max_polls.map_or(PollPolicy::Unbounded, PollPolicy::MaxAttempts);
    let mut channels = LinuxChannels { baud: opts.spi_baud, cs_pin: opts.cs_pin };

    // Instantiate SPI flash
    let mut flash = match attach(&mut channels, "flash0", &opts.spi_dev, poll) {
        Ok(f) => f,
        Err(e) => {
            error!("Error initialising flash: {:?}", e);
            std::process::exit(1);
        }
    };

    // Perform the requested operation
    if let Err(e) = run(&mut flash, &opts.operation) {
        error!("{:?} failed: {:?}", opts.operation, e);
        std::process::exit(1);
    }
}

fn run(flash: &mut LinuxFlash, operation: &Operations) -> Result<(), LinuxError> {
    match operation {
        Operations::Info => {
            let mut geometry = Default::default();
            flash.control(Control::GetBlockGeometry(Some(&mut geometry)))?;

            info!("Part: {}", flash.part().name());
            info!("Flash ID: {:?}", flash.identification());
            info!("Status: {:?}", flash.read_status()?);
            info!(
                "Geometry: {} sectors of {} bytes ({} bytes total)",
                geometry.sector_count,
                geometry.bytes_per_sector,
                geometry.capacity()
            );
        },
        Operations::Unlock => {
            flash.open()?;

            info!("Status: {:?}", flash.read_status()?);
        },
        Operations::Read{address, length} => {
            info!("Reading {} bytes from address 0x{:08x}", length, address);

            let mut buff = vec![0u8; *length as usize];
            flash.read(*address, &mut buff)?;

            info!("Read: {:02x?}", buff);
        },
        Operations::Write{address, data} => {
            info!("Writing {} bytes to sector 0x{:08x}", data.0.len(), sector_base(*address));

            flash.open()?;
            flash.program_page(*address, &data.0)?;

            info!("Write complete");
        },
        Operations::EraseSectors{address, count} => {
            info!("Erasing {} sectors at address 0x{:08x}", count, address);

            flash.open()?;
            flash.erase_sectors(*address, *count as usize)?;

            info!("Sector erase complete")
        },
        Operations::EraseAll => {
            info!("Erasing all sectors");

            flash.open()?;
            flash.erase_all()?;

            info!("Full erase complete");
        },
        Operations::Dump{address, length, file} => {
            info!("Reading {} bytes from address 0x{:08x} to file {}", length, address, &file);

            let mut buff = vec![0u8; *length as usize];
            flash.read(*address, &mut buff)?;

            let mut records = Vec::new();
            let mut upper = None;
            for (c, chunk) in buff.chunks(32).enumerate() {
                let addr = *address + (c * 32) as u32;
                if upper != Some(addr >> 16) {
                    upper = Some(addr >> 16);
                    records.push(Record::ExtendedLinearAddress((addr >> 16) as u16));
                }
                records.push(Record::Data{ offset: addr as u16, value: chunk.to_vec() });
            }
            records.push(Record::EndOfFile);

            let data = match ihex::create_object_file_representation(&records) {
                Ok(data) => data,
                Err(e) => {
                    error!("Cannot encode dump: {:?}", e);
                    return Ok(())
                }
            };

            if let Err(e) = std::fs::write(file, data) {
                error!("Cannot write {}: {}", file, e);
                return Ok(())
            }

            info!("Dump complete");
        },
        Operations::Load{file} => {
            info!("Loading file {}", file);

            let data = match std::fs::read_to_string(&file) {
                Ok(data) => data,
                Err(e) => {
                    error!("Cannot read {}: {}", file, e);
                    return Ok(())
                }
            };

            // Every write erases a whole sector, so merge all records into
            // sector images first.
            let mut sectors: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
            let mut upper = 0u32;
            for record in Reader::new(&data) {
                match record {
                    Ok(Record::Data{offset, value}) => {
                        for (i, byte) in value.into_iter().enumerate() {
                            let addr = upper + offset as u32 + i as u32;
                            let base = sector_base(addr);
                            if !sectors.contains_key(&base) {
                                let mut image = vec![0u8; SECTOR_SIZE as usize];
                                flash.read(base, &mut image)?;
                                sectors.insert(base, image);
                            }
                            if let Some(image) = sectors.get_mut(&base) {
                                image[(addr - base) as usize] = byte;
                            }
                        }
                    },
                    Ok(Record::ExtendedLinearAddress(high)) => upper = (high as u32) << 16,
                    Ok(Record::EndOfFile) => (),
                    Err(e) => {
                        error!("Reader error: {:?}", e);
                        return Ok(())
                    }
                    _ => {
                        error!("Unrecognised record: {:?}", record);
                        return Ok(())
                    }
                }
            }

            flash.open()?;
            for (base, image) in &sectors {
                info!("Writing sector at address 0x{:08x}", base);
                flash.program_page(*base, image)?;
            }

            info!("Load complete");
        },
    }

    Ok(())
}
