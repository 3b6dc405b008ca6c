//! A Nucleo-64 F401 example that dumps SST25VF flash contents to a USART.
//!
//! The flash chip is connected to the canonical SPI port on the Arduino-style
//! connector, with chip select on PA9:
//!
//! *  SCK = D13 = PA5
//! * MISO = D12 = PA6
//! * MOSI = D11 = PA7
//!
//! The chip size is taken from its JEDEC ID. The data is dumped in
//! hexadecimal format through USART2 (TX = D1 = PA2), one sector per line.
//!
//! Build with `--features stm32-demo --target thumbv7em-none-eabihf`.

#![no_std]
#![no_main]

extern crate panic_semihosting;

use cortex_m_rt::entry;
use cortex_m_semihosting::hprintln;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial::Write;
use stm32f4xx_hal::gpio::GpioExt;
use stm32f4xx_hal::rcc::RccExt;
use stm32f4xx_hal::serial::{self, Serial};
use stm32f4xx_hal::spi::Spi;
use stm32f4xx_hal::stm32 as pac;
use stm32f4xx_hal::time::{Bps, MegaHertz};

use sst25vf::prelude::*;
use sst25vf::sst25vf::Flash;
use sst25vf::{Control, SPI_MODE};

use core::fmt::Write as _;

/// Serial baudrate.
const BAUDRATE: u32 = 912600;

fn print<'a, E>(buf: &[u8], w: &'a mut (dyn Write<u8, Error = E> + 'static)) {
    for c in buf {
        write!(w, "{:02X}", c).unwrap();
    }
    writeln!(w).unwrap();
}

#[entry]
fn main() -> ! {
    let periph = pac::Peripherals::take().unwrap();
    let clocks = periph.RCC.constrain().cfgr.freeze();
    let gpioa = periph.GPIOA.split();

    let cs = {
        let mut cs = gpioa.pa9.into_push_pull_output();
        cs.set_high().unwrap(); // deselect
        cs
    };

    let spi = {
        let sck = gpioa.pa5.into_alternate_af5();
        let miso = gpioa.pa6.into_alternate_af5();
        let mosi = gpioa.pa7.into_alternate_af5();

        Spi::spi1(
            periph.SPI1,
            (sck, miso, mosi),
            SPI_MODE,
            MegaHertz(1).into(),
            clocks,
        )
    };

    let mut serial = {
        let tx = gpioa.pa2.into_alternate_af7();

        let config = serial::config::Config {
            baudrate: Bps(BAUDRATE),
            ..Default::default()
        };
        Serial::usart2(periph.USART2, (tx, serial::NoRx), config, clocks).unwrap()
    };

    let mut flash = Flash::init(spi, cs).unwrap();
    hprintln!("{} {:?}", flash.part().name(), flash.identification()).ok();

    let mut geometry = Default::default();
    flash
        .control(Control::GetBlockGeometry(Some(&mut geometry)))
        .unwrap();

    let mut buf = [0; 4096];
    for sector in 0..geometry.sector_count {
        flash.read_blocks(sector, &mut buf, 1).unwrap();
        print(&buf, &mut serial);
    }

    hprintln!("DONE").ok();

    loop {}
}
