//! A simulated SST25VF chip for tests.
//!
//! `SimSpi` and `SimCs` share one `Chip`. Bytes clocked while chip select is
//! low are collected into a frame; the frame is executed when chip select
//! goes high, and recorded (MOSI side) in `Chip::trace`.

use core::convert::Infallible;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

#[derive(Debug)]
pub struct Chip {
    pub id: [u8; 3],
    pub memory: Vec<u8>,
    /// Block protection bits BP0..BP3. Program and erase are ignored while
    /// any are set.
    pub protect: u8,
    /// Number of status reads that report busy after each program or erase.
    pub busy_polls: u32,
    /// Status bytes returned before the modelled status.
    pub status_script: VecDeque<u8>,
    pub stuck_busy: bool,
    /// Fail every transfer after this many have succeeded.
    pub fail_after: Option<usize>,
    pub transfers: usize,
    pub selected: bool,
    pub trace: Vec<Vec<u8>>,
    wel: bool,
    ewsr: bool,
    aai: Option<u32>,
    busy_left: u32,
    last_status: u8,
    frame: Vec<u8>,
}

pub type Shared = Rc<RefCell<Chip>>;

#[derive(Debug)]
pub struct SimSpi(Shared);

#[derive(Debug)]
pub struct SimCs(Shared);

pub fn with_id(id: [u8; 3], size: usize) -> (Shared, SimSpi, SimCs) {
    let chip = Rc::new(RefCell::new(Chip {
        id,
        memory: vec![0xFF; size],
        protect: 0,
        busy_polls: 2,
        status_script: VecDeque::new(),
        stuck_busy: false,
        fail_after: None,
        transfers: 0,
        selected: false,
        trace: Vec::new(),
        wel: false,
        ewsr: false,
        aai: None,
        busy_left: 0,
        last_status: 0,
        frame: Vec::new(),
    }));
    (chip.clone(), SimSpi(chip.clone()), SimCs(chip))
}

/// A chip of the family with the given capacity code.
pub fn sst25vf(capacity_code: u8) -> (Shared, SimSpi, SimCs) {
    let size = match capacity_code {
        0x41 => 2 << 20,
        0x4A => 4 << 20,
        0x4B => 8 << 20,
        _ => 0x1000,
    };
    with_id([0xBF, 0x25, capacity_code], size)
}

/// Replaces each run of status reads in `trace` with a single `[0x05]`.
pub fn collapse_polls(trace: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = Vec::new();
    for cmd in trace {
        if cmd[0] == 0x05 {
            if out.last().map_or(false, |last| last[0] == 0x05) {
                continue;
            }
            out.push(vec![0x05]);
        } else {
            out.push(cmd.clone());
        }
    }
    out
}

fn address(frame: &[u8]) -> u32 {
    (frame[1] as u32) << 16 | (frame[2] as u32) << 8 | frame[3] as u32
}

impl Chip {
    fn status(&mut self) -> u8 {
        if let Some(status) = self.status_script.pop_front() {
            return status;
        }
        let busy = self.stuck_busy || self.busy_left > 0;
        self.busy_left = self.busy_left.saturating_sub(1);
        busy as u8 | (self.wel as u8) << 1 | self.protect << 2 | (self.aai.is_some() as u8) << 6
    }

    fn shift(&mut self, mosi: u8) -> u8 {
        let idx = self.frame.len();
        self.frame.push(mosi);
        if idx == 0 {
            return 0xFF;
        }

        let len = self.memory.len();
        match self.frame[0] {
            0x05 => {
                if idx == 1 {
                    self.last_status = self.status();
                }
                self.last_status
            }
            0x9F => self.id.get(idx - 1).copied().unwrap_or(0xFF),
            0x03 if idx >= 4 => self.memory[(address(&self.frame) as usize + idx - 4) % len],
            0x0B if idx >= 5 => self.memory[(address(&self.frame) as usize + idx - 5) % len],
            _ => 0xFF,
        }
    }

    fn program(&mut self, addr: u32, byte: u8) {
        let len = self.memory.len();
        if self.protect == 0 {
            self.memory[addr as usize % len] &= byte;
        }
    }

    fn start_busy(&mut self) {
        self.busy_left = self.busy_polls;
    }

    fn execute(&mut self) {
        let frame = std::mem::replace(&mut self.frame, Vec::new());
        if frame.is_empty() {
            return;
        }
        self.trace.push(frame.clone());

        let opcode = frame[0];
        match opcode {
            0x05 | 0x9F | 0x03 | 0x0B => return,
            _ if self.busy_left > 0 => panic!("command {:02X} issued while busy", opcode),
            _ => {}
        }

        match opcode {
            0x06 => self.wel = true,
            0x04 => {
                self.wel = false;
                self.aai = None;
            }
            0x50 => self.ewsr = true,
            0x01 => {
                assert_eq!(frame.len(), 2);
                if self.ewsr || self.wel {
                    self.protect = (frame[1] >> 2) & 0x0F;
                }
                self.ewsr = false;
                self.wel = false;
            }
            0x80 | 0x70 => {}
            0x20 => {
                assert_eq!(frame.len(), 4);
                assert!(self.wel, "erase without write enable");
                if self.protect == 0 {
                    let start = address(&frame) as usize & !0xFFF;
                    self.memory[start..start + 0x1000]
                        .iter_mut()
                        .for_each(|b| *b = 0xFF);
                }
                self.wel = false;
                self.start_busy();
            }
            0xC7 => {
                assert!(self.wel, "chip erase without write enable");
                if self.protect == 0 {
                    self.memory.iter_mut().for_each(|b| *b = 0xFF);
                }
                self.wel = false;
                self.start_busy();
            }
            0x02 => {
                assert_eq!(frame.len(), 5);
                assert!(self.wel, "byte program without write enable");
                assert!(self.aai.is_none(), "byte program in AAI mode");
                self.program(address(&frame), frame[4]);
                self.wel = false;
                self.start_busy();
            }
            0xAD => {
                let next = match self.aai {
                    Some(next) => {
                        assert_eq!(frame.len(), 3, "continued AAI carries data only");
                        self.program(next, frame[1]);
                        self.program(next + 1, frame[2]);
                        next + 2
                    }
                    None => {
                        assert_eq!(frame.len(), 6, "first AAI carries an address");
                        assert!(self.wel, "AAI program without write enable");
                        let addr = address(&frame);
                        assert_eq!(addr & 1, 0, "AAI address must be even");
                        self.program(addr, frame[4]);
                        self.program(addr + 1, frame[5]);
                        addr + 2
                    }
                };
                self.aai = Some(next);
                self.start_busy();
            }
            other => panic!("unknown command {:02X}", other),
        }
    }
}

impl Transfer<u8> for SimSpi {
    type Error = SimError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], SimError> {
        let mut chip = self.0.borrow_mut();
        chip.transfers += 1;
        if let Some(limit) = chip.fail_after {
            if chip.transfers > limit {
                return Err(SimError);
            }
        }
        assert!(chip.selected, "transfer without chip select");

        for word in words.iter_mut() {
            *word = chip.shift(*word);
        }
        Ok(words)
    }
}

impl OutputPin for SimCs {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut chip = self.0.borrow_mut();
        assert!(!chip.selected, "chip select asserted twice");
        chip.selected = true;
        chip.frame.clear();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut chip = self.0.borrow_mut();
        if chip.selected {
            chip.selected = false;
            chip.execute();
        }
        Ok(())
    }
}
