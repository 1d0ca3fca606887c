//! Behavioural model of the PicoVision memory path.
//!
//! Two APS6404 chips sit behind a RAM_SEL switch: the host's PIO state
//! machine talks to one while the display coprocessor scans out the other.
//! [`SimBoard`] models the chips, the PSRAM PIO programs at word level, the
//! data and command DMA channels, and the vsync interrupt that swaps banks.
//! It hands out implementations of the `picovision-hal` traits so the core
//! drivers run unchanged on the host, and records every burst together with
//! any rule the host broke (page crossings at high clock, bursts outside QPI
//! mode, stalled reads).

mod board;
mod chip;
mod coprocessor;
mod decoder;
mod error;
mod port;

use std::cell::RefCell;
use std::rc::Rc;

use picovision_hal::{FlipSignal, PioBlock, PsramProgram};

pub use board::{Burst, BurstKind, ChipCommand, PAGE_CROSSING_MAX_HZ};
pub use chip::{ChipMode, CHIP_SIZE, PAGE_SIZE};
pub use coprocessor::{CoprocessorState, SimCoprocessor, SpriteSlot};
pub use decoder::program_len;
pub use error::ModelError;
pub use port::{SimBankSelect, SimProgramMemory, SimPsramPort, PSRAM_PIO};

use board::Board;

pub(crate) struct Shared {
    flip: FlipSignal,
    board: RefCell<Board>,
}

impl Shared {
    fn vsync(&self) -> bool {
        let mut board = self.board.borrow_mut();
        board.vsyncs += 1;
        self.flip.service(|| board.ram_sel ^= 1)
    }
}

/// The modelled board. Cloning yields another handle on the same state.
#[derive(Clone)]
pub struct SimBoard {
    shared: Rc<Shared>,
}

impl SimBoard {
    /// Both chips powered on in SPI mode with the system clock at
    /// `clock_hz`.
    pub fn new(clock_hz: u32) -> Self {
        Self {
            shared: Rc::new(Shared {
                flip: FlipSignal::new(),
                board: RefCell::new(Board::new(clock_hz)),
            }),
        }
    }

    pub fn psram_port(&self) -> SimPsramPort {
        SimPsramPort {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn program_memory(&self) -> SimProgramMemory {
        SimProgramMemory {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn bank_select(&self) -> SimBankSelect {
        SimBankSelect {
            shared: Rc::clone(&self.shared),
        }
    }

    /// The flag shared with the vsync interrupt.
    pub fn flip_signal(&self) -> &FlipSignal {
        &self.shared.flip
    }

    /// Raise the vsync interrupt. Returns whether it swapped banks.
    pub fn vsync(&self) -> bool {
        self.shared.vsync()
    }

    pub fn vsync_count(&self) -> u32 {
        self.shared.board.borrow().vsyncs
    }

    /// Whether waiting for a flip raises vsync straight away. On by default;
    /// turn it off to drive vsync from the test.
    pub fn set_auto_vsync(&self, on: bool) {
        self.shared.board.borrow_mut().auto_vsync = on;
    }

    pub fn clock_hz(&self) -> u32 {
        self.shared.board.borrow().clock_hz
    }

    /// Change the system clock. The driver must be told via `adjust_clock`.
    pub fn set_clock_hz(&self, hz: u32) {
        self.shared.board.borrow_mut().clock_hz = hz;
    }

    /// Chip the host is connected to.
    pub fn ram_sel(&self) -> u8 {
        self.shared.board.borrow().ram_sel
    }

    /// Chip the coprocessor is scanning out.
    pub fn displayed_chip(&self) -> u8 {
        self.ram_sel() ^ 1
    }

    pub fn chip_mode(&self, chip: u8) -> ChipMode {
        self.shared.board.borrow().chips[chip as usize & 1].mode()
    }

    pub fn chip_resets(&self, chip: u8) -> u32 {
        self.shared.board.borrow().chips[chip as usize & 1].resets()
    }

    /// Read chip contents directly, bypassing the state machine.
    pub fn read_chip(&self, chip: u8, addr: u32, buf: &mut [u8]) {
        self.shared.board.borrow().chips[chip as usize & 1].read(addr, buf);
    }

    pub fn read_chip_u32(&self, chip: u8, addr: u32) -> u32 {
        let mut b = [0u8; 4];
        self.read_chip(chip, addr, &mut b);
        u32::from_le_bytes(b)
    }

    /// Write chip contents directly, bypassing the state machine.
    pub fn write_chip(&self, chip: u8, addr: u32, data: &[u8]) {
        self.shared.board.borrow_mut().chips[chip as usize & 1].write(addr, data);
    }

    pub fn bursts(&self) -> Vec<Burst> {
        self.shared.board.borrow().bursts.clone()
    }

    pub fn clear_bursts(&self) {
        self.shared.board.borrow_mut().bursts.clear();
    }

    pub fn chip_commands(&self) -> Vec<ChipCommand> {
        self.shared.board.borrow().commands.clone()
    }

    pub fn errors(&self) -> Vec<ModelError> {
        self.shared.board.borrow().errors.clone()
    }

    pub fn take_errors(&self) -> Vec<ModelError> {
        std::mem::take(&mut self.shared.board.borrow_mut().errors)
    }

    /// Sum of all delays the host asked for.
    pub fn elapsed_us(&self) -> u64 {
        self.shared.board.borrow().elapsed_us
    }

    pub fn program_loads(&self) -> u32 {
        self.shared.board.borrow().program_loads
    }

    pub fn resident_programs(&self, block: PioBlock) -> Vec<(PsramProgram, u8)> {
        self.shared.board.borrow().resident[block.index()].clone()
    }

    /// Channels triggered by completed chained reads, in order.
    pub fn chained_channels(&self) -> Vec<u8> {
        self.shared.board.borrow().chained.clone()
    }
}
