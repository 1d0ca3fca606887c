#![no_std]
//! Platform abstraction for the PicoVision memory subsystem.
//!
//! The core drivers are generic over these traits. The RP2040 firmware
//! implements them on top of PIO, DMA and I2C registers; the `aps6404-model`
//! crate implements them with a behavioural model of the board so the
//! drivers can be exercised on the host.

use core::sync::atomic::{AtomicBool, Ordering};

/// One of the two PIO blocks on the RP2040.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PioBlock {
    Pio0,
    Pio1,
}

impl PioBlock {
    /// Slot index used by per-block registries.
    pub const fn index(self) -> usize {
        match self {
            PioBlock::Pio0 => 0,
            PioBlock::Pio1 => 1,
        }
    }
}

/// The PSRAM timing programs.
///
/// `SpiReset` drives a single data line and is used to bring the chip out of
/// reset and into QPI mode. `QpiReset` sends single commands in QPI mode
/// (used to leave QPI). The three QPI variants share one instruction layout
/// and differ only in timing, so [`PsramEntry`] offsets apply to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsramProgram {
    SpiReset,
    QpiReset,
    QpiSlow,
    QpiNormal,
    QpiFast,
}

impl PsramProgram {
    /// True for the programs that understand burst read/write commands.
    pub const fn is_qpi_transfer(self) -> bool {
        matches!(
            self,
            PsramProgram::QpiSlow | PsramProgram::QpiNormal | PsramProgram::QpiFast
        )
    }
}

/// Jump targets inside the QPI transfer programs, relative to the load offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsramEntry {
    Write,
    Read,
    ReadOne,
}

impl PsramEntry {
    /// Instruction offset of this entry point from the start of the program.
    pub const fn offset(self) -> u8 {
        match self {
            PsramEntry::Write => 6,
            PsramEntry::Read => 9,
            PsramEntry::ReadOne => 18,
        }
    }
}

/// PIO instruction memory, shared by every state machine of a block.
pub trait ProgramMemory {
    type Program: Copy + PartialEq + core::fmt::Debug;

    /// Load `program` into `block` and return its offset.
    ///
    /// Implementations panic when the program does not fit; there is no
    /// recovery from that at board bring-up.
    fn add_program(&mut self, block: PioBlock, program: Self::Program) -> u8;

    /// Free the instruction memory used by `program` at `offset`.
    fn remove_program(&mut self, block: PioBlock, program: Self::Program, offset: u8);
}

/// One PIO state machine wired to a PSRAM chip, plus the two DMA channels
/// that feed it.
///
/// The data channel moves payload between memory and the state machine
/// FIFOs. The command channel streams pre-built command words into the TX
/// FIFO for chained multi-region reads.
pub trait PsramPort {
    /// PIO block the state machine belongs to.
    fn block(&self) -> PioBlock;

    fn sm_set_enabled(&mut self, enabled: bool);

    /// Configure pins, shifting and clock divider for `program` loaded at
    /// `offset`, jump to the start and enable the state machine.
    fn sm_init(&mut self, program: PsramProgram, offset: u8);

    /// Push one word into the TX FIFO, waiting for space.
    fn sm_put_blocking(&mut self, word: u32);

    fn sm_tx_fifo_empty(&self) -> bool;

    /// Current program counter of the state machine.
    fn sm_pc(&self) -> u8;

    /// Current system clock in Hz.
    fn system_clock_hz(&self) -> u32;

    fn delay_us(&mut self, us: u32);

    /// Point the data channel at the TX FIFO with byte swapping enabled.
    fn data_configure_write(&mut self);

    /// Enable or disable read-address increment on the data channel. With it
    /// disabled the channel repeats its first source word.
    fn data_set_read_increment(&mut self, increment: bool);

    /// Start streaming `words` words from `src` into the TX FIFO.
    ///
    /// # Safety
    ///
    /// `src` must stay valid for `words` reads (or one read when read
    /// increment is off) until [`PsramPort::data_busy`] reports false.
    unsafe fn data_start_write(&mut self, src: *const u32, words: u32);

    /// Configure the data channel to drain the RX FIFO into `dst` with byte
    /// swapping, optionally chaining to another channel on completion, and
    /// start it.
    ///
    /// # Safety
    ///
    /// `dst` must stay valid for `words` writes and must not be accessed
    /// until [`PsramPort::data_busy`] reports false.
    unsafe fn data_start_read(&mut self, dst: *mut u32, words: u32, chain_to: Option<u8>);

    fn data_busy(&self) -> bool;

    /// Cancel any in-flight data transfer.
    fn data_abort(&mut self);

    /// Stream `words` command words from `src` into the TX FIFO.
    ///
    /// # Safety
    ///
    /// `src` must stay valid until the command channel has drained, which
    /// is no later than the data channel finishing the matching read.
    unsafe fn command_start(&mut self, src: *const u32, words: u32);
}

/// Register-style side channel to the display coprocessor.
pub trait ControlBus {
    type Error: core::fmt::Debug;

    fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), Self::Error>;

    fn read_register(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Host-side handle on the RAM_SEL line choosing which PSRAM chip the host
/// is connected to. The coprocessor always scans out the other chip.
pub trait BankSelect {
    /// Drive RAM_SEL to `bank` (0 or 1).
    fn select(&mut self, bank: u8);

    /// Called on every spin while waiting for the vsync interrupt to switch
    /// banks. Host environments use it to poll their own events.
    fn relax(&mut self) {
        core::hint::spin_loop();
    }
}

/// Handshake between `flip_async` and the vsync interrupt.
///
/// The host arms the signal once the finished bank is fully written; the
/// interrupt handler toggles RAM_SEL on the next rising vsync edge and clears
/// it. This flag is the only state shared with interrupt context.
#[derive(Debug)]
pub struct FlipSignal {
    armed: AtomicBool,
}

impl Default for FlipSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl FlipSignal {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
        }
    }

    /// Request a bank switch on the next vsync.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Interrupt-side half of the handshake. Runs `toggle` and disarms if a
    /// switch was requested; returns whether it did.
    pub fn service(&self, toggle: impl FnOnce()) -> bool {
        if self.armed.load(Ordering::Acquire) {
            toggle();
            self.armed.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }
}
