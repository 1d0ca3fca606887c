//! APS6404 PSRAM access over a PIO state machine and two DMA channels.
//!
//! The chip is brought up in SPI mode, switched to QPI, and from then on
//! every access is a burst announced by a command triple (see [`command`]).
//! Above [`PAGE_CROSSING_MAX_HZ`] the chip cannot continue a burst across a
//! 1 KiB page boundary, so writes and reads are split into per-page bursts.
//! A write split inside a word finishes that word with a short burst pushed
//! directly into the FIFO.

pub mod command;

use core::fmt;
use core::hint::spin_loop;

use picovision_hal::{PsramEntry, PsramPort, PsramProgram, ProgramMemory};

use crate::arbiter::ProgramArbiter;
use crate::log;

use command::{CommandBuffer, CMD_READ, CMD_WRITE};

/// Size of one PSRAM page; bursts wrap inside a page at high clocks.
pub const PAGE_SIZE: u32 = 1024;
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;
/// Capacity of one APS6404.
pub const CHIP_SIZE: u32 = 8 * 1024 * 1024;

/// Below this system clock the slow timing program is used.
pub const SLOW_BELOW_HZ: u32 = 130_000_000;
/// Above this system clock the fast timing program is used.
pub const FAST_ABOVE_HZ: u32 = 296_000_000;
/// Highest system clock at which bursts may cross a page boundary.
pub const PAGE_CROSSING_MAX_HZ: u32 = 168_000_000;

/// Reset-enable, reset, enter-QPI, as (bit count - 1, command) pairs.
const RESET_SEQUENCE: [u32; 6] = [
    0x0000_0007,
    0x6600_0000,
    0x0000_0007,
    0x9900_0000,
    0x0000_0007,
    0x3500_0000,
];
const ENTER_QPI: [u32; 2] = [0x0000_0007, 0x3500_0000];
/// Exit-QPI, sent as two nibbles by the QPI reset program.
const EXIT_QPI: [u32; 2] = [0x0000_0001, 0xF500_0000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PsramError {
    /// A chained read needed more bursts than the command buffer holds.
    CommandBufferFull,
    /// A read address or buffer was not word-aligned.
    Unaligned,
}

impl fmt::Display for PsramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsramError::CommandBufferFull => write!(f, "PSRAM command buffer full"),
            PsramError::Unaligned => write!(f, "PSRAM read not word-aligned"),
        }
    }
}

/// Timing program for a given system clock.
pub const fn program_for_clock(hz: u32) -> PsramProgram {
    if hz < SLOW_BELOW_HZ {
        PsramProgram::QpiSlow
    } else if hz > FAST_ABOVE_HZ {
        PsramProgram::QpiFast
    } else {
        PsramProgram::QpiNormal
    }
}

/// Whether bursts may run across page boundaries at this clock.
pub const fn page_crossing_safe(hz: u32) -> bool {
    hz <= PAGE_CROSSING_MAX_HZ
}

/// Driver for one APS6404 behind a PIO state machine.
///
/// The `*_async` operations return once the transfer has been started; the
/// buffers they are handed must outlive the transfer, which the caller
/// guarantees by calling [`PsramEngine::wait_for_finish_blocking`] before
/// touching them again. Each has a blocking counterpart that does so itself.
pub struct PsramEngine<'a, M, P>
where
    M: ProgramMemory<Program = PsramProgram>,
    P: PsramPort,
{
    /// State machine, DMA channels and delay source.
    port: P,
    /// Shared instruction memory of the PIO block.
    arbiter: &'a ProgramArbiter<M>,
    /// Timing program currently loaded.
    program: PsramProgram,
    /// Load offset of that program in instruction memory.
    offset: u8,
    /// Whether the data channel is configured for writing.
    last_cmd_was_write: bool,
    /// Bursts may run across a 1 KiB page at this clock.
    page_crossing_ok: bool,
    /// Fill word the data channel reads during a repeat write.
    repeat_word: u32,
    /// Command words for chained reads.
    commands: CommandBuffer,
}

impl<'a, M, P> PsramEngine<'a, M, P>
where
    M: ProgramMemory<Program = PsramProgram>,
    P: PsramPort,
{
    /// Wrap a claimed state machine and channel pair. Nothing is sent to the
    /// chip until [`PsramEngine::init`].
    pub fn new(port: P, arbiter: &'a ProgramArbiter<M>) -> Self {
        Self {
            port,
            arbiter,
            program: PsramProgram::SpiReset,
            offset: 0,
            last_cmd_was_write: false,
            page_crossing_ok: true,
            repeat_word: 0,
            commands: CommandBuffer::new(),
        }
    }

    /// Reset the chip, put it in QPI mode and load the timing program for
    /// the current clock.
    pub fn init(&mut self) {
        self.port.sm_set_enabled(false);
        self.load(PsramProgram::SpiReset);
        self.port.delay_us(200);
        for word in RESET_SEQUENCE {
            self.port.sm_put_blocking(word);
        }
        self.port.delay_us(500);
        self.adjust_clock();
    }

    /// Enter QPI mode without a reset.
    pub fn set_qpi(&mut self) {
        self.port.sm_set_enabled(false);
        self.load(PsramProgram::SpiReset);
        for word in ENTER_QPI {
            self.port.sm_put_blocking(word);
        }
        while !self.port.sm_tx_fifo_empty() || self.port.sm_pc() != self.offset {
            spin_loop();
        }
        self.adjust_clock();
    }

    /// Leave QPI mode. The chip must be re-initialised before further use.
    pub fn set_spi(&mut self) {
        self.port.sm_set_enabled(false);
        self.load(PsramProgram::QpiReset);
        for word in EXIT_QPI {
            self.port.sm_put_blocking(word);
        }
    }

    /// Pick the timing program and page policy for the current system clock.
    /// Call after every clock change.
    pub fn adjust_clock(&mut self) {
        self.port.sm_set_enabled(false);
        let hz = self.port.system_clock_hz();
        self.load(program_for_clock(hz));
        self.last_cmd_was_write = false;
        self.page_crossing_ok = page_crossing_safe(hz);
        log::debug!(
            "psram: clock {} Hz, page crossing {}",
            hz,
            self.page_crossing_ok
        );
    }

    pub fn page_crossing_ok(&self) -> bool {
        self.page_crossing_ok
    }

    pub fn program(&self) -> PsramProgram {
        self.program
    }

    pub fn program_offset(&self) -> u8 {
        self.offset
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn delay_us(&mut self, us: u32) {
        self.port.delay_us(us);
    }

    fn load(&mut self, program: PsramProgram) {
        self.offset = self
            .arbiter
            .change_exclusive_program(self.port.block(), program);
        self.program = program;
        self.port.sm_init(program, self.offset);
    }

    fn issue(&mut self, count: u32, command: u32, entry: PsramEntry) {
        self.port.sm_put_blocking(count);
        self.port.sm_put_blocking(command);
        self.port
            .sm_put_blocking(self.offset as u32 + entry.offset() as u32);
    }

    fn prepare_write(&mut self) {
        if !self.last_cmd_was_write {
            self.last_cmd_was_write = true;
            self.wait_for_finish_blocking();
            self.port.data_configure_write();
        }
    }

    /// Start writing the first `len` bytes of `data` to `addr`.
    ///
    /// Bytes are taken from each word least significant first.
    ///
    /// # Safety
    ///
    /// `data` must not be modified or dropped until
    /// [`PsramEngine::wait_for_finish_blocking`] has returned.
    ///
    /// # Panics
    ///
    /// If `len` exceeds the bytes in `data`.
    pub unsafe fn write_async(&mut self, addr: u32, data: &[u32], len: u32) {
        assert!(len as usize <= data.len() * 4, "write longer than buffer");
        if len == 0 {
            return;
        }
        self.prepare_write();
        if self.page_crossing_ok {
            let mut addr = addr;
            let mut data = data;
            let mut remaining = len;
            while remaining > 0 {
                let chunk = remaining.min(PAGE_SIZE);
                self.burst_from(addr, data, chunk);
                addr += chunk;
                remaining -= chunk;
                data = &data[(chunk >> 2) as usize..];
            }
        } else {
            self.write_no_page_crossing(addr, data, len);
        }
    }

    /// Write and wait for completion.
    pub fn write(&mut self, addr: u32, data: &[u32], len: u32) {
        // SAFETY: the transfer is finished before `data` is released.
        unsafe { self.write_async(addr, data, len) };
        self.wait_for_finish_blocking();
    }

    unsafe fn write_no_page_crossing(&mut self, mut addr: u32, mut data: &[u32], mut len: u32) {
        let mut page_len = PAGE_SIZE - (addr & PAGE_MASK);
        if page_len & 3 != 0 {
            while len > page_len {
                self.burst_from(addr, data, page_len);
                len -= page_len;
                addr += page_len;
                data = &data[(page_len >> 2) as usize..];

                // The page ended inside data[0]; send the rest of that word,
                // shifted down, as its own burst at the start of the next
                // page. A remainder of one word or less rides along with it.
                let sent = page_len & 3;
                let tail = 4 - sent;
                let mut word = data[0] >> (8 * sent);
                let piece = if len <= 4 {
                    if len > tail {
                        word |= data[1] << (8 * tail);
                    }
                    len
                } else {
                    tail
                };
                self.wait_for_finish_blocking();
                self.issue(command::write_count(piece), CMD_WRITE | addr, PsramEntry::Write);
                self.port.sm_put_blocking(word.swap_bytes());
                if piece == 4 {
                    // Fully shifted out, so the program pulls a word to drop.
                    self.port.sm_put_blocking(0);
                }
                addr += piece;
                len -= piece;
                data = &data[1..];
                page_len = PAGE_SIZE - piece;
            }
        }

        page_len = page_len.min(len);
        while len > 0 {
            self.burst_from(addr, data, page_len);
            addr += page_len;
            len -= page_len;
            data = &data[(page_len >> 2) as usize..];
            page_len = PAGE_SIZE.min(len);
        }
    }

    /// One write burst of `bytes` bytes from the start of `data`.
    unsafe fn burst_from(&mut self, addr: u32, data: &[u32], bytes: u32) {
        self.wait_for_finish_blocking();
        self.port.data_set_read_increment(true);
        self.issue(command::write_count(bytes), CMD_WRITE | addr, PsramEntry::Write);
        let words = command::write_stream_words(bytes);
        if words as usize <= data.len() {
            self.port.data_start_write(data.as_ptr(), words);
        } else {
            // The payload ends on the last word of the buffer; the trailing
            // word the program discards must not be read from past it.
            self.port.data_start_write(data.as_ptr(), words - 1);
            self.wait_for_finish_blocking();
            self.port.sm_put_blocking(0);
        }
    }

    /// Start filling `len` bytes at `addr` with the little-endian bytes of
    /// `word`, repeated.
    ///
    /// # Safety
    ///
    /// The engine must not be moved until
    /// [`PsramEngine::wait_for_finish_blocking`] has returned; the channel
    /// reads the fill word from inside it.
    pub unsafe fn write_repeat_async(&mut self, addr: u32, word: u32, len: u32) {
        if len == 0 {
            return;
        }
        self.prepare_write();
        let mut addr = addr;
        let mut len = len;
        let mut word = word;
        let mut first_page_len = PAGE_SIZE;
        if !self.page_crossing_ok {
            first_page_len -= addr & PAGE_MASK;
            if first_page_len & 3 != 0 && len > first_page_len {
                self.repeat_burst(addr, word, first_page_len);
                len -= first_page_len;
                addr += first_page_len;
                // Realign the pattern to the new page start.
                word = word.rotate_right(8 * (first_page_len & 3));
                first_page_len = PAGE_SIZE;
            }
        }

        let mut page_len = first_page_len.min(len);
        while len > 0 {
            self.repeat_burst(addr, word, page_len);
            addr += page_len;
            len -= page_len;
            page_len = PAGE_SIZE.min(len);
        }
    }

    /// Fill and wait for completion.
    pub fn write_repeat(&mut self, addr: u32, word: u32, len: u32) {
        // SAFETY: `self` is borrowed for the whole transfer.
        unsafe { self.write_repeat_async(addr, word, len) };
        self.wait_for_finish_blocking();
    }

    unsafe fn repeat_burst(&mut self, addr: u32, word: u32, bytes: u32) {
        self.wait_for_finish_blocking();
        self.port.data_set_read_increment(false);
        self.repeat_word = word;
        self.issue(command::write_count(bytes), CMD_WRITE | addr, PsramEntry::Write);
        self.port.data_start_write(
            &self.repeat_word as *const u32,
            command::write_stream_words(bytes),
        );
    }

    fn start_read(&mut self, dst: *mut u32, words: u32, chain_to: Option<u8>) {
        self.last_cmd_was_write = false;
        self.wait_for_finish_blocking();
        // SAFETY: callers hand in a destination that outlives the transfer.
        unsafe { self.port.data_start_read(dst, words, chain_to) };
    }

    /// Start reading `buf.len()` words from the word-aligned `addr`.
    ///
    /// # Safety
    ///
    /// `buf` must not be accessed until
    /// [`PsramEngine::wait_for_finish_blocking`] has returned.
    pub unsafe fn read_async(&mut self, addr: u32, buf: &mut [u32]) -> Result<(), PsramError> {
        if addr & 3 != 0 {
            return Err(PsramError::Unaligned);
        }
        let words = buf.len() as u32;
        if words == 0 {
            return Ok(());
        }
        let bytes = words * 4;
        // Finishes any chained read still using the command buffer.
        self.wait_for_finish_blocking();
        if command::first_piece(addr, bytes, self.page_crossing_ok) >= bytes {
            self.start_read(buf.as_mut_ptr(), words, None);
            self.issue(command::read_count(bytes), CMD_READ | addr, PsramEntry::Read);
        } else {
            self.commands.clear();
            self.commands
                .push_read(addr, bytes, self.page_crossing_ok, self.offset)?;
            self.start_read(buf.as_mut_ptr(), words, None);
            self.start_commands();
        }
        Ok(())
    }

    /// Read and wait for completion.
    pub fn read_blocking(&mut self, addr: u32, buf: &mut [u32]) -> Result<(), PsramError> {
        // SAFETY: the transfer is finished before `buf` is released.
        unsafe { self.read_async(addr, buf)? };
        self.wait_for_finish_blocking();
        Ok(())
    }

    /// Start a gather read: `lengths[i]` words from `addresses[i]`, packed
    /// back to back into `buf`. On completion the data channel triggers
    /// `chain_to`, if given.
    ///
    /// # Safety
    ///
    /// `buf` must not be accessed until
    /// [`PsramEngine::wait_for_finish_blocking`] has returned.
    ///
    /// # Panics
    ///
    /// If the slices differ in length or the total exceeds `buf`.
    pub unsafe fn multi_read_async(
        &mut self,
        addresses: &[u32],
        lengths: &[u32],
        buf: &mut [u32],
        chain_to: Option<u8>,
    ) -> Result<(), PsramError> {
        assert_eq!(addresses.len(), lengths.len(), "address/length mismatch");
        if addresses.iter().any(|a| a & 3 != 0) {
            return Err(PsramError::Unaligned);
        }
        self.wait_for_finish_blocking();
        self.commands.clear();
        let mut total = 0u32;
        for (&addr, &len) in addresses.iter().zip(lengths) {
            total += len;
            self.commands
                .push_read(addr, len * 4, self.page_crossing_ok, self.offset)?;
        }
        assert!(total as usize <= buf.len(), "gather read longer than buffer");
        if total == 0 {
            return Ok(());
        }
        self.start_read(buf.as_mut_ptr(), total, chain_to);
        self.start_commands();
        Ok(())
    }

    /// Gather read and wait for completion.
    pub fn multi_read_blocking(
        &mut self,
        addresses: &[u32],
        lengths: &[u32],
        buf: &mut [u32],
    ) -> Result<(), PsramError> {
        // SAFETY: the transfer is finished before `buf` is released.
        unsafe { self.multi_read_async(addresses, lengths, buf, None)? };
        self.wait_for_finish_blocking();
        Ok(())
    }

    fn start_commands(&mut self) {
        let words = self.commands.as_slice();
        // SAFETY: the buffer is only rewritten after waiting for the data
        // channel, which finishes after the command channel has drained.
        unsafe {
            self.port
                .command_start(words.as_ptr(), words.len() as u32)
        };
    }

    /// Spin until the data channel is idle.
    pub fn wait_for_finish_blocking(&self) {
        while self.port.data_busy() {
            spin_loop();
        }
    }

    /// Cancel the in-flight data transfer.
    pub fn abort(&mut self) {
        log::warn!("psram: aborting transfer");
        self.port.data_abort();
    }
}
