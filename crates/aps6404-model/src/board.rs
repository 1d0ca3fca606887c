//! Shared state of the modelled board: both chips, the PIO state machine and
//! the DMA channels feeding it.

use std::collections::VecDeque;

use picovision_hal::{PioBlock, PsramProgram};

use crate::chip::{Chip, PAGE_SIZE};
use crate::decoder::{program_len, Decoder, Event};
use crate::error::ModelError;

/// Above this clock a burst wraps at the page boundary instead of crossing it.
pub const PAGE_CROSSING_MAX_HZ: u32 = 168_000_000;
/// Instruction slots in one PIO block.
pub const PIO_INSTRUCTIONS: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstKind {
    Write,
    Read,
}

/// One transfer as seen on the chip's pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    pub chip: u8,
    pub kind: BurstKind,
    pub addr: u32,
    pub len: u32,
    /// A flip was pending while the burst ran.
    pub flip_armed: bool,
}

/// A control command that reached a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipCommand {
    pub chip: u8,
    pub command: u8,
}

struct ReadTarget {
    dst: *mut u32,
    remaining: u32,
    chain_to: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct WriteCursor {
    chip: u8,
    addr: u32,
    wrap: bool,
}

pub(crate) struct Board {
    pub chips: [Chip; 2],
    pub ram_sel: u8,
    pub clock_hz: u32,
    pub elapsed_us: u64,
    pub resident: [Vec<(PsramProgram, u8)>; 2],
    pub program_loads: u32,
    pub bursts: Vec<Burst>,
    pub commands: Vec<ChipCommand>,
    pub errors: Vec<ModelError>,
    pub chained: Vec<u8>,
    pub auto_vsync: bool,
    pub vsyncs: u32,
    sm_enabled: bool,
    decoder: Option<Decoder>,
    write_configured: bool,
    read_increment: bool,
    cursor: Option<WriteCursor>,
    isr: Vec<u8>,
    rx: Option<ReadTarget>,
    rx_fifo: VecDeque<u32>,
}

impl Board {
    pub fn new(clock_hz: u32) -> Self {
        Self {
            chips: [Chip::new(), Chip::new()],
            ram_sel: 0,
            clock_hz,
            elapsed_us: 0,
            resident: [Vec::new(), Vec::new()],
            program_loads: 0,
            bursts: Vec::new(),
            commands: Vec::new(),
            errors: Vec::new(),
            chained: Vec::new(),
            auto_vsync: true,
            vsyncs: 0,
            sm_enabled: false,
            decoder: None,
            write_configured: false,
            read_increment: true,
            cursor: None,
            isr: Vec::with_capacity(4),
            rx: None,
            rx_fifo: VecDeque::new(),
        }
    }

    // ---- PIO instruction memory ----

    pub fn add_program(&mut self, block: PioBlock, program: PsramProgram) -> Option<u8> {
        let len = program_len(program);
        let used = &self.resident[block.index()];
        let fits = |start: u8| {
            used.iter().all(|&(p, at)| {
                let end = at + program_len(p);
                start + len <= at || start >= end
            })
        };
        let offset = (0..=PIO_INSTRUCTIONS - len).find(|&s| fits(s))?;
        self.resident[block.index()].push((program, offset));
        self.program_loads += 1;
        Some(offset)
    }

    pub fn remove_program(&mut self, block: PioBlock, program: PsramProgram, offset: u8) {
        self.resident[block.index()].retain(|&entry| entry != (program, offset));
    }

    // ---- state machine ----

    pub fn sm_init(&mut self, block: PioBlock, program: PsramProgram, offset: u8) {
        if !self.resident[block.index()].contains(&(program, offset)) {
            self.errors
                .push(ModelError::ProgramNotLoaded { program, offset });
        }
        self.decoder = Some(Decoder::new(program, offset));
        self.cursor = None;
        self.isr.clear();
        self.sm_enabled = true;
    }

    pub fn sm_set_enabled(&mut self, enabled: bool) {
        self.sm_enabled = enabled;
    }

    pub fn sm_pc(&self) -> u8 {
        match &self.decoder {
            Some(d) if d.is_idle() => d.offset(),
            Some(d) => d.offset() + 1,
            None => 0,
        }
    }

    /// A word arriving in the TX FIFO, from the CPU or either DMA channel.
    pub fn push_word(&mut self, word: u32, flip_armed: bool) {
        if !self.sm_enabled {
            self.errors.push(ModelError::StateMachineDisabled);
            return;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            self.errors.push(ModelError::StateMachineDisabled);
            return;
        };
        let event = decoder.push(word);
        self.handle(event, flip_armed);
    }

    fn handle(&mut self, event: Event, flip_armed: bool) {
        let chip = self.ram_sel;
        match event {
            Event::Idle => {}
            Event::Control { command, bits } => {
                if bits >= 8 && self.chips[chip as usize].control(command) {
                    self.commands.push(ChipCommand { chip, command });
                }
            }
            Event::StartWrite { addr, bytes } => {
                let wrap = self.check_transfer(chip, addr, bytes, BurstKind::Write, flip_armed);
                self.cursor = Some(WriteCursor { chip, addr, wrap });
            }
            Event::WriteData { index, data, len } => {
                if let Some(cursor) = self.cursor {
                    let chip = &mut self.chips[cursor.chip as usize];
                    for (i, &byte) in data[..len as usize].iter().enumerate() {
                        let at = Chip::burst_address(cursor.addr, index + i as u32, cursor.wrap);
                        chip.write_byte(at, byte);
                    }
                }
            }
            Event::Read { addr, bytes } => {
                let wrap = self.check_transfer(chip, addr, bytes, BurstKind::Read, flip_armed);
                for i in 0..bytes {
                    let at = Chip::burst_address(addr, i, wrap);
                    let byte = self.chips[chip as usize].read_byte(at);
                    self.isr.push(byte);
                    if self.isr.len() == 4 {
                        let word = u32::from_le_bytes([self.isr[0], self.isr[1], self.isr[2], self.isr[3]]);
                        self.isr.clear();
                        self.deliver(word);
                    }
                }
            }
            Event::Fault(err) => self.errors.push(err),
        }
    }

    /// Record a burst and the rule violations it commits. Returns whether
    /// the chip wraps it inside its page.
    fn check_transfer(
        &mut self,
        chip: u8,
        addr: u32,
        len: u32,
        kind: BurstKind,
        flip_armed: bool,
    ) -> bool {
        if self.chips[chip as usize].mode() != crate::ChipMode::Qpi {
            let command = match kind {
                BurstKind::Write => crate::decoder::CMD_WRITE,
                BurstKind::Read => crate::decoder::CMD_READ,
            };
            self.errors.push(ModelError::NotInQpiMode { chip, command });
        }
        let wrap = self.clock_hz > PAGE_CROSSING_MAX_HZ;
        if wrap && (addr & (PAGE_SIZE - 1)) + len > PAGE_SIZE {
            self.errors.push(ModelError::PageCrossing {
                addr,
                len,
                clock_hz: self.clock_hz,
            });
        }
        self.bursts.push(Burst {
            chip,
            kind,
            addr,
            len,
            flip_armed,
        });
        wrap
    }

    fn deliver(&mut self, word: u32) {
        match self.rx.as_mut() {
            Some(rx) => {
                // SAFETY: `data_start_read` callers keep `dst` valid for
                // `remaining` more words.
                unsafe {
                    rx.dst.write(word);
                    rx.dst = rx.dst.add(1);
                }
                rx.remaining -= 1;
                if rx.remaining == 0 {
                    if let Some(channel) = rx.chain_to {
                        self.chained.push(channel);
                    }
                    self.rx = None;
                }
            }
            None => self.rx_fifo.push_back(word),
        }
    }

    // ---- DMA ----

    pub fn data_configure_write(&mut self) {
        self.write_configured = true;
    }

    pub fn data_set_read_increment(&mut self, increment: bool) {
        self.read_increment = increment;
    }

    /// # Safety
    ///
    /// See [`picovision_hal::PsramPort::data_start_write`].
    pub unsafe fn data_start_write(&mut self, src: *const u32, words: u32, flip_armed: bool) {
        if !self.write_configured {
            self.errors.push(ModelError::ChannelNotConfigured);
            return;
        }
        for i in 0..words as usize {
            let word = if self.read_increment {
                src.add(i).read()
            } else {
                src.read()
            };
            // The channel byte-swaps on the way into the FIFO.
            self.push_word(word.swap_bytes(), flip_armed);
        }
    }

    /// # Safety
    ///
    /// See [`picovision_hal::PsramPort::data_start_read`].
    pub unsafe fn data_start_read(&mut self, dst: *mut u32, words: u32, chain_to: Option<u8>) {
        self.write_configured = false;
        self.rx = None;
        if words == 0 {
            return;
        }
        self.rx = Some(ReadTarget {
            dst,
            remaining: words,
            chain_to,
        });
        while self.rx.is_some() {
            match self.rx_fifo.pop_front() {
                Some(word) => self.deliver(word),
                None => break,
            }
        }
    }

    /// The model completes transfers as soon as their words arrive, so a
    /// read still waiting here would hang the real hardware.
    pub fn data_busy(&mut self) -> bool {
        if let Some(rx) = self.rx.take() {
            self.errors.push(ModelError::TransferStalled {
                remaining: rx.remaining,
            });
        }
        false
    }

    pub fn data_abort(&mut self) {
        self.rx = None;
        self.rx_fifo.clear();
        self.isr.clear();
    }

    /// # Safety
    ///
    /// See [`picovision_hal::PsramPort::command_start`].
    pub unsafe fn command_start(&mut self, src: *const u32, words: u32, flip_armed: bool) {
        for i in 0..words as usize {
            self.push_word(src.add(i).read(), flip_armed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programs_pack_into_instruction_memory() {
        let mut board = Board::new(125_000_000);
        let a = board.add_program(PioBlock::Pio1, PsramProgram::QpiNormal);
        let b = board.add_program(PioBlock::Pio1, PsramProgram::SpiReset);
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(24));
        assert_eq!(board.add_program(PioBlock::Pio1, PsramProgram::QpiSlow), None);
        board.remove_program(PioBlock::Pio1, PsramProgram::QpiNormal, 0);
        assert_eq!(board.add_program(PioBlock::Pio1, PsramProgram::QpiSlow), Some(0));
    }

    #[test]
    fn words_to_a_disabled_machine_are_reported() {
        let mut board = Board::new(125_000_000);
        board.push_word(0, false);
        assert_eq!(board.errors, vec![ModelError::StateMachineDisabled]);
    }
}
