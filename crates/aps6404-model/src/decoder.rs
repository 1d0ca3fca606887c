//! Word-level model of the PSRAM PIO programs.
//!
//! The reset programs take `(bit count - 1, command)` pairs and clock the
//! command byte out of the top of the second word. The transfer programs take
//! `(nibble count, command | address, entry pc)` triples and then jump to the
//! write or read code. A write consumes payload words most significant byte
//! first; once the last byte is out the program discards the remainder of
//! that word, or the whole next word if the last one was fully used.

use picovision_hal::{PsramEntry, PsramProgram};

use crate::error::ModelError;

/// Command byte of a quad write.
pub const CMD_WRITE: u8 = 0x38;
/// Command byte of a fast quad read.
pub const CMD_READ: u8 = 0xEB;

/// Instruction count of each program, as laid out in PIO memory.
pub const fn program_len(program: PsramProgram) -> u8 {
    match program {
        PsramProgram::SpiReset | PsramProgram::QpiReset => 5,
        PsramProgram::QpiSlow | PsramProgram::QpiNormal | PsramProgram::QpiFast => 24,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Count,
    Command { count: u32 },
    Entry { count: u32, command: u32 },
    WriteData { written: u32, bytes: u32 },
    Discard,
}

/// What a word pushed into the TX FIFO made the program do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The word was consumed without reaching the chip.
    Idle,
    /// A single command clocked out by a reset program.
    Control { command: u8, bits: u32 },
    /// A write burst starts.
    StartWrite { addr: u32, bytes: u32 },
    /// Payload bytes `data[..len]` for burst position `index`.
    WriteData { index: u32, data: [u8; 4], len: u32 },
    /// A read burst of `bytes` bytes runs to completion.
    Read { addr: u32, bytes: u32 },
    Fault(ModelError),
}

/// Decoder for the program currently running on the state machine.
#[derive(Debug, Clone)]
pub struct Decoder {
    program: PsramProgram,
    offset: u8,
    phase: Phase,
}

impl Decoder {
    pub fn new(program: PsramProgram, offset: u8) -> Self {
        Self {
            program,
            offset,
            phase: Phase::Count,
        }
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    /// Stalled on the first instruction, waiting for a count word.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Count
    }

    pub fn push(&mut self, word: u32) -> Event {
        match self.phase {
            Phase::Count => {
                self.phase = Phase::Command { count: word };
                Event::Idle
            }
            Phase::Command { count } if !self.program.is_qpi_transfer() => {
                self.phase = Phase::Count;
                let bits_per_clock = match self.program {
                    PsramProgram::SpiReset => 1,
                    _ => 4,
                };
                Event::Control {
                    command: (word >> 24) as u8,
                    bits: count.wrapping_add(1).wrapping_mul(bits_per_clock),
                }
            }
            Phase::Command { count } => {
                self.phase = Phase::Entry { count, command: word };
                Event::Idle
            }
            Phase::Entry { count, command } => {
                self.phase = Phase::Count;
                self.enter(count, command, word)
            }
            Phase::WriteData { written, bytes } => {
                let len = (bytes - written).min(4);
                let done = written + len;
                self.phase = if done < bytes {
                    Phase::WriteData {
                        written: done,
                        bytes,
                    }
                } else if len == 4 {
                    Phase::Discard
                } else {
                    Phase::Count
                };
                Event::WriteData {
                    index: written,
                    data: word.to_be_bytes(),
                    len,
                }
            }
            Phase::Discard => {
                self.phase = Phase::Count;
                Event::Idle
            }
        }
    }

    fn enter(&mut self, count: u32, command: u32, pc: u32) -> Event {
        let cmd = (command >> 24) as u8;
        let addr = command & 0x00FF_FFFF;
        let entry = pc.checked_sub(self.offset as u32).and_then(|rel| {
            [PsramEntry::Write, PsramEntry::Read, PsramEntry::ReadOne]
                .into_iter()
                .find(|e| e.offset() as u32 == rel)
        });
        let Some(entry) = entry else {
            return Event::Fault(ModelError::BadEntryPoint {
                pc,
                offset: self.offset,
            });
        };
        let expected = match entry {
            PsramEntry::Write => CMD_WRITE,
            PsramEntry::Read | PsramEntry::ReadOne => CMD_READ,
        };
        if cmd != expected {
            return Event::Fault(ModelError::CommandMismatch {
                command: cmd,
                entry: entry.offset(),
            });
        }
        match entry {
            PsramEntry::Write => {
                let bytes = count.wrapping_add(1) / 2;
                if bytes > 0 {
                    self.phase = Phase::WriteData { written: 0, bytes };
                }
                Event::StartWrite { addr, bytes }
            }
            PsramEntry::Read => Event::Read {
                addr,
                bytes: count.wrapping_add(4) / 2,
            },
            PsramEntry::ReadOne => Event::Read { addr, bytes: 4 },
        }
    }
}
