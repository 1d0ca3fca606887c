//! PSRAM timing programs and PIO instruction memory management.
//!
//! Only one program is resident per block at a time (the arbiter swaps
//! them), but allocation still tracks every slot so a second user of the
//! block can coexist.

use picovision_hal::{PioBlock, ProgramMemory, PsramProgram};
use rp2040_hal::pac;

/// Instruction slots per PIO block.
pub const INSTR_SLOTS: u8 = 32;

/// Side-set bits: bit 0 drives CS (high deselects), bit 1 drives SCK.
pub const SIDE_SET_BITS: u8 = 2;

/// Assembled program plus the wrap bounds relative to its first slot.
pub struct Assembled {
    code: [u16; INSTR_SLOTS as usize],
    len: u8,
    pub wrap_source: u8,
    pub wrap_target: u8,
}

impl Assembled {
    pub fn code(&self) -> &[u16] {
        &self.code[..self.len as usize]
    }
}

impl From<pio::Program<32>> for Assembled {
    fn from(p: pio::Program<32>) -> Self {
        let mut code = [0; INSTR_SLOTS as usize];
        code[..p.code.len()].copy_from_slice(&p.code);
        Self {
            code,
            len: p.code.len() as u8,
            wrap_source: p.wrap.source,
            wrap_target: p.wrap.target,
        }
    }
}

/// Clock divider for a program. The three QPI variants share one layout
/// and stretch the bus clock as the system clock rises.
pub const fn clock_divider(program: PsramProgram) -> u16 {
    match program {
        PsramProgram::SpiReset | PsramProgram::QpiReset => 4,
        PsramProgram::QpiSlow => 1,
        PsramProgram::QpiNormal => 2,
        PsramProgram::QpiFast => 3,
    }
}

pub fn assemble(program: PsramProgram) -> Assembled {
    match program {
        // (bit count - 1, command) pairs, one data line, MSB first.
        PsramProgram::SpiReset => pio_proc::pio_asm!(
            ".side_set 2",
            ".wrap_target",
            "    out x, 32       side 0b01",
            "    set pindirs, 1  side 0b00",
            "bit:",
            "    out pins, 1     side 0b00",
            "    jmp x-- bit     side 0b10",
            "    out null, 32    side 0b01",
            ".wrap",
        )
        .program
        .into(),
        // Same framing on all four data lines.
        PsramProgram::QpiReset => pio_proc::pio_asm!(
            ".side_set 2",
            ".wrap_target",
            "    out x, 32       side 0b01",
            "    set pindirs, 15 side 0b00",
            "nibble:",
            "    out pins, 4     side 0b00",
            "    jmp x-- nibble  side 0b10",
            "    out null, 32    side 0b01",
            ".wrap",
        )
        .program
        .into(),
        // (nibble count, command | address, entry pc) triples. Writes stream
        // count + 1 nibbles and drop the rest of the last word. Reads wait six
        // clocks then collect count + 4 nibbles; the single-word entry reads
        // eight regardless of the count word.
        PsramProgram::QpiSlow | PsramProgram::QpiNormal | PsramProgram::QpiFast => {
            pio_proc::pio_asm!(
                ".side_set 2",
                ".wrap_target",
                "top:",
                "    out x, 32       side 0b01",
                "    set pindirs, 15 side 0b01",
                "    set y, 7        side 0b00",
                "cmd:",
                "    out pins, 4     side 0b00",
                "    jmp y-- cmd     side 0b10",
                "    out pc, 32      side 0b00",
                "write:",
                "    out pins, 4     side 0b00",
                "    jmp x-- write   side 0b10",
                "    out null, 32    side 0b01",
                ".wrap",
                "read:",
                "    set pindirs, 0  side 0b00",
                "    set y, 4        side 0b10",
                "dummy:",
                "    nop             side 0b00",
                "    jmp y-- dummy   side 0b10",
                "rd:",
                "    in pins, 4      side 0b00",
                "    jmp x-- rd      side 0b10",
                "    in pins, 4      side 0b00",
                "    nop             side 0b10",
                "    jmp tail        side 0b00",
                "read_one:",
                "    set x, 4        side 0b00",
                "    jmp read        side 0b00",
                "tail:",
                "    in pins, 4      side 0b00",
                "    nop             side 0b10",
                "    in pins, 4      side 0b01",
                "    jmp top         side 0b01",
            )
            .program
            .into()
        }
    }
}

/// Rebase a JMP instruction assembled at 0 to run at `offset`. Every other
/// opcode is position independent.
pub const fn relocate(instr: u16, offset: u8) -> u16 {
    if instr & 0xE000 == 0 {
        (instr & !0x1F) | ((instr + offset as u16) & 0x1F)
    } else {
        instr
    }
}

pub(crate) fn registers(block: PioBlock) -> &'static pac::pio0::RegisterBlock {
    // SAFETY: instruction memory and per-SM registers are only touched by the
    // owner of the slot or state machine in question.
    unsafe {
        match block {
            PioBlock::Pio0 => &*pac::PIO0::ptr(),
            PioBlock::Pio1 => &*pac::PIO1::ptr(),
        }
    }
}

/// Bitmap allocator over the instruction memory of both blocks.
pub struct Rp2040ProgramMemory {
    used: [u32; 2],
}

impl Default for Rp2040ProgramMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Rp2040ProgramMemory {
    pub const fn new() -> Self {
        Self { used: [0; 2] }
    }

    fn mask(len: u8, offset: u8) -> u32 {
        (((1u64 << len) - 1) << offset) as u32
    }

    /// Highest free run of `len` slots, matching where the SDK places
    /// programs so a PIO0 user sees familiar offsets.
    fn find_offset(&self, block: PioBlock, len: u8) -> Option<u8> {
        let used = self.used[block.index()];
        (0..=INSTR_SLOTS - len)
            .rev()
            .find(|&offset| used & Self::mask(len, offset) == 0)
    }
}

impl ProgramMemory for Rp2040ProgramMemory {
    type Program = PsramProgram;

    fn add_program(&mut self, block: PioBlock, program: PsramProgram) -> u8 {
        let assembled = assemble(program);
        let len = assembled.code().len() as u8;
        let Some(offset) = self.find_offset(block, len) else {
            defmt::panic!("{}: no room for {} instructions", block_name(block), len);
        };
        let regs = registers(block);
        for (i, &instr) in assembled.code().iter().enumerate() {
            regs.instr_mem(offset as usize + i)
                .write(|w| unsafe { w.bits(relocate(instr, offset) as u32) });
        }
        self.used[block.index()] |= Self::mask(len, offset);
        defmt::debug!(
            "{}: loaded {} at {}",
            block_name(block),
            defmt::Debug2Format(&program),
            offset
        );
        offset
    }

    fn remove_program(&mut self, block: PioBlock, program: PsramProgram, offset: u8) {
        let len = assemble(program).code().len() as u8;
        self.used[block.index()] &= !Self::mask(len, offset);
    }
}

fn block_name(block: PioBlock) -> &'static str {
    match block {
        PioBlock::Pio0 => "pio0",
        PioBlock::Pio1 => "pio1",
    }
}
