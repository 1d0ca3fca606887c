//! HAL trait implementations over the shared board.

use std::rc::Rc;

use picovision_hal::{BankSelect, PioBlock, ProgramMemory, PsramPort, PsramProgram};

use crate::error::ModelError;
use crate::Shared;

/// PIO block the PSRAM state machine lives in on the board.
pub const PSRAM_PIO: PioBlock = PioBlock::Pio1;

/// The PSRAM state machine and its two DMA channels.
#[derive(Clone)]
pub struct SimPsramPort {
    pub(crate) shared: Rc<Shared>,
}

impl PsramPort for SimPsramPort {
    fn block(&self) -> PioBlock {
        PSRAM_PIO
    }

    fn sm_set_enabled(&mut self, enabled: bool) {
        self.shared.board.borrow_mut().sm_set_enabled(enabled);
    }

    fn sm_init(&mut self, program: PsramProgram, offset: u8) {
        self.shared
            .board
            .borrow_mut()
            .sm_init(PSRAM_PIO, program, offset);
    }

    fn sm_put_blocking(&mut self, word: u32) {
        let armed = self.shared.flip.is_armed();
        self.shared.board.borrow_mut().push_word(word, armed);
    }

    fn sm_tx_fifo_empty(&self) -> bool {
        true
    }

    fn sm_pc(&self) -> u8 {
        self.shared.board.borrow().sm_pc()
    }

    fn system_clock_hz(&self) -> u32 {
        self.shared.board.borrow().clock_hz
    }

    fn delay_us(&mut self, us: u32) {
        self.shared.board.borrow_mut().elapsed_us += us as u64;
    }

    fn data_configure_write(&mut self) {
        self.shared.board.borrow_mut().data_configure_write();
    }

    fn data_set_read_increment(&mut self, increment: bool) {
        self.shared
            .board
            .borrow_mut()
            .data_set_read_increment(increment);
    }

    unsafe fn data_start_write(&mut self, src: *const u32, words: u32) {
        let armed = self.shared.flip.is_armed();
        self.shared
            .board
            .borrow_mut()
            .data_start_write(src, words, armed);
    }

    unsafe fn data_start_read(&mut self, dst: *mut u32, words: u32, chain_to: Option<u8>) {
        self.shared
            .board
            .borrow_mut()
            .data_start_read(dst, words, chain_to);
    }

    fn data_busy(&self) -> bool {
        self.shared.board.borrow_mut().data_busy()
    }

    fn data_abort(&mut self) {
        self.shared.board.borrow_mut().data_abort();
    }

    unsafe fn command_start(&mut self, src: *const u32, words: u32) {
        let armed = self.shared.flip.is_armed();
        self.shared
            .board
            .borrow_mut()
            .command_start(src, words, armed);
    }
}

/// Instruction memory of both PIO blocks.
#[derive(Clone)]
pub struct SimProgramMemory {
    pub(crate) shared: Rc<Shared>,
}

impl ProgramMemory for SimProgramMemory {
    type Program = PsramProgram;

    fn add_program(&mut self, block: PioBlock, program: PsramProgram) -> u8 {
        let mut board = self.shared.board.borrow_mut();
        match board.add_program(block, program) {
            Some(offset) => offset,
            None => {
                let err = ModelError::ProgramDoesNotFit {
                    program,
                    block: block.index(),
                };
                board.errors.push(err);
                drop(board);
                panic!("{err}");
            }
        }
    }

    fn remove_program(&mut self, block: PioBlock, program: PsramProgram, offset: u8) {
        self.shared
            .board
            .borrow_mut()
            .remove_program(block, program, offset);
    }
}

/// The RAM_SEL output. Waiting for vsync fires one immediately when the
/// board is set to do so.
#[derive(Clone)]
pub struct SimBankSelect {
    pub(crate) shared: Rc<Shared>,
}

impl BankSelect for SimBankSelect {
    fn select(&mut self, bank: u8) {
        self.shared.board.borrow_mut().ram_sel = bank & 1;
    }

    fn relax(&mut self) {
        let auto = self.shared.board.borrow().auto_vsync;
        if auto {
            self.shared.vsync();
        }
    }
}
