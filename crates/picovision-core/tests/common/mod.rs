//! Shared fixtures: the modelled board wired to the core drivers.

#![allow(dead_code)]

use aps6404_model::{SimBankSelect, SimBoard, SimCoprocessor, SimProgramMemory, SimPsramPort};
use picovision_core::{DvDisplay, ProgramArbiter, PsramEngine};

/// Clock at which bursts may cross pages.
pub const SAFE_CLOCK: u32 = 125_000_000;
/// Clock at which every burst must stay inside its page.
pub const UNSAFE_CLOCK: u32 = 200_000_000;

pub type Arbiter = ProgramArbiter<SimProgramMemory>;
pub type Engine<'a> = PsramEngine<'a, SimProgramMemory, SimPsramPort>;
pub type Display<'a> = DvDisplay<'a, SimProgramMemory, SimPsramPort, SimCoprocessor, SimBankSelect>;

pub fn arbiter(board: &SimBoard) -> Arbiter {
    ProgramArbiter::new(board.program_memory())
}

pub fn engine<'a>(board: &SimBoard, arbiter: &'a Arbiter) -> Engine<'a> {
    PsramEngine::new(board.psram_port(), arbiter)
}

pub fn display<'a>(board: &'a SimBoard, arbiter: &'a Arbiter, copro: &SimCoprocessor) -> Display<'a> {
    DvDisplay::new(
        engine(board, arbiter),
        copro.clone(),
        board.bank_select(),
        board.flip_signal(),
    )
}

/// Little-endian words holding `bytes`, zero padded.
pub fn pack(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut b = [0u8; 4];
            b[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(b)
        })
        .collect()
}

pub fn unpack(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Fail with the recorded protocol violations, if any.
pub fn assert_clean(board: &SimBoard) {
    let errors = board.errors();
    assert!(errors.is_empty(), "protocol violations: {errors:?}");
}
