mod common;

use aps6404_model::{SimBoard, PSRAM_PIO};
use picovision_hal::{PioBlock, PsramProgram};

#[test]
fn change_evicts_previous_program() {
    let board = SimBoard::new(common::SAFE_CLOCK);
    let arbiter = common::arbiter(&board);

    let first = arbiter.change_exclusive_program(PSRAM_PIO, PsramProgram::SpiReset);
    assert_eq!(arbiter.resident(PSRAM_PIO), Some((PsramProgram::SpiReset, first)));

    let second = arbiter.change_exclusive_program(PSRAM_PIO, PsramProgram::QpiFast);
    assert_eq!(arbiter.resident(PSRAM_PIO), Some((PsramProgram::QpiFast, second)));
    assert_eq!(board.resident_programs(PSRAM_PIO), vec![(PsramProgram::QpiFast, second)]);
    assert_eq!(arbiter.load_count(), 2);
}

#[test]
fn reloading_same_program_is_a_fresh_load() {
    let board = SimBoard::new(common::SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    arbiter.change_exclusive_program(PSRAM_PIO, PsramProgram::QpiNormal);
    arbiter.change_exclusive_program(PSRAM_PIO, PsramProgram::QpiNormal);
    assert_eq!(board.program_loads(), 2);
    assert_eq!(board.resident_programs(PSRAM_PIO).len(), 1);
}

#[test]
fn blocks_are_independent() {
    let board = SimBoard::new(common::SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    arbiter.change_exclusive_program(PioBlock::Pio0, PsramProgram::QpiSlow);
    arbiter.change_exclusive_program(PioBlock::Pio1, PsramProgram::QpiSlow);
    arbiter.release(PioBlock::Pio0);
    assert_eq!(arbiter.resident(PioBlock::Pio0), None);
    assert!(board.resident_programs(PioBlock::Pio0).is_empty());
    assert_eq!(board.resident_programs(PioBlock::Pio1).len(), 1);
}
