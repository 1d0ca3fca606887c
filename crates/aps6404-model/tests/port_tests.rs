//! Drives the modelled state machine directly with hand-built command words.

use aps6404_model::{BurstKind, ChipMode, ModelError, SimBoard, PSRAM_PIO};
use picovision_hal::{BankSelect, ProgramMemory, PsramPort, PsramProgram};

const CMD_WRITE: u32 = 0x38 << 24;
const CMD_READ: u32 = 0xEB << 24;

/// Board with chip 0 in QPI mode and the normal transfer program running.
fn qpi_board(clock_hz: u32) -> (SimBoard, u8) {
    let board = SimBoard::new(clock_hz);
    let mut mem = board.program_memory();
    let mut port = board.psram_port();

    let reset = mem.add_program(PSRAM_PIO, PsramProgram::SpiReset);
    port.sm_init(PsramProgram::SpiReset, reset);
    for word in [7, 0x6600_0000, 7, 0x9900_0000, 7, 0x3500_0000] {
        port.sm_put_blocking(word);
    }
    mem.remove_program(PSRAM_PIO, PsramProgram::SpiReset, reset);

    let offset = mem.add_program(PSRAM_PIO, PsramProgram::QpiNormal);
    port.sm_init(PsramProgram::QpiNormal, offset);
    (board, offset)
}

#[test]
fn reset_sequence_enters_qpi() {
    let (board, _) = qpi_board(125_000_000);
    assert_eq!(board.chip_mode(0), ChipMode::Qpi);
    assert_eq!(board.chip_mode(1), ChipMode::Spi);
    assert_eq!(board.chip_resets(0), 1);
    assert!(board.errors().is_empty());
}

#[test]
fn dma_write_then_read_back() {
    let (board, offset) = qpi_board(125_000_000);
    let mut port = board.psram_port();
    let data = [0x0403_0201u32, 0x0807_0605, 0];

    port.data_configure_write();
    port.data_set_read_increment(true);
    for word in [2 * 6 - 1, CMD_WRITE | 0x200, offset as u32 + 6] {
        port.sm_put_blocking(word);
    }
    unsafe { port.data_start_write(data.as_ptr(), 6 / 4 + 1) };

    let mut got = [0u8; 8];
    board.read_chip(0, 0x200, &mut got);
    assert_eq!(got, [1, 2, 3, 4, 5, 6, 0, 0]);

    let mut buf = [0u32; 2];
    unsafe { port.data_start_read(buf.as_mut_ptr(), 2, None) };
    for word in [2 * 8 - 4, CMD_READ | 0x200, offset as u32 + 9] {
        port.sm_put_blocking(word);
    }
    assert!(!port.data_busy());
    assert_eq!(buf, [0x0403_0201, 0x0000_0605]);
    assert!(board.errors().is_empty());
}

#[test]
fn chained_read_triggers_channel() {
    let (board, offset) = qpi_board(125_000_000);
    board.write_chip(0, 0x1000, &[9, 9, 9, 9, 7, 7, 7, 7]);
    let mut port = board.psram_port();
    let commands = [
        0,
        CMD_READ | 0x1000,
        offset as u32 + 18,
        0,
        CMD_READ | 0x1004,
        offset as u32 + 18,
    ];
    let mut buf = [0u32; 2];
    unsafe {
        port.data_start_read(buf.as_mut_ptr(), 2, Some(5));
        port.command_start(commands.as_ptr(), commands.len() as u32);
    }
    assert_eq!(buf, [0x0909_0909, 0x0707_0707]);
    assert_eq!(board.chained_channels(), vec![5]);
}

#[test]
fn page_crossing_at_high_clock_wraps_and_is_reported() {
    let (board, offset) = qpi_board(200_000_000);
    let mut port = board.psram_port();
    port.data_configure_write();
    for word in [2 * 4 - 1, CMD_WRITE | 1022, offset as u32 + 6, 0xAABB_CCDD, 0] {
        port.sm_put_blocking(word);
    }
    let mut b = [0u8; 2];
    board.read_chip(0, 0, &mut b);
    assert_eq!(b, [0xCC, 0xDD]);
    assert!(matches!(
        board.errors().as_slice(),
        [ModelError::PageCrossing { addr: 1022, len: 4, .. }]
    ));
}

#[test]
fn bursts_go_to_the_selected_chip() {
    let (board, offset) = qpi_board(125_000_000);
    let mut sel = board.bank_select();
    sel.select(1);
    let mut port = board.psram_port();
    port.data_configure_write();
    for word in [1, CMD_WRITE, offset as u32 + 6, 0x5A00_0000] {
        port.sm_put_blocking(word);
    }
    let bursts = board.bursts();
    assert_eq!(bursts.len(), 1);
    assert_eq!((bursts[0].chip, bursts[0].kind), (1, BurstKind::Write));
    // Chip 1 never saw the reset sequence.
    assert!(matches!(board.errors()[0], ModelError::NotInQpiMode { chip: 1, .. }));
    assert_eq!(board.displayed_chip(), 0);
}

#[test]
fn vsync_swaps_only_when_armed() {
    let board = SimBoard::new(125_000_000);
    assert!(!board.vsync());
    board.flip_signal().arm();
    assert!(board.vsync());
    assert_eq!(board.ram_sel(), 1);
    assert!(!board.flip_signal().is_armed());
    assert_eq!(board.vsync_count(), 2);
}

#[test]
fn write_without_configuring_channel_is_reported() {
    let (board, _) = qpi_board(125_000_000);
    let mut port = board.psram_port();
    let data = [0u32; 2];
    unsafe { port.data_start_write(data.as_ptr(), 2) };
    assert_eq!(board.errors(), vec![ModelError::ChannelNotConfigured]);
}
