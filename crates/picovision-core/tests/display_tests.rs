//! Frame-buffer driver on the modelled board and coprocessor.

mod common;

use aps6404_model::{BurstKind, ChipMode, ModelError, SimBoard, SimCoprocessor, SpriteSlot};
use picovision_core::display::driver::HEADER_MAGIC;
use picovision_core::display::layout::{PIXEL_BASE, SPRITE_SIZE};
use picovision_core::display::{rgb555, palette_pixel, BlendMode, FlipState, Rgb888};
use picovision_core::{DisplayConfig, DisplayError, PixelFormat, Point};

use common::{assert_clean, SAFE_CLOCK, UNSAFE_CLOCK};

const QVGA: DisplayConfig = DisplayConfig::new(320, 240, PixelFormat::Rgb555);

/// Address of pixel `(x, y)` in a 320-wide RGB555 frame.
fn rgb555_addr(x: u32, y: u32) -> u32 {
    PIXEL_BASE + y * 320 * 3 + x * 2
}

// ============================================================================
// Bring-up
// ============================================================================

#[test]
fn init_vga_writes_both_headers() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);

    display
        .init(DisplayConfig::new(640, 480, PixelFormat::Rgb555))
        .unwrap();

    for chip in 0..2u8 {
        assert_eq!(board.chip_mode(chip), ChipMode::Qpi);
        let header: Vec<u32> = (0..7).map(|i| board.read_chip_u32(chip, i * 4)).collect();
        assert_eq!(
            header,
            [
                HEADER_MAGIC,
                0x0101_0101,
                640 << 16,
                480 << 16,
                1,
                480 + ((chip as u32) << 24),
                0x0400_0002,
            ]
        );
    }
    let state = copro.state();
    assert_eq!(state.resolution, Some(0));
    assert!(state.running);
    assert_eq!(display.geometry().h_repeat, 1);
    assert_clean(&board);
}

#[test]
fn init_doubled_mode_sets_repeats() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    assert_eq!(board.read_chip_u32(0, 4), 0x0102_0101);
    assert_eq!(board.read_chip_u32(0, 8), 640 << 16);
    assert_eq!(board.read_chip_u32(0, 12), 240 << 16);

    let y = 10;
    let descriptor = board.read_chip_u32(0, display.layout().scanline(y));
    assert_eq!(descriptor, (1 << 27) + (2 << 24) + 10 * 320 * 3 + PIXEL_BASE);

    let sprite_entry = board.read_chip_u32(0, display.layout().sprite_table() + 4 * 3);
    assert_eq!(
        sprite_entry,
        (1 << 28) + 3 * SPRITE_SIZE + display.layout().sprite_data_base()
    );
    assert_eq!(copro.state().resolution, Some(0));
}

#[test]
fn compatibility_flag_reaches_coprocessor() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display
        .init(DisplayConfig::new(360, 240, PixelFormat::Palette).with_max_compatibility(true))
        .unwrap();
    assert_eq!(copro.state().resolution, Some(0x81));
}

#[test]
fn refused_config_touches_nothing() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);

    let err = display
        .init(DisplayConfig::new(720, 300, PixelFormat::Rgb555))
        .unwrap_err();
    assert!(matches!(
        err,
        DisplayError::UnsupportedResolution {
            width: 720,
            height: 600
        }
    ));
    let err = display
        .init(DisplayConfig::new(640, 480, PixelFormat::Rgb888))
        .unwrap_err();
    assert!(matches!(err, DisplayError::UnsupportedMode));

    assert!(board.bursts().is_empty());
    assert!(copro.state().writes.is_empty());
}

// ============================================================================
// Flipping
// ============================================================================

#[test]
fn nothing_touches_psram_while_a_flip_is_pending() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();

    for frame in 0..4 {
        display
            .write_pixel_span(Point::new(0, frame), 100, rgb555(0, 255, 0))
            .unwrap();
        display.write_pixel(Point::new(5, 5), rgb555(255, 0, 0)).unwrap();
        display.flip_async().unwrap();
        assert_eq!(display.flip_state(), FlipState::SwapArmed);
        // Drawing straight after the flip request waits for vsync first.
        display.write_pixel(Point::new(6, 6), rgb555(0, 0, 255)).unwrap();
        assert_eq!(display.flip_state(), FlipState::Idle);
    }

    assert!(board.bursts().iter().all(|b| !b.flip_armed));
    assert_clean(&board);
}

#[test]
fn flip_hands_bank_to_coprocessor_on_vsync() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();
    let host = board.ram_sel();
    assert_eq!(display.bank(), host);

    display.write_pixel(Point::new(2, 3), rgb555(255, 255, 255)).unwrap();
    board.set_auto_vsync(false);
    display.flip_async().unwrap();
    assert_eq!(board.ram_sel(), host);
    assert!(board.flip_signal().is_armed());

    assert!(board.vsync());
    assert_eq!(board.displayed_chip(), host);
    assert_eq!(display.bank(), board.ram_sel());
    let mut px = [0u8; 2];
    board.read_chip(host, rgb555_addr(2, 3), &mut px);
    assert_eq!(u16::from_le_bytes(px), rgb555(255, 255, 255));

    display.wait_for_flip().unwrap();
    assert_eq!(display.flip_state(), FlipState::Idle);
}

#[test]
fn flip_state_follows_the_swap() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();
    assert_eq!(display.flip_state(), FlipState::Idle);

    let host = board.ram_sel();
    board.set_auto_vsync(false);
    display.write_pixel(Point::new(1, 1), rgb555(255, 0, 0)).unwrap();
    display.flip_async().unwrap();
    // Buffered pixels are already in PSRAM once the swap is armed.
    assert_eq!(display.flip_state(), FlipState::SwapArmed);
    let mut px = [0u8; 2];
    board.read_chip(host, rgb555_addr(1, 1), &mut px);
    assert_eq!(u16::from_le_bytes(px), rgb555(255, 0, 0));

    assert!(board.vsync());
    display.wait_for_flip().unwrap();
    assert_eq!(display.flip_state(), FlipState::Idle);
    assert_clean(&board);
}

#[test]
fn mode_change_rewrites_tables_in_both_banks() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();

    display.set_mode(PixelFormat::Palette).unwrap();
    display.flip().unwrap();

    let line = display.layout().scanline(0);
    let entry = display.layout().sprite_table();
    for chip in 0..2 {
        assert_eq!(board.read_chip_u32(chip, line) >> 27 & 3, 2);
        assert_eq!(board.read_chip_u32(chip, entry) >> 28, 2);
    }
    // Every displayed slot was cleared by the mode change.
    assert!(copro.state().sprites.iter().all(|s| *s == SpriteSlot::Hidden));
    assert_clean(&board);
}

// ============================================================================
// Pixels
// ============================================================================

#[test]
fn adjacent_pixels_coalesce_into_one_burst() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();
    board.clear_bursts();

    for x in 0..10 {
        display
            .write_pixel(Point::new(20 + x, 7), rgb555(x as u8 * 20, 0, 0))
            .unwrap();
    }
    assert!(board.bursts().is_empty());

    let px: u16 = display.read_pixel(Point::new(25, 7)).unwrap();
    assert_eq!(px, rgb555(100, 0, 0));
    let writes: Vec<_> = board
        .bursts()
        .into_iter()
        .filter(|b| b.kind == BurstKind::Write)
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!((writes[0].addr, writes[0].len), (rgb555_addr(20, 7), 20));
}

#[test]
fn spans_round_trip_in_each_format() {
    let board = SimBoard::new(UNSAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();

    let row: Vec<u16> = (0..300).map(|i| 0x8000 | i as u16).collect();
    display.write_pixel_span_from(Point::new(7, 100), &row).unwrap();
    let mut back = vec![0u16; row.len()];
    display.read_pixel_span(Point::new(7, 100), &mut back).unwrap();
    assert_eq!(back, row);

    display.write_pixel_span(Point::new(1, 101), 319, palette_pixel(9)).unwrap();
    let mut back = [0u8; 319];
    display.read_pixel_span(Point::new(1, 101), &mut back).unwrap();
    assert!(back.iter().all(|&p| p == palette_pixel(9)));

    display.set_mode(PixelFormat::Rgb888).unwrap();
    display.flip().unwrap();
    let colour = Rgb888(0x12_3456);
    display.write_pixel_span(Point::new(3, 50), 250, colour).unwrap();
    let mut back = vec![Rgb888(0); 252];
    display.read_pixel_span(Point::new(2, 50), &mut back).unwrap();
    assert_eq!(back[0], Rgb888(0));
    assert!(back[1..251].iter().all(|&p| p == colour));
    assert_eq!(back[251], Rgb888(0));

    display.write_pixel(Point::new(300, 60), Rgb888(0xAB_CDEF)).unwrap();
    assert_eq!(
        display.read_pixel::<Rgb888>(Point::new(300, 60)).unwrap(),
        Rgb888(0xAB_CDEF)
    );
    assert_clean(&board);
}

// ============================================================================
// Palettes
// ============================================================================

#[test]
fn palette_reaches_both_banks_over_two_flips() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display
        .init(DisplayConfig::new(320, 240, PixelFormat::Palette))
        .unwrap();

    display.set_palette_colour(3, Rgb888(0x11_2233)).unwrap();
    display.flip().unwrap();
    display.flip().unwrap();

    let at = display.layout().palette(0) + 3 * 3;
    for chip in 0..2 {
        let mut rgb = [0u8; 3];
        board.read_chip(chip, at, &mut rgb);
        assert_eq!(rgb, [0x11, 0x22, 0x33], "chip {chip}");
    }
    assert_eq!(display.palette_colour(3, 0), Some(Rgb888(0x11_2233)));
}

#[test]
fn palette_indices_are_checked() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display
        .init(DisplayConfig::new(320, 240, PixelFormat::Palette))
        .unwrap();

    assert!(matches!(
        display.set_palette_colour(32, Rgb888(0)),
        Err(DisplayError::InvalidPalette)
    ));
    assert!(matches!(
        display.set_local_palette_index(2),
        Err(DisplayError::InvalidPalette)
    ));
    display.set_local_palette_index(1).unwrap();
    display.set_palette_colour(0, Rgb888(0xFF_0000)).unwrap();
    assert_eq!(display.palette_colour(0, 1), Some(Rgb888(0xFF_0000)));
    assert_eq!(display.palette_colour(0, 0), Some(Rgb888(0)));

    display.set_display_palette_index(1).unwrap();
    assert_eq!(copro.state().palette_index, 1);
}

// ============================================================================
// Scroll groups
// ============================================================================

#[test]
fn scroll_index_survives_line_refresh() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();
    let chip = board.ram_sel();

    display.set_scroll_idx_for_lines(3, 10, 20).unwrap();
    display.refresh_lines(0, 240).unwrap();

    let idx = |y: u16| board.read_chip_u32(chip, display.layout().scanline(y)) >> 29;
    assert_eq!(idx(9), 0);
    assert_eq!(idx(10), 3);
    assert_eq!(idx(19), 3);
    assert_eq!(idx(20), 0);
    let line = board.read_chip_u32(chip, display.layout().scanline(15));
    assert_eq!(line & 0x1FFF_FFFF, (1 << 27) + (2 << 24) + 15 * 960 + PIXEL_BASE);
}

#[test]
fn scroll_arguments_are_checked() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    assert!(matches!(
        display.set_scroll_idx_for_lines(8, 0, 10),
        Err(DisplayError::InvalidScrollGroup(8))
    ));
    assert!(matches!(
        display.set_scroll_idx_for_lines(1, 20, 10),
        Err(DisplayError::InvalidLineRange { min_y: 20, max_y: 10 })
    ));
    assert!(matches!(
        display.refresh_lines(0, 241),
        Err(DisplayError::InvalidLineRange { .. })
    ));
    assert!(matches!(
        display.setup_scroll_group(Point::new(0, 0), 0, Point::new(0, 0), Point::new(0, 0)),
        Err(DisplayError::InvalidScrollGroup(0))
    ));
}

#[test]
fn scroll_group_config_goes_to_coprocessor() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    display
        .setup_scroll_group(Point::new(10, 2), 2, Point::new(0, 0), Point::new(0, 0))
        .unwrap();
    let offset: i32 = 2 * 320 * 3 + 20;
    let group = copro.state().scroll_groups[2];
    assert_eq!(&group[..3], &offset.to_le_bytes()[..3]);
    assert_eq!(&group[3..6], &[0; 3]);
    // Without a vertical wrap the second offset equals the first.
    assert_eq!(&group[6..9], &offset.to_le_bytes()[..3]);
    assert_eq!(&group[9..], &[0; 4]);
}

// ============================================================================
// Sprites
// ============================================================================

#[test]
fn sprite_record_is_trimmed() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();

    let image: [u16; 12] = [
        0, 0x8001, 0x8002, 0, //
        0, 0, 0, 0, //
        0, 0, 0, 0,
    ];
    display.define_sprite(5, 4, 3, &image).unwrap();

    let mut record = [0u8; 8];
    board.read_chip(board.ram_sel(), display.layout().sprite_data(5), &mut record);
    assert_eq!(record, [4, 1, 1, 2, 0x01, 0x80, 0x02, 0x80]);
    assert_clean(&board);
}

#[test]
fn sprite_record_keeps_empty_rows_above_content() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();

    let image: [u16; 12] = [
        0, 0, 0, //
        0, 0x8001, 0, //
        0, 0, 0, //
        0x8002, 0, 0,
    ];
    display.define_sprite(6, 3, 4, &image).unwrap();

    let mut record = [0u8; 16];
    board.read_chip(board.ram_sel(), display.layout().sprite_data(6), &mut record);
    assert_eq!(
        record,
        [3, 4, 3, 0, 1, 1, 3, 0, 0, 1, 0, 0, 0x01, 0x80, 0x02, 0x80]
    );
    assert_clean(&board);
}

#[test]
fn sprite_slots_are_driven_over_control_bus() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    display
        .set_sprite(0, 5, Point::new(10, 20), BlendMode::Depth, 1)
        .unwrap();
    assert_eq!(
        copro.state().sprites[0],
        SpriteSlot::Shown {
            command: [1, 5, 0, 10, 0, 20, 0]
        }
    );
    display.clear_sprite(0).unwrap();
    assert_eq!(copro.state().sprites[0], SpriteSlot::Hidden);

    assert!(matches!(
        display.set_sprite(80, 0, Point::new(0, 0), BlendMode::None, 1),
        Err(DisplayError::InvalidSpriteSlot(80))
    ));
}

#[test]
fn bad_sprites_are_refused() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    let wide = vec![0x8000u16; 300];
    assert!(matches!(
        display.define_sprite(0, 300, 1, &wide),
        Err(DisplayError::SpriteTooLarge)
    ));
    assert!(matches!(
        display.define_sprite(0, 4, 4, &[0u16; 8]),
        Err(DisplayError::InvalidSprite)
    ));
    assert!(matches!(
        display.define_palette_sprite(1024, 1, 1, &[1]),
        Err(DisplayError::InvalidSprite)
    ));
    let opaque = vec![0x8000u16; 64 * 32];
    assert!(matches!(
        display.define_sprite(0, 64, 32, &opaque),
        Err(DisplayError::SpriteTooLarge)
    ));
    assert!(matches!(
        display.load_pvs_sprite(0, &vec![0u8; SPRITE_SIZE as usize + 1]),
        Err(DisplayError::SpriteTooLarge)
    ));
}

#[test]
fn pre_encoded_sprite_is_copied_verbatim() {
    let board = SimBoard::new(UNSAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display.flip().unwrap();

    let record: Vec<u8> = (0..301u32).map(|i| i as u8).collect();
    display.load_pvs_sprite(7, &record).unwrap();
    let mut back = vec![0u8; record.len()];
    board.read_chip(board.ram_sel(), display.layout().sprite_data(7), &mut back);
    assert_eq!(back, record);
    assert_clean(&board);
}

// ============================================================================
// Housekeeping
// ============================================================================

#[test]
fn memory_test_passes_on_healthy_chips() {
    let board = SimBoard::new(UNSAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    assert_eq!(display.memory_test(16).unwrap(), 0);
    let mut marker = [0u8; 11];
    board.read_chip(1, 3 * 1024, &mut marker);
    assert_eq!(&marker, b"bank1-page3");
    assert_clean(&board);
}

#[test]
fn reset_hides_sprites_and_stops_output() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();
    display
        .set_sprite(4, 1, Point::new(0, 0), BlendMode::Blend, 2)
        .unwrap();

    display.reset().unwrap();
    let state = copro.state();
    assert!(!state.running);
    assert_eq!(state.sprites[4], SpriteSlot::Hidden);
}

#[test]
fn bus_errors_are_propagated() {
    let board = SimBoard::new(SAFE_CLOCK);
    let arbiter = common::arbiter(&board);
    let copro = SimCoprocessor::new();
    let mut display = common::display(&board, &arbiter, &copro);
    display.init(QVGA).unwrap();

    copro.with_state(|s| s.fail_next = 1);
    let err = display.set_display_palette_index(1).unwrap_err();
    assert!(matches!(err, DisplayError::Bus(ModelError::Nak { reg: 0xF8 })));
}
