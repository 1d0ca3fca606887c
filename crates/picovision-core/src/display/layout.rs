//! Placement of the frame structures inside each PSRAM bank.
//!
//! ```text
//! 0x000000  preamble (7 words)
//! 0x00001C  scanline table, one word per display line
//!           palettes, 32 x RGB888 each
//!           sprite table, one word per sprite slot
//! 0x010000  pixel plane
//! top       sprite data, SPRITE_SIZE bytes per sprite
//! ```
//!
//! Every offset is a function of the display height and the palette and
//! sprite counts only, so both banks share one layout.

use crate::psram::CHIP_SIZE;

/// Preamble length in words.
pub const HEADER_WORDS: u32 = 7;
/// Start of the pixel plane.
pub const PIXEL_BASE: u32 = 0x10000;
/// Reserved bytes per sprite in the sprite data area.
pub const SPRITE_SIZE: u32 = 0x900;
/// Sprite table entries.
pub const MAX_SPRITES: u16 = 1024;
/// Palettes stored per bank.
pub const NUM_PALETTES: u8 = 2;
pub const PALETTE_ENTRIES: u32 = 32;
/// Bytes in one stored palette.
pub const PALETTE_BYTES: u32 = PALETTE_ENTRIES * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    display_height: u16,
    palette_count: u8,
    sprite_count: u16,
}

impl FrameLayout {
    pub const fn new(display_height: u16, palette_count: u8, sprite_count: u16) -> Self {
        Self {
            display_height,
            palette_count,
            sprite_count,
        }
    }

    pub const fn display_height(&self) -> u16 {
        self.display_height
    }

    pub const fn header(&self) -> u32 {
        0
    }

    pub const fn scanline_table(&self) -> u32 {
        HEADER_WORDS * 4
    }

    /// Address of the scanline descriptor for display line `y`.
    pub const fn scanline(&self, y: u16) -> u32 {
        self.scanline_table() + y as u32 * 4
    }

    pub const fn palette_table(&self) -> u32 {
        (self.display_height as u32 + HEADER_WORDS) * 4
    }

    pub const fn palette(&self, idx: u8) -> u32 {
        self.palette_table() + idx as u32 * PALETTE_BYTES
    }

    pub const fn sprite_table(&self) -> u32 {
        self.palette_table() + self.palette_count as u32 * PALETTE_BYTES
    }

    pub const fn pixel_plane(&self) -> u32 {
        PIXEL_BASE
    }

    pub const fn sprite_data_base(&self) -> u32 {
        CHIP_SIZE - self.sprite_count as u32 * SPRITE_SIZE
    }

    pub const fn sprite_data(&self, idx: u16) -> u32 {
        self.sprite_data_base() + idx as u32 * SPRITE_SIZE
    }

    pub const fn sprite_count(&self) -> u16 {
        self.sprite_count
    }

    pub const fn palette_count(&self) -> u8 {
        self.palette_count
    }
}
