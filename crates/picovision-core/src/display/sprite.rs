//! Sprite images and the per-slot display commands.
//!
//! A sprite image is stored trimmed: for each row only the run from the
//! first to the last opaque pixel is kept. The stored record is
//!
//! ```text
//! u16      height << 8 | width
//! u16 * h  length << 8 | offset, per row
//!          padding to a word boundary
//!          the visible runs, back to back
//! ```

use super::layout::SPRITE_SIZE;
use super::pixel::SpritePixel;

/// Rows a sprite image may have.
pub const MAX_SPRITE_ROWS: usize = 32;
/// Widest sprite row; offsets and lengths are stored in a byte.
pub const MAX_SPRITE_WIDTH: usize = 255;

/// Sprite slots the coprocessor composes per frame.
#[cfg(not(feature = "wide-modes"))]
pub const MAX_DISPLAYED_SPRITES: u8 = 80;
#[cfg(feature = "wide-modes")]
pub const MAX_DISPLAYED_SPRITES: u8 = 32;

/// How a sprite combines with the pixels beneath it. Anything other than
/// `None` relies on the alpha bit and is only honoured in RGB555 mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BlendMode {
    /// Sprite pixels always replace the frame.
    None = 0,
    /// Alpha is depth: back to front sprite A0, frame A0, sprite A1, frame A1.
    #[default]
    Depth = 1,
    /// Alpha is depth: back to front sprite A0, frame A0, frame A1, sprite A1.
    Depth2 = 2,
    /// Frame where sprite A0 or frame A1, additive where sprite A1 over frame A0.
    Blend = 3,
    /// Frame where sprite A0, additive where sprite A1.
    Blend2 = 4,
}

/// The opaque run of one sprite row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowSpan {
    pub offset: u8,
    pub length: u8,
}

/// Leading transparent pixels and the length of the run up to and including
/// the last opaque one. An empty row has its full width as offset and
/// length zero.
pub fn row_span<P: SpritePixel>(row: &[P]) -> RowSpan {
    let mut offset = 0usize;
    let mut length = 0usize;
    for (i, &px) in row.iter().enumerate() {
        if offset == i {
            if px.is_transparent() {
                offset += 1;
            } else {
                length = 1;
            }
        } else if !px.is_transparent() {
            length = i + 1 - offset;
        }
    }
    RowSpan {
        offset: offset as u8,
        length: length as u8,
    }
}

/// A trimmed sprite image ready to be serialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteShape {
    width: u8,
    height: u8,
    rows: [RowSpan; MAX_SPRITE_ROWS],
}

impl SpriteShape {
    /// Measure every row of a `width` x `height` image and drop trailing
    /// empty rows, keeping at least one.
    pub fn measure<P: SpritePixel>(width: usize, height: usize, data: &[P]) -> Self {
        let mut rows = [RowSpan::default(); MAX_SPRITE_ROWS];
        for (span, row) in rows.iter_mut().zip(data.chunks(width)).take(height) {
            *span = row_span(row);
        }
        let mut height = height;
        while height > 1 && rows[height - 1].length == 0 {
            height -= 1;
        }
        Self {
            width: width as u8,
            height: height as u8,
            rows,
        }
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn rows(&self) -> &[RowSpan] {
        &self.rows[..self.height as usize]
    }

    /// Bytes of the header including padding.
    pub fn header_len(&self) -> usize {
        (2 + 2 * self.height as usize + 3) & !3
    }

    /// Bytes of the visible runs for a pixel size of `bytes_per_pixel`.
    pub fn data_len(&self, bytes_per_pixel: usize) -> usize {
        self.rows()
            .iter()
            .map(|r| r.length as usize * bytes_per_pixel)
            .sum()
    }

    /// Whether the record fits in one sprite data slot.
    pub fn fits(&self, bytes_per_pixel: usize) -> bool {
        self.header_len() + self.data_len(bytes_per_pixel) <= SPRITE_SIZE as usize
    }

    /// Serialise the header into `out`, returning its length.
    pub fn write_header(&self, out: &mut [u8]) -> usize {
        let len = self.header_len();
        out[..len].fill(0);
        out[..2].copy_from_slice(&(((self.height as u16) << 8) | self.width as u16).to_le_bytes());
        for (i, row) in self.rows().iter().enumerate() {
            let entry = ((row.length as u16) << 8) | row.offset as u16;
            out[2 + 2 * i..4 + 2 * i].copy_from_slice(&entry.to_le_bytes());
        }
        len
    }
}

/// Register payload placing a sprite in a display slot.
pub fn sprite_command(
    data_idx: u16,
    x: i16,
    y: i16,
    blend: BlendMode,
    v_scale: u8,
) -> [u8; 7] {
    let [idx_lo, idx_hi] = data_idx.to_le_bytes();
    let [x_lo, x_hi] = x.to_le_bytes();
    let [y_lo, y_hi] = y.to_le_bytes();
    let scale = v_scale.clamp(1, 32) - 1;
    [
        blend as u8 | (scale << 3),
        idx_lo,
        idx_hi,
        x_lo,
        x_hi,
        y_lo,
        y_hi,
    ]
}

/// Register payload hiding a display slot.
pub const CLEAR_SPRITE_COMMAND: [u8; 3] = [1, 0xFF, 0xFF];
