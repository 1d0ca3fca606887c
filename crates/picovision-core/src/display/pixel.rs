//! Pixel formats and their byte encodings in the pixel plane.

/// Frame-buffer pixel format. The discriminant is the mode value the
/// coprocessor reads from scanline and sprite table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PixelFormat {
    /// 16-bit ARGB1555, bit 15 opaque.
    Rgb555 = 1,
    /// 8-bit palette index in bits 6..2, bit 0 opaque.
    Palette = 2,
    /// 24-bit RGB, only with horizontal pixel doubling.
    Rgb888 = 3,
}

impl PixelFormat {
    pub const fn mode(self) -> u32 {
        self as u32
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb555 => 2,
            PixelFormat::Palette => 1,
            PixelFormat::Rgb888 => 3,
        }
    }

    /// Byte offset of `(x, y)` from the start of the pixel plane.
    ///
    /// Rows are always `frame_width * 3` bytes apart so that the plane can be
    /// reinterpreted in any format without moving lines.
    pub const fn offset(self, x: i32, y: i32, frame_width: u16) -> i32 {
        let fw = frame_width as i32;
        match self {
            PixelFormat::Rgb555 => y * fw * 3 + x * 2,
            PixelFormat::Palette => y * fw * 3 + x,
            PixelFormat::Rgb888 => (y * fw + x) * 3,
        }
    }
}

/// A position in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A 24-bit colour, `0xRRGGBB`, stored blue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb888(pub u32);

/// A value that can be stored in the pixel plane.
///
/// `u16` is an RGB555 pixel and `u8` a palette pixel.
pub trait Pixel: Copy {
    const FORMAT: PixelFormat;
    const BYTES: usize;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;

    /// The pixel replicated into one word, for formats that tile words.
    fn fill_word(self) -> Option<u32>;
}

impl Pixel for u16 {
    const FORMAT: PixelFormat = PixelFormat::Rgb555;
    const BYTES: usize = 2;

    fn write_le(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn fill_word(self) -> Option<u32> {
        Some(self as u32 | (self as u32) << 16)
    }
}

impl Pixel for u8 {
    const FORMAT: PixelFormat = PixelFormat::Palette;
    const BYTES: usize = 1;

    fn write_le(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn fill_word(self) -> Option<u32> {
        Some(u32::from_ne_bytes([self; 4]))
    }
}

impl Pixel for Rgb888 {
    const FORMAT: PixelFormat = PixelFormat::Rgb888;
    const BYTES: usize = 3;

    fn write_le(self, out: &mut [u8]) {
        out[..3].copy_from_slice(&self.0.to_le_bytes()[..3]);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Rgb888(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    fn fill_word(self) -> Option<u32> {
        None
    }
}

/// Pixels that can be used in sprites, which carry an opacity bit.
pub trait SpritePixel: Pixel {
    fn is_transparent(self) -> bool;
}

impl SpritePixel for u16 {
    fn is_transparent(self) -> bool {
        self & 0x8000 == 0
    }
}

impl SpritePixel for u8 {
    fn is_transparent(self) -> bool {
        self & 1 == 0
    }
}

/// Pack an 8-bit-per-channel colour into opaque RGB555.
pub const fn rgb555(r: u8, g: u8, b: u8) -> u16 {
    0x8000 | ((r as u16 & 0xF8) << 7) | ((g as u16 & 0xF8) << 2) | (b as u16 >> 3)
}

/// Opaque palette pixel for entry `idx` (0..32).
pub const fn palette_pixel(idx: u8) -> u8 {
    ((idx & 0x1F) << 2) | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_share_row_stride() {
        let fw = 320;
        assert_eq!(PixelFormat::Rgb555.offset(5, 2, fw), 2 * 960 + 10);
        assert_eq!(PixelFormat::Palette.offset(5, 2, fw), 2 * 960 + 5);
        assert_eq!(PixelFormat::Rgb888.offset(5, 2, fw), (2 * 320 + 5) * 3);
    }

    #[test]
    fn fill_words_tile_the_pixel() {
        assert_eq!(0x8123u16.fill_word(), Some(0x8123_8123));
        assert_eq!(0x45u8.fill_word(), Some(0x4545_4545));
        assert_eq!(Rgb888(0x102030).fill_word(), None);
    }

    #[test]
    fn rgb888_is_stored_blue_first() {
        let mut out = [0u8; 3];
        Rgb888(0x102030).write_le(&mut out);
        assert_eq!(out, [0x30, 0x20, 0x10]);
        assert_eq!(Rgb888::read_le(&out), Rgb888(0x102030));
    }

    #[test]
    fn helpers_set_opacity() {
        assert!(!rgb555(255, 0, 0).is_transparent());
        assert_eq!(rgb555(255, 255, 255), 0xFFFF);
        assert_eq!(palette_pixel(31), 0x7D);
        assert!(0x7Cu8.is_transparent());
    }
}
