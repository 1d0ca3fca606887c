//! Scroll groups.
//!
//! Each scanline descriptor carries a 3-bit group index. Group 0 displays
//! the frame as laid out; groups 1 to 7 are offset by the coprocessor using a
//! small configuration block, optionally wrapping horizontally and vertically
//! inside a region of the pixel plane.

use super::layout::PIXEL_BASE;
use super::pixel::{PixelFormat, Point};

/// Highest scroll group index.
pub const MAX_SCROLL_GROUP: u8 = 7;

/// Frame geometry needed to place a scroll window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollGeometry {
    pub format: PixelFormat,
    pub frame_width: u16,
    pub display_width: u16,
    pub display_height: u16,
}

impl ScrollGeometry {
    fn address(&self, p: Point) -> i32 {
        PIXEL_BASE as i32 + self.format.offset(p.x, p.y, self.frame_width)
    }
}

/// Configuration block for one scroll group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollConfig {
    /// Byte offset of the window origin from the frame origin.
    pub addr_offset: i32,
    /// Address at which the window wraps vertically, or 0 for no wrap.
    pub max_addr: u32,
    /// Byte offset applied to lines after the vertical wrap.
    pub addr_offset2: i32,
    /// Byte position in the line where the horizontal wrap happens, or 0.
    pub wrap_position: i16,
    /// Byte offset applied after the horizontal wrap.
    pub wrap_offset: i16,
}

impl ScrollConfig {
    /// Window showing the frame from `origin`. When the window overlaps
    /// column `wrap_from.x` it continues from `wrap_to.x` there, and when it
    /// overlaps row `wrap_from.y` it continues from `wrap_to.y`.
    pub fn new(geometry: &ScrollGeometry, origin: Point, wrap_from: Point, wrap_to: Point) -> Self {
        let bpp = geometry.format.bytes_per_pixel() as i32;
        let mut wrap_position = 0;
        let mut wrap_offset = 0;
        if wrap_from.x > origin.x && wrap_from.x < origin.x + geometry.display_width as i32 {
            wrap_position = ((wrap_from.x - origin.x) * bpp) as i16;
            wrap_offset = ((wrap_to.x - wrap_from.x) * bpp) as i16;
        }

        let addr_offset = geometry.address(origin) - geometry.address(Point::new(0, 0));
        let addr_offset2 = geometry.address(Point::new(origin.x, origin.y + wrap_to.y))
            - geometry.address(Point::new(0, wrap_from.y));
        let mut max_addr = 0;
        if wrap_from.y > origin.y && wrap_from.y < origin.y + geometry.display_height as i32 {
            max_addr = geometry.address(Point::new(0, wrap_from.y)) as u32;
        }

        Self {
            addr_offset,
            max_addr,
            addr_offset2,
            wrap_position,
            wrap_offset,
        }
    }

    /// Register payload: three 24-bit fields then two 16-bit fields, all
    /// little-endian.
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..3].copy_from_slice(&self.addr_offset.to_le_bytes()[..3]);
        out[3..6].copy_from_slice(&self.max_addr.to_le_bytes()[..3]);
        out[6..9].copy_from_slice(&self.addr_offset2.to_le_bytes()[..3]);
        out[9..11].copy_from_slice(&self.wrap_position.to_le_bytes());
        out[11..13].copy_from_slice(&self.wrap_offset.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> ScrollGeometry {
        ScrollGeometry {
            format: PixelFormat::Rgb555,
            frame_width: 640,
            display_width: 320,
            display_height: 240,
        }
    }

    #[test]
    fn plain_offset_without_wrap() {
        let cfg = ScrollConfig::new(&geometry(), Point::new(10, 2), Point::new(0, 0), Point::new(0, 0));
        assert_eq!(cfg.addr_offset, 2 * 640 * 3 + 20);
        assert_eq!(cfg.max_addr, 0);
        assert_eq!(cfg.wrap_position, 0);
        assert_eq!(cfg.wrap_offset, 0);
    }

    #[test]
    fn horizontal_and_vertical_wrap() {
        let cfg = ScrollConfig::new(
            &geometry(),
            Point::new(100, 50),
            Point::new(400, 200),
            Point::new(0, 0),
        );
        assert_eq!(cfg.wrap_position, 600);
        assert_eq!(cfg.wrap_offset, -800);
        assert_eq!(cfg.max_addr, PIXEL_BASE + 200 * 640 * 3);
        assert_eq!(cfg.addr_offset2, 50 * 640 * 3 + 200 - 200 * 640 * 3);
    }

    #[test]
    fn payload_is_little_endian() {
        let cfg = ScrollConfig {
            addr_offset: -2,
            max_addr: 0x12_3456,
            addr_offset2: 0x01_0203,
            wrap_position: 0x0405,
            wrap_offset: -1,
        };
        assert_eq!(
            cfg.to_bytes(),
            [0xFE, 0xFF, 0xFF, 0x56, 0x34, 0x12, 0x03, 0x02, 0x01, 0x05, 0x04, 0xFF, 0xFF]
        );
    }
}
