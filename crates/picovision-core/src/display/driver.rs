//! Double-buffered frame-buffer driver for the PicoVision display path.
//!
//! The host draws into one PSRAM chip while the coprocessor scans out the
//! other. A flip arms the vsync interrupt, which swaps the chips by toggling
//! RAM_SEL; until it has fired the host must not touch the frame it just
//! handed over, so every drawing operation first completes a pending flip.

use core::fmt;
use core::fmt::Write as _;

use heapless::String;
use picovision_hal::{BankSelect, ControlBus, FlipSignal, ProgramMemory, PsramPort, PsramProgram};

use super::config::{DisplayConfig, Geometry, ModeError, Resolution};
use super::control::Coprocessor;
use super::layout::{
    FrameLayout, HEADER_WORDS, MAX_SPRITES, NUM_PALETTES, PALETTE_BYTES, PALETTE_ENTRIES,
    PIXEL_BASE, SPRITE_SIZE,
};
use super::pixel::{Pixel, PixelFormat, Point, Rgb888, SpritePixel};
use super::scroll::{ScrollConfig, ScrollGeometry, MAX_SCROLL_GROUP};
use super::sprite::{sprite_command, BlendMode, SpriteShape, MAX_DISPLAYED_SPRITES, MAX_SPRITE_ROWS, MAX_SPRITE_WIDTH};
use crate::log;
use crate::psram::{PsramEngine, PsramError, CHIP_SIZE, PAGE_SIZE};

/// First word of the frame header, "PICO".
pub const HEADER_MAGIC: u32 = 0x4F43_4950;
/// Capacity of the single-pixel write coalescing buffer.
pub const PIXEL_BUFFER_WORDS: usize = 32;
const PIXEL_BUFFER_BYTES: usize = PIXEL_BUFFER_WORDS * 4;
/// Scanline and sprite tables are rewritten in chunks of this many words.
const TABLE_CHUNK_WORDS: usize = 32;
/// Staging buffer for byte-granular transfers. 240 bytes hold a whole number
/// of pixels in every format.
const STAGING_WORDS: usize = 60;
const STAGING_BYTES: usize = STAGING_WORDS * 4;
const SPRITE_HEADER_BYTES: usize = (2 + 2 * MAX_SPRITE_ROWS + 3) & !3;
/// Scanline descriptor bits holding the scroll group.
const SCROLL_IDX_MASK: u32 = 0xE000_0000;

/// Error type for display operations, generic over control bus errors.
#[derive(Debug)]
pub enum DisplayError<E: fmt::Debug> {
    /// No output timing matches the requested size after doubling.
    UnsupportedResolution { width: u16, height: u16 },
    /// RGB888 without horizontal pixel doubling.
    UnsupportedMode,
    /// Sprite image or record does not fit a sprite slot.
    SpriteTooLarge,
    /// Sprite data index out of range or image data too short.
    InvalidSprite,
    /// Display slot at or above the displayed-sprite limit.
    InvalidSpriteSlot(u8),
    /// Scroll group index out of range.
    InvalidScrollGroup(u8),
    /// Line range empty or reversed, or beyond the display height.
    InvalidLineRange { min_y: u16, max_y: u16 },
    /// Palette or palette entry out of range.
    InvalidPalette,
    Psram(PsramError),
    /// Control bus error.
    Bus(E),
}

impl<E: fmt::Debug> From<E> for DisplayError<E> {
    fn from(e: E) -> Self {
        DisplayError::Bus(e)
    }
}

impl<E: fmt::Debug> DisplayError<E> {
    fn from_mode(err: ModeError) -> Self {
        match err {
            ModeError::UnsupportedResolution { width, height } => {
                DisplayError::UnsupportedResolution { width, height }
            }
            ModeError::UnsupportedMode => DisplayError::UnsupportedMode,
        }
    }
}

/// Where the driver is in handing a finished frame to the coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlipState {
    /// Drawing into the host bank.
    Idle,
    /// Swap requested; the next vsync hands the bank over.
    SwapArmed,
    /// Blocked until the vsync interrupt has swapped banks.
    WaitingForVsync,
}

/// Consecutive single-pixel writes along one row, written as one burst.
struct PixelBuffer {
    bytes: [u8; PIXEL_BUFFER_BYTES],
    origin: Point,
    format: PixelFormat,
    len: usize,
    active: bool,
}

impl PixelBuffer {
    const fn new() -> Self {
        Self {
            bytes: [0; PIXEL_BUFFER_BYTES],
            origin: Point::new(0, 0),
            format: PixelFormat::Rgb555,
            len: 0,
            active: false,
        }
    }

    fn continues(&self, p: Point, format: PixelFormat, bytes_per_pixel: usize) -> bool {
        self.active
            && self.format == format
            && self.origin.y == p.y
            && self.origin.x + (self.len / bytes_per_pixel) as i32 == p.x
    }
}

fn pack_words(bytes: &[u8], words: &mut [u32]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks(4)) {
        let mut b = [0u8; 4];
        b[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_le_bytes(b);
    }
}

fn page_marker(bank: u8, page: u32) -> String<24> {
    let mut marker = String::new();
    // Fits: the longest marker is "bank1-page8191".
    let _ = write!(marker, "bank{}-page{}", bank, page);
    marker
}

/// Frame-buffer driver over two PSRAM chips and the coprocessor control bus.
pub struct DvDisplay<'a, M, P, C, B>
where
    M: ProgramMemory<Program = PsramProgram>,
    P: PsramPort,
    C: ControlBus,
    B: BankSelect,
{
    /// Command engine for the host-side chip.
    ram: PsramEngine<'a, M, P>,
    /// Register access to the coprocessor.
    control: Coprocessor<C>,
    /// Which chip the host side is wired to.
    ram_sel: B,
    /// Armed by a flip request, cleared by the vsync handler.
    flip: &'a FlipSignal,
    geometry: Geometry,
    layout: FrameLayout,
    mode: PixelFormat,
    /// Bank the host is drawing into.
    bank: u8,
    state: FlipState,
    /// Flips still owing a header and sprite table rewrite.
    change_mode: u8,
    /// Banks still owing the palette.
    rewrite_palette: u8,
    /// Host copy of every palette, three bytes per entry.
    palette: [u8; NUM_PALETTES as usize * PALETTE_BYTES as usize],
    /// Palette the frame header selects.
    current_palette: u8,
    /// Pending run of single-pixel writes.
    pixels: PixelBuffer,
}

impl<'a, M, P, C, B> DvDisplay<'a, M, P, C, B>
where
    M: ProgramMemory<Program = PsramProgram>,
    P: PsramPort,
    C: ControlBus,
    B: BankSelect,
{
    /// Wrap the hardware. [`DvDisplay::init`] must run before drawing.
    pub fn new(ram: PsramEngine<'a, M, P>, control: C, ram_sel: B, flip: &'a FlipSignal) -> Self {
        let geometry = Geometry {
            display_width: 640,
            display_height: 480,
            frame_width: 640,
            frame_height: 480,
            h_repeat: 1,
            v_repeat: 1,
            resolution: Resolution::R640x480,
            selector: 0,
        };
        Self {
            ram,
            control: Coprocessor::new(control),
            ram_sel,
            flip,
            geometry,
            layout: FrameLayout::new(geometry.display_height, NUM_PALETTES, MAX_SPRITES),
            mode: PixelFormat::Rgb555,
            bank: 0,
            state: FlipState::Idle,
            change_mode: 0,
            rewrite_palette: 0,
            palette: [0; NUM_PALETTES as usize * PALETTE_BYTES as usize],
            current_palette: 0,
            pixels: PixelBuffer::new(),
        }
    }

    /// Bring up both PSRAM chips, write a fresh header to each, program the
    /// output timing and start the coprocessor.
    ///
    /// A refused configuration leaves the hardware untouched.
    pub fn init(&mut self, config: DisplayConfig) -> Result<(), DisplayError<C::Error>> {
        let geometry = match Geometry::resolve(&config) {
            Ok(g) => g,
            Err(err) => {
                log::warn!("display: refusing {}x{}", config.width, config.height);
                return Err(DisplayError::from_mode(err));
            }
        };
        log::info!(
            "display: {}x{} repeat {}x{} selector {}",
            geometry.display_width,
            geometry.display_height,
            geometry.h_repeat,
            geometry.v_repeat,
            geometry.selector
        );

        self.geometry = geometry;
        self.layout = FrameLayout::new(geometry.display_height, NUM_PALETTES, MAX_SPRITES);
        self.pixels.active = false;
        self.state = FlipState::Idle;

        for bank in 0..2u8 {
            self.ram_sel.select(bank);
            self.ram.init();
            self.bank = bank;
            self.write_header()?;
            self.ram.delay_us(100);
        }
        self.bank = 0;
        self.ram_sel.select(0);
        self.ram.delay_us(50_000);

        self.control.set_resolution(geometry.selector)?;
        self.control.start()?;
        self.set_mode(config.format)
    }

    /// Switch pixel format. Takes effect on both banks over the next flip.
    pub fn set_mode(&mut self, format: PixelFormat) -> Result<(), DisplayError<C::Error>> {
        if format == PixelFormat::Rgb888 && self.geometry.h_repeat == 1 {
            return Err(DisplayError::UnsupportedMode);
        }
        self.ensure_flipped()?;
        self.flush_pixels();

        log::debug!("display: mode {}", format.mode());
        self.mode = format;
        self.write_scanlines(Some(0), 0, self.geometry.display_height)?;
        self.write_sprite_table();
        for slot in 0..MAX_DISPLAYED_SPRITES {
            self.control.clear_sprite(slot)?;
        }
        self.change_mode = 1;
        if format == PixelFormat::Palette {
            self.rewrite_palette = 2;
        }
        Ok(())
    }

    pub fn mode(&self) -> PixelFormat {
        self.mode
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Bank the host is drawing into.
    pub fn bank(&self) -> u8 {
        self.bank
    }

    pub fn flip_state(&self) -> FlipState {
        self.state
    }

    pub fn control(&mut self) -> &mut Coprocessor<C> {
        &mut self.control
    }

    /// The PSRAM engine, e.g. to call `adjust_clock` after a clock change.
    pub fn ram(&mut self) -> &mut PsramEngine<'a, M, P> {
        &mut self.ram
    }

    /// Finish the current frame and request the swap on the next vsync.
    ///
    /// Returns once the swap is armed, except after a mode change, where it
    /// waits for the swap so the other bank can be rewritten.
    pub fn flip_async(&mut self) -> Result<(), DisplayError<C::Error>> {
        self.ensure_flipped()?;
        if self.mode == PixelFormat::Palette && self.rewrite_palette > 0 {
            self.write_palette();
            self.rewrite_palette -= 1;
        }
        self.flush_pixels();

        self.bank ^= 1;
        self.ram.wait_for_finish_blocking();
        self.flip.arm();
        self.state = FlipState::SwapArmed;

        if self.change_mode > 0 {
            self.wait_for_flip()?;
        }
        Ok(())
    }

    /// Block until a requested swap has happened.
    pub fn wait_for_flip(&mut self) -> Result<(), DisplayError<C::Error>> {
        if self.flip.is_armed() {
            self.state = FlipState::WaitingForVsync;
            while self.flip.is_armed() {
                self.ram_sel.relax();
            }
        }
        self.state = FlipState::Idle;

        if self.change_mode > 0 {
            self.change_mode -= 1;
            self.write_sprite_table();
            self.write_scanlines(Some(0), 0, self.geometry.display_height)?;
        }
        Ok(())
    }

    pub fn flip(&mut self) -> Result<(), DisplayError<C::Error>> {
        self.flip_async()?;
        self.wait_for_flip()
    }

    fn ensure_flipped(&mut self) -> Result<(), DisplayError<C::Error>> {
        if self.flip.is_armed() {
            self.wait_for_flip()?;
        }
        Ok(())
    }

    fn pixel_address(&self, p: Point, format: PixelFormat) -> u32 {
        (PIXEL_BASE as i32 + format.offset(p.x, p.y, self.geometry.frame_width)) as u32
    }

    fn flush_pixels(&mut self) {
        if !self.pixels.active {
            return;
        }
        let addr = self.pixel_address(self.pixels.origin, self.pixels.format);
        let len = self.pixels.len;
        let mut words = [0u32; PIXEL_BUFFER_WORDS];
        pack_words(&self.pixels.bytes[..len], &mut words);
        self.ram.write(addr, &words, len as u32);
        self.pixels.active = false;
    }

    fn write_encoded<T: Pixel>(&mut self, mut addr: u32, pixels: &[T]) {
        let mut bytes = [0u8; STAGING_BYTES];
        let mut words = [0u32; STAGING_WORDS];
        for chunk in pixels.chunks(STAGING_BYTES / T::BYTES) {
            for (px, out) in chunk.iter().zip(bytes.chunks_mut(T::BYTES)) {
                px.write_le(out);
            }
            let len = chunk.len() * T::BYTES;
            pack_words(&bytes[..len], &mut words);
            self.ram.write(addr, &words, len as u32);
            addr += len as u32;
        }
    }

    /// Read `out.len()` bytes from any byte address.
    fn read_bytes(&mut self, mut addr: u32, out: &mut [u8]) -> Result<(), PsramError> {
        let mut words = [0u32; STAGING_WORDS];
        let mut done = 0;
        while done < out.len() {
            let aligned = addr & !3;
            let skip = (addr - aligned) as usize;
            let take = (out.len() - done).min(STAGING_BYTES - skip);
            let count = (skip + take + 3) / 4;
            self.ram.read_blocking(aligned, &mut words[..count])?;
            for (i, byte) in out[done..done + take].iter_mut().enumerate() {
                let k = skip + i;
                *byte = words[k / 4].to_le_bytes()[k % 4];
            }
            done += take;
            addr += take as u32;
        }
        Ok(())
    }

    /// Write one pixel. Runs of horizontally adjacent pixels are buffered
    /// and written as a single burst.
    pub fn write_pixel<T: Pixel>(&mut self, p: Point, colour: T) -> Result<(), DisplayError<C::Error>> {
        self.ensure_flipped()?;
        if T::FORMAT == PixelFormat::Rgb888 {
            self.flush_pixels();
            let addr = self.pixel_address(p, T::FORMAT);
            self.write_encoded(addr, &[colour]);
            return Ok(());
        }

        if self.pixels.continues(p, T::FORMAT, T::BYTES) {
            let at = self.pixels.len;
            colour.write_le(&mut self.pixels.bytes[at..]);
            self.pixels.len += T::BYTES;
            if self.pixels.len == PIXEL_BUFFER_BYTES {
                self.flush_pixels();
            }
        } else {
            self.flush_pixels();
            self.pixels.origin = p;
            self.pixels.format = T::FORMAT;
            colour.write_le(&mut self.pixels.bytes);
            self.pixels.len = T::BYTES;
            self.pixels.active = true;
        }
        Ok(())
    }

    /// Fill `len` pixels from `p` with `colour`.
    pub fn write_pixel_span<T: Pixel>(
        &mut self,
        p: Point,
        len: u32,
        colour: T,
    ) -> Result<(), DisplayError<C::Error>> {
        self.ensure_flipped()?;
        self.flush_pixels();
        let mut addr = self.pixel_address(p, T::FORMAT);
        let mut remaining = len * T::BYTES as u32;
        match colour.fill_word() {
            Some(word) => self.ram.write_repeat(addr, word, remaining),
            None => {
                // 240 bytes repeat the pixel a whole number of times, so each
                // chunk starts on a pixel boundary.
                let mut bytes = [0u8; STAGING_BYTES];
                for out in bytes.chunks_mut(T::BYTES) {
                    colour.write_le(out);
                }
                let mut words = [0u32; STAGING_WORDS];
                pack_words(&bytes, &mut words);
                while remaining > 0 {
                    let n = remaining.min(STAGING_BYTES as u32);
                    self.ram.write(addr, &words, n);
                    addr += n;
                    remaining -= n;
                }
            }
        }
        Ok(())
    }

    /// Copy `data` into the row starting at `p`.
    pub fn write_pixel_span_from<T: Pixel>(
        &mut self,
        p: Point,
        data: &[T],
    ) -> Result<(), DisplayError<C::Error>> {
        self.ensure_flipped()?;
        self.flush_pixels();
        let addr = self.pixel_address(p, T::FORMAT);
        self.write_encoded(addr, data);
        Ok(())
    }

    /// Read `out.len()` pixels from the row starting at `p`.
    pub fn read_pixel_span<T: Pixel>(
        &mut self,
        p: Point,
        out: &mut [T],
    ) -> Result<(), DisplayError<C::Error>> {
        self.ensure_flipped()?;
        self.flush_pixels();
        let mut addr = self.pixel_address(p, T::FORMAT);
        let mut bytes = [0u8; STAGING_BYTES];
        for chunk in out.chunks_mut(STAGING_BYTES / T::BYTES) {
            let len = chunk.len() * T::BYTES;
            self.read_bytes(addr, &mut bytes[..len])
                .map_err(DisplayError::Psram)?;
            for (px, raw) in chunk.iter_mut().zip(bytes.chunks(T::BYTES)) {
                *px = T::read_le(raw);
            }
            addr += len as u32;
        }
        Ok(())
    }

    pub fn read_pixel<T: Pixel>(&mut self, p: Point) -> Result<T, DisplayError<C::Error>> {
        let mut bytes = [0u8; 4];
        self.ensure_flipped()?;
        self.flush_pixels();
        let addr = self.pixel_address(p, T::FORMAT);
        self.read_bytes(addr, &mut bytes[..T::BYTES])
            .map_err(DisplayError::Psram)?;
        Ok(T::read_le(&bytes))
    }

    fn write_header(&mut self) -> Result<(), DisplayError<C::Error>> {
        let g = self.geometry;
        let preamble: [u32; HEADER_WORDS as usize] = [
            HEADER_MAGIC,
            0x0100_0101 + ((g.v_repeat as u32) << 16),
            (g.full_width() as u32) << 16,
            (g.display_height as u32) << 16,
            0x0000_0001,
            g.display_height as u32 + ((self.bank as u32) << 24),
            0x0400_0000 + NUM_PALETTES as u32,
        ];
        self.ram.write(self.layout.header(), &preamble, HEADER_WORDS * 4);
        self.write_scanlines(Some(0), 0, g.display_height)?;
        self.write_sprite_table();
        Ok(())
    }

    /// Rewrite the scanline descriptors for lines `min_y..max_y`. With
    /// `None` the scroll group already stored for each line is kept.
    fn write_scanlines(
        &mut self,
        idx: Option<u8>,
        min_y: u16,
        max_y: u16,
    ) -> Result<(), DisplayError<C::Error>> {
        let mut buf = [0u32; TABLE_CHUNK_WORDS];
        let mut line_type = self.mode.mode() << 27;
        if let Some(idx) = idx {
            line_type |= (idx as u32) << 29;
        }
        let repeat = (self.geometry.h_repeat as u32) << 24;
        let stride = self.geometry.frame_width as u32 * 3;

        let mut addr = self.layout.scanline(min_y);
        let mut y = min_y;
        while y < max_y {
            let n = ((max_y - y) as usize).min(TABLE_CHUNK_WORDS);
            let lines = &mut buf[..n];
            if idx.is_none() {
                self.ram
                    .read_blocking(addr, lines)
                    .map_err(DisplayError::Psram)?;
            }
            for (j, word) in lines.iter_mut().enumerate() {
                let keep = if idx.is_none() { *word & SCROLL_IDX_MASK } else { 0 };
                let row = y as u32 + j as u32;
                *word = keep | (line_type + repeat + row * stride + PIXEL_BASE);
            }
            self.ram.write(addr, lines, n as u32 * 4);
            addr += n as u32 * 4;
            y += n as u16;
        }
        Ok(())
    }

    fn write_sprite_table(&mut self) {
        let mut buf = [0u32; TABLE_CHUNK_WORDS];
        let sprite_type = self.mode.mode() << 28;
        let base = self.layout.sprite_data_base();
        let mut addr = self.layout.sprite_table();
        for first in (0..MAX_SPRITES as u32).step_by(TABLE_CHUNK_WORDS) {
            for (j, word) in buf.iter_mut().enumerate() {
                *word = sprite_type + (first + j as u32) * SPRITE_SIZE + base;
            }
            self.ram.write(addr, &buf, TABLE_CHUNK_WORDS as u32 * 4);
            addr += TABLE_CHUNK_WORDS as u32 * 4;
        }
    }

    fn write_palette(&mut self) {
        let mut words = [0u32; NUM_PALETTES as usize * PALETTE_BYTES as usize / 4];
        pack_words(&self.palette, &mut words);
        self.ram
            .write(self.layout.palette_table(), &words, self.palette.len() as u32);
    }

    /// Assign scroll group `idx` (0 to 7) to display lines `min_y..max_y`.
    pub fn set_scroll_idx_for_lines(
        &mut self,
        idx: u8,
        min_y: u16,
        max_y: u16,
    ) -> Result<(), DisplayError<C::Error>> {
        if idx > MAX_SCROLL_GROUP {
            return Err(DisplayError::InvalidScrollGroup(idx));
        }
        self.check_lines(min_y, max_y)?;
        self.ensure_flipped()?;
        self.flush_pixels();
        self.write_scanlines(Some(idx), min_y, max_y)
    }

    /// Refresh the descriptors of `min_y..max_y` for the current mode while
    /// keeping each line's scroll group.
    pub fn refresh_lines(&mut self, min_y: u16, max_y: u16) -> Result<(), DisplayError<C::Error>> {
        self.check_lines(min_y, max_y)?;
        self.ensure_flipped()?;
        self.flush_pixels();
        self.write_scanlines(None, min_y, max_y)
    }

    fn check_lines(&self, min_y: u16, max_y: u16) -> Result<(), DisplayError<C::Error>> {
        if min_y > max_y || max_y > self.geometry.display_height {
            return Err(DisplayError::InvalidLineRange { min_y, max_y });
        }
        Ok(())
    }

    /// Point scroll group `idx` (1 to 7) at a window whose top left is `p`.
    /// See [`ScrollConfig::new`] for the wrap points.
    pub fn setup_scroll_group(
        &mut self,
        p: Point,
        idx: u8,
        wrap_from: Point,
        wrap_to: Point,
    ) -> Result<(), DisplayError<C::Error>> {
        if !(1..=MAX_SCROLL_GROUP).contains(&idx) {
            return Err(DisplayError::InvalidScrollGroup(idx));
        }
        let geometry = ScrollGeometry {
            format: self.mode,
            frame_width: self.geometry.frame_width,
            display_width: self.geometry.display_width,
            display_height: self.geometry.display_height,
        };
        let config = ScrollConfig::new(&geometry, p, wrap_from, wrap_to);
        self.control.write_scroll_group(idx, &config.to_bytes())?;
        Ok(())
    }

    /// Set entry `entry` of the local palette. Written to PSRAM on the next
    /// two flips, so that both banks carry it.
    pub fn set_palette_colour(&mut self, entry: u8, colour: Rgb888) -> Result<(), DisplayError<C::Error>> {
        self.set_palette_colour_in(entry, colour, self.current_palette)
    }

    pub fn set_palette_colour_in(
        &mut self,
        entry: u8,
        colour: Rgb888,
        palette_idx: u8,
    ) -> Result<(), DisplayError<C::Error>> {
        if entry as u32 >= PALETTE_ENTRIES || palette_idx >= NUM_PALETTES {
            return Err(DisplayError::InvalidPalette);
        }
        let at = (palette_idx as usize * PALETTE_ENTRIES as usize + entry as usize) * 3;
        let [b, g, r, _] = colour.0.to_le_bytes();
        self.palette[at..at + 3].copy_from_slice(&[r, g, b]);
        self.rewrite_palette = 2;
        Ok(())
    }

    pub fn set_palette(
        &mut self,
        colours: &[Rgb888; PALETTE_ENTRIES as usize],
    ) -> Result<(), DisplayError<C::Error>> {
        self.set_palette_in(colours, self.current_palette)
    }

    pub fn set_palette_in(
        &mut self,
        colours: &[Rgb888; PALETTE_ENTRIES as usize],
        palette_idx: u8,
    ) -> Result<(), DisplayError<C::Error>> {
        for (entry, &colour) in colours.iter().enumerate() {
            self.set_palette_colour_in(entry as u8, colour, palette_idx)?;
        }
        Ok(())
    }

    pub fn palette_colour(&self, entry: u8, palette_idx: u8) -> Option<Rgb888> {
        if entry as u32 >= PALETTE_ENTRIES || palette_idx >= NUM_PALETTES {
            return None;
        }
        let at = (palette_idx as usize * PALETTE_ENTRIES as usize + entry as usize) * 3;
        let [r, g, b] = [self.palette[at], self.palette[at + 1], self.palette[at + 2]];
        Some(Rgb888(u32::from_le_bytes([b, g, r, 0])))
    }

    /// Palette edited by [`DvDisplay::set_palette_colour`].
    pub fn set_local_palette_index(&mut self, idx: u8) -> Result<(), DisplayError<C::Error>> {
        if idx >= NUM_PALETTES {
            return Err(DisplayError::InvalidPalette);
        }
        self.current_palette = idx;
        Ok(())
    }

    pub fn local_palette_index(&self) -> u8 {
        self.current_palette
    }

    /// Palette the coprocessor displays.
    pub fn set_display_palette_index(&mut self, idx: u8) -> Result<(), DisplayError<C::Error>> {
        if idx >= NUM_PALETTES {
            return Err(DisplayError::InvalidPalette);
        }
        self.control.set_palette_index(idx)?;
        Ok(())
    }

    /// Store an RGB555 sprite image in data slot `data_idx`.
    pub fn define_sprite(
        &mut self,
        data_idx: u16,
        width: u16,
        height: u16,
        data: &[u16],
    ) -> Result<(), DisplayError<C::Error>> {
        self.define_sprite_data(data_idx, width, height, data)
    }

    /// Store a palette sprite image in data slot `data_idx`.
    pub fn define_palette_sprite(
        &mut self,
        data_idx: u16,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<(), DisplayError<C::Error>> {
        self.define_sprite_data(data_idx, width, height, data)
    }

    fn define_sprite_data<T: SpritePixel>(
        &mut self,
        data_idx: u16,
        width: u16,
        height: u16,
        data: &[T],
    ) -> Result<(), DisplayError<C::Error>> {
        let (w, h) = (width as usize, height as usize);
        if data_idx >= MAX_SPRITES || w == 0 || h == 0 || data.len() < w * h {
            return Err(DisplayError::InvalidSprite);
        }
        if w > MAX_SPRITE_WIDTH || h > MAX_SPRITE_ROWS {
            return Err(DisplayError::SpriteTooLarge);
        }
        let shape = SpriteShape::measure(w, h, data);
        if !shape.fits(T::BYTES) {
            return Err(DisplayError::SpriteTooLarge);
        }
        self.ensure_flipped()?;
        self.flush_pixels();

        let mut addr = self.layout.sprite_data(data_idx);
        let mut header = [0u8; SPRITE_HEADER_BYTES];
        let header_len = shape.write_header(&mut header);
        self.write_encoded(addr, &header[..header_len]);
        addr += header_len as u32;
        for (row, span) in data.chunks(w).zip(shape.rows()) {
            let run = &row[span.offset as usize..][..span.length as usize];
            self.write_encoded(addr, run);
            addr += (run.len() * T::BYTES) as u32;
        }
        Ok(())
    }

    /// Copy a pre-encoded sprite record into data slot `data_idx`.
    pub fn load_pvs_sprite(&mut self, data_idx: u16, record: &[u8]) -> Result<(), DisplayError<C::Error>> {
        if data_idx >= MAX_SPRITES {
            return Err(DisplayError::InvalidSprite);
        }
        if record.len() > SPRITE_SIZE as usize {
            return Err(DisplayError::SpriteTooLarge);
        }
        self.ensure_flipped()?;
        self.flush_pixels();
        let addr = self.layout.sprite_data(data_idx);
        self.write_encoded(addr, record);
        Ok(())
    }

    /// Show sprite image `data_idx` at `p` in display slot `slot`.
    pub fn set_sprite(
        &mut self,
        slot: u8,
        data_idx: u16,
        p: Point,
        blend: BlendMode,
        v_scale: u8,
    ) -> Result<(), DisplayError<C::Error>> {
        if slot >= MAX_DISPLAYED_SPRITES {
            return Err(DisplayError::InvalidSpriteSlot(slot));
        }
        let command = sprite_command(data_idx, p.x as i16, p.y as i16, blend, v_scale);
        self.control.write_sprite(slot, &command)?;
        Ok(())
    }

    pub fn clear_sprite(&mut self, slot: u8) -> Result<(), DisplayError<C::Error>> {
        if slot >= MAX_DISPLAYED_SPRITES {
            return Err(DisplayError::InvalidSpriteSlot(slot));
        }
        self.control.clear_sprite(slot)?;
        Ok(())
    }

    /// Clear every sprite slot and stop the coprocessor.
    pub fn reset(&mut self) -> Result<(), DisplayError<C::Error>> {
        for slot in 0..MAX_DISPLAYED_SPRITES {
            self.control.clear_sprite(slot)?;
        }
        self.control.stop()?;
        Ok(())
    }

    /// Write a marker at the start of the first `pages` pages of each chip,
    /// read them back and return how many did not match.
    ///
    /// Overwrites the frame headers; run [`DvDisplay::init`] afterwards.
    pub fn memory_test(&mut self, pages: u32) -> Result<u32, DisplayError<C::Error>> {
        self.ensure_flipped()?;
        self.pixels.active = false;
        let pages = pages.min(CHIP_SIZE / PAGE_SIZE);
        let mut failures = 0;
        for bank in 0..2u8 {
            self.ram_sel.select(bank);
            self.ram.init();
            for page in 0..pages {
                let marker = page_marker(bank, page);
                self.write_encoded(page * PAGE_SIZE, marker.as_bytes());
            }
            for page in 0..pages {
                let marker = page_marker(bank, page);
                let mut back = [0u8; 24];
                let back = &mut back[..marker.len()];
                self.read_bytes(page * PAGE_SIZE, back)
                    .map_err(DisplayError::Psram)?;
                if back != marker.as_bytes() {
                    log::warn!("psram: bank {} page {} mismatch", bank, page);
                    failures += 1;
                }
            }
        }
        self.ram_sel.select(self.bank);
        log::info!("psram: memory test done, {} bad pages", failures);
        Ok(failures)
    }
}
