//! Display mode selection: which output timing the coprocessor runs and
//! how the frame is doubled up to it.

use super::pixel::PixelFormat;

/// Output timings the coprocessor can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    R640x480,
    R720x480,
    R720x400,
    R720x576,
    #[cfg(feature = "wide-modes")]
    R800x600,
    #[cfg(feature = "wide-modes")]
    R800x480,
    #[cfg(feature = "wide-modes")]
    R800x450,
    /// 50 Hz timing.
    #[cfg(feature = "wide-modes")]
    R960x540,
    #[cfg(feature = "wide-modes")]
    R1280x720,
}

impl Resolution {
    /// Timing for an output of `width` x `height` after pixel doubling.
    pub fn for_output(width: u16, height: u16) -> Option<Self> {
        match (width, height) {
            (640, _) => Some(Resolution::R640x480),
            (720, 480) => Some(Resolution::R720x480),
            (720, 400) => Some(Resolution::R720x400),
            (720, 576) => Some(Resolution::R720x576),
            #[cfg(feature = "wide-modes")]
            (800, 600) => Some(Resolution::R800x600),
            #[cfg(feature = "wide-modes")]
            (800, 480) => Some(Resolution::R800x480),
            #[cfg(feature = "wide-modes")]
            (800, 450) => Some(Resolution::R800x450),
            #[cfg(feature = "wide-modes")]
            (960, 540) => Some(Resolution::R960x540),
            #[cfg(feature = "wide-modes")]
            (1280, 720) => Some(Resolution::R1280x720),
            _ => None,
        }
    }

    /// Value written to the resolution register.
    pub const fn code(self) -> u8 {
        match self {
            Resolution::R640x480 => 0x00,
            Resolution::R720x480 => 0x01,
            Resolution::R720x400 => 0x02,
            Resolution::R720x576 => 0x03,
            #[cfg(feature = "wide-modes")]
            Resolution::R800x600 => 0x10,
            #[cfg(feature = "wide-modes")]
            Resolution::R800x480 => 0x11,
            #[cfg(feature = "wide-modes")]
            Resolution::R800x450 => 0x12,
            #[cfg(feature = "wide-modes")]
            Resolution::R960x540 => 0x14,
            #[cfg(feature = "wide-modes")]
            Resolution::R1280x720 => 0x15,
        }
    }
}

/// What the application asks for at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    /// Width of the pixel plane, 0 for the display width.
    pub frame_width: u16,
    /// Height of the pixel plane, 0 for the display height.
    pub frame_height: u16,
    /// Ask the coprocessor for its most widely supported timings.
    pub max_compatibility: bool,
}

impl DisplayConfig {
    pub const fn new(width: u16, height: u16, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            frame_width: 0,
            frame_height: 0,
            max_compatibility: false,
        }
    }

    /// Use a pixel plane larger than the display, for scrolling.
    pub const fn with_frame_size(mut self, frame_width: u16, frame_height: u16) -> Self {
        self.frame_width = frame_width;
        self.frame_height = frame_height;
        self
    }

    pub const fn with_max_compatibility(mut self, on: bool) -> Self {
        self.max_compatibility = on;
        self
    }
}

/// Why a configuration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeError {
    /// No output timing matches the doubled-up size.
    UnsupportedResolution { width: u16, height: u16 },
    /// RGB888 needs horizontal doubling.
    UnsupportedMode,
}

/// A configuration resolved against the supported output timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub display_width: u16,
    pub display_height: u16,
    /// Always a multiple of 4.
    pub frame_width: u16,
    pub frame_height: u16,
    pub h_repeat: u8,
    pub v_repeat: u8,
    pub resolution: Resolution,
    /// Resolution register value including the compatibility flag.
    pub selector: u8,
}

impl Geometry {
    pub fn resolve(config: &DisplayConfig) -> Result<Self, ModeError> {
        let frame_width = match config.frame_width {
            0 => config.width,
            w => w,
        };
        let frame_width = (frame_width + 3) & !3;
        let frame_height = match config.frame_height {
            0 => config.height,
            h => h,
        };

        let (w, h) = (config.width, config.height);
        let h_repeat = if w < 640 || (w == 640 && (h == 360 || h == 720)) {
            2
        } else {
            1
        };
        if config.format == PixelFormat::Rgb888 && h_repeat == 1 {
            return Err(ModeError::UnsupportedMode);
        }
        let v_repeat = if h < 400 { 2 } else { 1 };

        let full_width = w * h_repeat as u16;
        let full_height = h * v_repeat as u16;
        let resolution = Resolution::for_output(full_width, full_height).ok_or(
            ModeError::UnsupportedResolution {
                width: full_width,
                height: full_height,
            },
        )?;
        let mut selector = resolution.code();
        if config.max_compatibility {
            selector |= super::control::MAX_COMPATIBILITY;
        }

        Ok(Self {
            display_width: w,
            display_height: h,
            frame_width,
            frame_height,
            h_repeat,
            v_repeat,
            resolution,
            selector,
        })
    }

    /// Output width after horizontal doubling.
    pub fn full_width(&self) -> u16 {
        self.display_width * self.h_repeat as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_vga() {
        let g = Geometry::resolve(&DisplayConfig::new(640, 480, PixelFormat::Rgb555)).unwrap();
        assert_eq!((g.h_repeat, g.v_repeat), (1, 1));
        assert_eq!(g.resolution, Resolution::R640x480);
        assert_eq!(g.selector, 0);
    }

    #[test]
    fn doubled_qvga() {
        let g = Geometry::resolve(&DisplayConfig::new(320, 240, PixelFormat::Rgb555)).unwrap();
        assert_eq!((g.h_repeat, g.v_repeat), (2, 2));
        assert_eq!(g.selector, 0);
        assert_eq!(g.full_width(), 640);
    }

    #[test]
    fn compatibility_flag_sets_top_bit() {
        let cfg = DisplayConfig::new(360, 240, PixelFormat::Palette).with_max_compatibility(true);
        let g = Geometry::resolve(&cfg).unwrap();
        assert_eq!(g.resolution, Resolution::R720x480);
        assert_eq!(g.selector, 0x81);
    }

    #[test]
    fn rgb888_needs_doubling() {
        let cfg = DisplayConfig::new(720, 480, PixelFormat::Rgb888);
        assert_eq!(Geometry::resolve(&cfg), Err(ModeError::UnsupportedMode));
        assert!(Geometry::resolve(&DisplayConfig::new(320, 240, PixelFormat::Rgb888)).is_ok());
    }

    #[test]
    fn unknown_output_is_refused() {
        let cfg = DisplayConfig::new(720, 300, PixelFormat::Rgb555);
        assert_eq!(
            Geometry::resolve(&cfg),
            Err(ModeError::UnsupportedResolution {
                width: 720,
                height: 600
            })
        );
    }

    #[test]
    fn frame_width_rounds_up_to_words() {
        let cfg = DisplayConfig::new(320, 240, PixelFormat::Rgb555).with_frame_size(321, 500);
        let g = Geometry::resolve(&cfg).unwrap();
        assert_eq!(g.frame_width, 324);
        assert_eq!(g.frame_height, 500);
    }

    #[cfg(not(feature = "wide-modes"))]
    #[test]
    fn wide_modes_need_feature() {
        let cfg = DisplayConfig::new(400, 300, PixelFormat::Rgb555);
        assert!(Geometry::resolve(&cfg).is_err());
    }
}
