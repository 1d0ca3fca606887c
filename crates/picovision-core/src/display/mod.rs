pub mod config;
pub mod control;
pub mod driver;
pub mod layout;
pub mod pixel;
pub mod scroll;
pub mod sprite;

pub use config::{DisplayConfig, Geometry, Resolution};
pub use control::Coprocessor;
pub use driver::{DisplayError, DvDisplay, FlipState};
pub use layout::FrameLayout;
pub use pixel::{palette_pixel, rgb555, Pixel, PixelFormat, Point, Rgb888, SpritePixel};
pub use sprite::BlendMode;
