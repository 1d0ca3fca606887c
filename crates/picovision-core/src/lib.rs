#![no_std]
//! Host-side drivers for the PicoVision board.
//!
//! [`psram`] drives an APS6404 QSPI PSRAM through a PIO state machine and
//! DMA, splitting bursts around the chip's 1 KiB pages when the bus clock
//! requires it. [`display`] builds the double-buffered frame format the
//! display coprocessor scans out, on top of two such chips.
//!
//! Everything here is generic over the traits in `picovision_hal`, so the
//! same code runs on the RP2040 and against the host-side board model.

pub mod arbiter;
pub mod display;
pub mod psram;

pub use arbiter::ProgramArbiter;
pub use display::{DisplayConfig, DisplayError, DvDisplay, PixelFormat, Point};
pub use psram::{PsramEngine, PsramError};

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use logger as log;

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! info {
        ( $( $x:tt )* ) => {};
    }
    pub(crate) use info;
    macro_rules! debug {
        ( $( $x:tt )* ) => {};
    }
    pub(crate) use debug;
    macro_rules! trace {
        ( $( $x:tt )* ) => {};
    }
    pub(crate) use trace;
    macro_rules! warner {
        ( $( $x:tt )* ) => {};
    }
    pub(crate) use warner as warn;
}
