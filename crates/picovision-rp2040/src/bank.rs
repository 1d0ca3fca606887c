//! RAM_SEL and the vsync interrupt.
//!
//! RAM_SEL picks which PSRAM chip the CPU is wired to; the coprocessor scans
//! out the other one. Flips are requested through [`FLIP`] and carried out
//! by `IO_IRQ_BANK0` on the next rising vsync edge so the switch never lands
//! mid-frame.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::{OutputPin, PinState, StatefulOutputPin};
use picovision_hal::{BankSelect, FlipSignal};
use rp2040_hal as hal;

use hal::gpio::bank0::{Gpio16, Gpio8};
use hal::gpio::{FunctionSioInput, FunctionSioOutput, Interrupt, Pin, PullDown};
use hal::pac::{self, interrupt};

pub type VsyncPin = Pin<Gpio16, FunctionSioInput, PullDown>;
pub type RamSelPin = Pin<Gpio8, FunctionSioOutput, PullDown>;

pub static FLIP: FlipSignal = FlipSignal::new();

struct Lines {
    vsync: VsyncPin,
    ram_sel: RamSelPin,
}

static LINES: Mutex<RefCell<Option<Lines>>> = Mutex::new(RefCell::new(None));

/// Hand both lines to the interrupt handler and unmask it at top priority,
/// ahead of anything else sharing the bank 0 GPIO interrupt.
pub fn install(nvic: &mut pac::NVIC, mut vsync: VsyncPin, ram_sel: RamSelPin) -> RamSelect {
    vsync.clear_interrupt(Interrupt::EdgeHigh);
    vsync.set_interrupt_enabled(Interrupt::EdgeHigh, true);
    critical_section::with(|cs| {
        LINES.borrow_ref_mut(cs).replace(Lines { vsync, ram_sel });
    });
    // SAFETY: the handler only touches state behind `LINES` and `FLIP`.
    unsafe {
        nvic.set_priority(pac::Interrupt::IO_IRQ_BANK0, 0);
        pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
    }
    RamSelect { _private: () }
}

/// Main-loop handle on RAM_SEL, for the `DvDisplay` bring-up.
pub struct RamSelect {
    _private: (),
}

impl BankSelect for RamSelect {
    fn select(&mut self, bank: u8) {
        critical_section::with(|cs| {
            if let Some(lines) = LINES.borrow_ref_mut(cs).as_mut() {
                let _ = lines.ram_sel.set_state(PinState::from(bank & 1 != 0));
            }
        });
    }
}

#[interrupt]
fn IO_IRQ_BANK0() {
    critical_section::with(|cs| {
        let mut lines = LINES.borrow_ref_mut(cs);
        let Some(lines) = lines.as_mut() else {
            return;
        };
        if lines.vsync.interrupt_status(Interrupt::EdgeHigh) {
            lines.vsync.clear_interrupt(Interrupt::EdgeHigh);
            FLIP.service(|| {
                let _ = lines.ram_sel.toggle();
            });
        }
    });
}
