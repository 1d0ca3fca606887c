//! `PsramPort` on PIO1 state machine 0 and DMA channels 0 and 1.
//!
//! Register access goes straight through the PAC: the PSRAM programs are
//! swapped at run time and the data channel is reconfigured between reads
//! and writes, neither of which the typed HAL drivers allow.

use picovision_hal::{PioBlock, PsramProgram, PsramPort};
use rp2040_hal as hal;

use hal::gpio::bank0::{Gpio17, Gpio18, Gpio19, Gpio20, Gpio21, Gpio22};
use hal::gpio::{FunctionPio1, Pin, PullNone};
use hal::pac;

use crate::pio::{assemble, clock_divider, SIDE_SET_BITS};

pub const PIN_CS: u8 = 17;
pub const PIN_SCK: u8 = 18;
/// First of four consecutive data pins; D0 doubles as MOSI and D1 as MISO
/// in SPI mode.
pub const PIN_D0: u8 = 19;

const SM: usize = 0;
const DATA_CH: usize = 0;
const COMMAND_CH: usize = 1;

const DREQ_PIO1_TX0: u8 = 8;
const DREQ_PIO1_RX0: u8 = 12;

/// `set pindirs, <dirs> side 0b01`, keeping CS deselected while it runs.
const fn set_pindirs(dirs: u8) -> u32 {
    0xE080 | (1 << 11) | dirs as u32
}

/// `jmp <addr> side 0b01`.
const fn jump(addr: u8) -> u32 {
    (1 << 11) | addr as u32
}

pub struct PsramPins {
    pub cs: Pin<Gpio17, FunctionPio1, PullNone>,
    pub sck: Pin<Gpio18, FunctionPio1, PullNone>,
    pub d0: Pin<Gpio19, FunctionPio1, PullNone>,
    pub d1: Pin<Gpio20, FunctionPio1, PullNone>,
    pub d2: Pin<Gpio21, FunctionPio1, PullNone>,
    pub d3: Pin<Gpio22, FunctionPio1, PullNone>,
}

pub struct Rp2040PsramPort {
    _pins: PsramPins,
    pio: pac::PIO1,
    dma: pac::DMA,
    system_clock_hz: u32,
}

impl Rp2040PsramPort {
    /// Take PIO1 and the DMA block out of reset and claim the pins.
    pub fn new(
        pins: PsramPins,
        pio: pac::PIO1,
        dma: pac::DMA,
        resets: &mut pac::RESETS,
        system_clock_hz: u32,
    ) -> Self {
        resets
            .reset()
            .modify(|_, w| w.pio1().clear_bit().dma().clear_bit());
        while {
            let done = resets.reset_done().read();
            done.pio1().bit_is_clear() || done.dma().bit_is_clear()
        } {}

        let port = Self {
            _pins: pins,
            pio,
            dma,
            system_clock_hz,
        };
        port.configure_command_channel();
        port
    }

    /// Record a new system clock. Follow with `PsramEngine::adjust_clock`.
    pub fn set_system_clock_hz(&mut self, hz: u32) {
        self.system_clock_hz = hz;
    }

    fn tx_fifo_addr(&self) -> u32 {
        self.pio.txf(SM).as_ptr() as u32
    }

    fn rx_fifo_addr(&self) -> u32 {
        self.pio.rxf(SM).as_ptr() as u32
    }

    fn exec(&self, instr: u32) {
        self.pio.sm(SM).sm_instr().write(|w| unsafe { w.bits(instr) });
    }

    fn configure_command_channel(&self) {
        let ch = self.dma.ch(COMMAND_CH);
        ch.ch_write_addr()
            .write(|w| unsafe { w.bits(self.tx_fifo_addr()) });
        ch.ch_al1_ctrl().write(|w| unsafe {
            w.data_size()
                .size_word()
                .incr_read()
                .set_bit()
                .incr_write()
                .clear_bit()
                .treq_sel()
                .bits(DREQ_PIO1_TX0 + SM as u8)
                .chain_to()
                .bits(COMMAND_CH as u8)
                .en()
                .set_bit()
        });
    }

    fn clear_fifos(&self) {
        // Toggling the join bit flushes both FIFOs.
        let shift = self.pio.sm(SM).sm_shiftctrl();
        shift.modify(|r, w| w.fjoin_rx().bit(!r.fjoin_rx().bit()));
        shift.modify(|r, w| w.fjoin_rx().bit(!r.fjoin_rx().bit()));
    }
}

impl PsramPort for Rp2040PsramPort {
    fn block(&self) -> PioBlock {
        PioBlock::Pio1
    }

    fn sm_set_enabled(&mut self, enabled: bool) {
        self.pio.ctrl().modify(|r, w| unsafe {
            let mask = 1 << SM;
            let bits = if enabled {
                r.sm_enable().bits() | mask
            } else {
                r.sm_enable().bits() & !mask
            };
            w.sm_enable().bits(bits)
        });
    }

    fn sm_init(&mut self, program: PsramProgram, offset: u8) {
        self.sm_set_enabled(false);
        let assembled = assemble(program);
        let sm = self.pio.sm(SM);
        let qpi = program != PsramProgram::SpiReset;
        let data_pins = if qpi { 4 } else { 1 };

        sm.sm_clkdiv()
            .write(|w| unsafe { w.int().bits(clock_divider(program)).frac().bits(0) });
        sm.sm_execctrl().write(|w| unsafe {
            w.side_en()
                .clear_bit()
                .wrap_top()
                .bits(offset + assembled.wrap_source)
                .wrap_bottom()
                .bits(offset + assembled.wrap_target)
        });
        sm.sm_shiftctrl().write(|w| unsafe {
            w.autopull()
                .set_bit()
                .autopush()
                .set_bit()
                .pull_thresh()
                .bits(0)
                .push_thresh()
                .bits(0)
                .out_shiftdir()
                .clear_bit()
                .in_shiftdir()
                .clear_bit()
        });

        // CS and SCK become outputs before the program starts toggling them.
        sm.sm_pinctrl().write(|w| unsafe {
            w.sideset_count()
                .bits(SIDE_SET_BITS)
                .sideset_base()
                .bits(PIN_CS)
                .set_base()
                .bits(PIN_CS)
                .set_count()
                .bits(2)
        });
        self.exec(set_pindirs(0b11));

        sm.sm_pinctrl().write(|w| unsafe {
            w.sideset_count()
                .bits(SIDE_SET_BITS)
                .sideset_base()
                .bits(PIN_CS)
                .out_base()
                .bits(PIN_D0)
                .out_count()
                .bits(data_pins)
                .set_base()
                .bits(PIN_D0)
                .set_count()
                .bits(data_pins)
                .in_base()
                .bits(if qpi { PIN_D0 } else { PIN_D0 + 1 })
        });

        self.clear_fifos();
        self.pio.ctrl().modify(|_, w| unsafe {
            w.sm_restart().bits(1 << SM).clkdiv_restart().bits(1 << SM)
        });
        self.exec(jump(offset));
        self.sm_set_enabled(true);
    }

    fn sm_put_blocking(&mut self, word: u32) {
        while self.pio.fstat().read().txfull().bits() & (1 << SM) != 0 {
            core::hint::spin_loop();
        }
        self.pio.txf(SM).write(|w| unsafe { w.bits(word) });
    }

    fn sm_tx_fifo_empty(&self) -> bool {
        self.pio.fstat().read().txempty().bits() & (1 << SM) != 0
    }

    fn sm_pc(&self) -> u8 {
        self.pio.sm(SM).sm_addr().read().bits() as u8
    }

    fn system_clock_hz(&self) -> u32 {
        self.system_clock_hz
    }

    fn delay_us(&mut self, us: u32) {
        cortex_m::asm::delay(us * (self.system_clock_hz / 1_000_000));
    }

    fn data_configure_write(&mut self) {
        let ch = self.dma.ch(DATA_CH);
        ch.ch_write_addr()
            .write(|w| unsafe { w.bits(self.tx_fifo_addr()) });
        ch.ch_al1_ctrl().write(|w| unsafe {
            w.data_size()
                .size_word()
                .incr_read()
                .set_bit()
                .incr_write()
                .clear_bit()
                .treq_sel()
                .bits(DREQ_PIO1_TX0 + SM as u8)
                .chain_to()
                .bits(DATA_CH as u8)
                .bswap()
                .set_bit()
                .en()
                .set_bit()
        });
    }

    fn data_set_read_increment(&mut self, increment: bool) {
        self.dma
            .ch(DATA_CH)
            .ch_al1_ctrl()
            .modify(|_, w| w.incr_read().bit(increment));
    }

    unsafe fn data_start_write(&mut self, src: *const u32, words: u32) {
        let ch = self.dma.ch(DATA_CH);
        ch.ch_trans_count().write(|w| w.bits(words));
        ch.ch_al3_read_addr_trig().write(|w| w.bits(src as u32));
    }

    unsafe fn data_start_read(&mut self, dst: *mut u32, words: u32, chain_to: Option<u8>) {
        let ch = self.dma.ch(DATA_CH);
        ch.ch_read_addr().write(|w| w.bits(self.rx_fifo_addr()));
        ch.ch_trans_count().write(|w| w.bits(words));
        ch.ch_al1_ctrl().write(|w| {
            w.data_size()
                .size_word()
                .incr_read()
                .clear_bit()
                .incr_write()
                .set_bit()
                .treq_sel()
                .bits(DREQ_PIO1_RX0 + SM as u8)
                .chain_to()
                .bits(chain_to.unwrap_or(DATA_CH as u8))
                .bswap()
                .set_bit()
                .en()
                .set_bit()
        });
        ch.ch_al2_write_addr_trig().write(|w| w.bits(dst as u32));
    }

    fn data_busy(&self) -> bool {
        self.dma.ch(DATA_CH).ch_ctrl_trig().read().busy().bit_is_set()
    }

    fn data_abort(&mut self) {
        let mask = 1 << DATA_CH;
        // Mask the completion interrupt so the abort cannot raise it.
        let enabled = self.dma.inte0().read().bits();
        self.dma.inte0().write(|w| unsafe { w.bits(enabled & !mask) });
        self.dma.chan_abort().write(|w| unsafe { w.bits(mask) });
        // CHAN_ABORT reads back unreliably; the busy flag is the signal.
        while self.data_busy() {
            core::hint::spin_loop();
        }
        self.dma.ints0().write(|w| unsafe { w.bits(mask) });
        self.dma.inte0().write(|w| unsafe { w.bits(enabled) });
    }

    unsafe fn command_start(&mut self, src: *const u32, words: u32) {
        let ch = self.dma.ch(COMMAND_CH);
        ch.ch_trans_count().write(|w| w.bits(words));
        ch.ch_al3_read_addr_trig().write(|w| w.bits(src as u32));
    }
}
