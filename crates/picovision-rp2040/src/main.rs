//! PicoVision CPU firmware.
//!
//! Brings up the two PSRAM frame buffers on PIO1 and the display
//! coprocessor on I2C1, then animates a bouncing block and sprite over a
//! colour wash. Button A toggles the LED heartbeat, button X pauses.

#![no_std]
#![no_main]

mod bank;
mod control;
mod pio;
mod port;

use defmt_rtt as _;
use panic_probe as _;
use rp2040_hal as hal;

use hal::clocks::Clock;
use fugit::RateExtU32;
use hal::gpio::{FunctionI2C, FunctionPio1, Pin, PullNone, PullUp};
use hal::sio::Sio;

use picovision_core::display::{rgb555, BlendMode};
use picovision_core::{
    DisplayConfig, DisplayError, DvDisplay, PixelFormat, Point, ProgramArbiter, PsramEngine,
};

use control::I2cControlBus;
use pio::Rp2040ProgramMemory;
use port::{PsramPins, Rp2040PsramPort};

/// Second stage bootloader for the W25Q080 flash.
#[link_section = ".boot2"]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

/// External crystal frequency.
const XTAL_FREQ_HZ: u32 = 12_000_000;

/// PIO instruction memory, shared with anything else that loads programs.
static PROGRAMS: ProgramArbiter<Rp2040ProgramMemory> =
    ProgramArbiter::new(Rp2040ProgramMemory::new());

const WIDTH: u16 = 320;
const HEIGHT: u16 = 240;
const BLOCK: u16 = 32;
const BALL: u16 = 16;
const BALL_DATA: u16 = 0;
const BALL_SLOT: u8 = 0;

#[hal::entry]
fn main() -> ! {
    defmt::info!("picovision: starting");

    let mut pac = defmt::unwrap!(hal::pac::Peripherals::take());
    let mut core = defmt::unwrap!(hal::pac::CorePeripherals::take());
    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);

    let clocks = defmt::unwrap!(hal::clocks::init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok());
    let sys_freq = clocks.system_clock.freq().to_Hz();

    let sio = Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // --- PSRAM on PIO1 ---
    let psram_pins = PsramPins {
        cs: pins.gpio17.into_function::<FunctionPio1>().into_pull_type::<PullNone>(),
        sck: pins.gpio18.into_function::<FunctionPio1>().into_pull_type::<PullNone>(),
        d0: pins.gpio19.into_function::<FunctionPio1>().into_pull_type::<PullNone>(),
        d1: pins.gpio20.into_function::<FunctionPio1>().into_pull_type::<PullNone>(),
        d2: pins.gpio21.into_function::<FunctionPio1>().into_pull_type::<PullNone>(),
        d3: pins.gpio22.into_function::<FunctionPio1>().into_pull_type::<PullNone>(),
    };
    let port = Rp2040PsramPort::new(psram_pins, pac.PIO1, pac.DMA, &mut pac.RESETS, sys_freq);
    let ram = PsramEngine::new(port, &PROGRAMS);

    // --- Coprocessor on I2C1 ---
    let sda: Pin<_, FunctionI2C, PullUp> = pins.gpio6.reconfigure();
    let scl: Pin<_, FunctionI2C, PullUp> = pins.gpio7.reconfigure();
    let i2c = hal::I2C::i2c1(
        pac.I2C1,
        sda,
        scl,
        400.kHz(),
        &mut pac.RESETS,
        &clocks.system_clock,
    );
    let control = I2cControlBus::new(i2c);

    // --- Bank switching ---
    let ram_sel = bank::install(
        &mut core.NVIC,
        pins.gpio16.into_pull_down_input(),
        pins.gpio8.into_push_pull_output(),
    );

    let mut display = DvDisplay::new(ram, control, ram_sel, &bank::FLIP);
    if let Err(e) = display.init(DisplayConfig::new(WIDTH, HEIGHT, PixelFormat::Rgb555)) {
        halt("display init failed", e);
    }
    if let Err(e) = define_ball(&mut display) {
        halt("sprite upload failed", e);
    }
    defmt::info!("picovision: {}x{} running", WIDTH, HEIGHT);

    let mut block = Bouncer::new(0, 0, 2, 1, WIDTH - BLOCK, HEIGHT - BLOCK);
    let mut ball = Bouncer::new(100, 50, -3, 2, WIDTH - BALL, HEIGHT - BALL);
    let mut heartbeat = true;
    let mut paused = false;
    let mut last_buttons = (false, false);
    let mut frame: u32 = 0;

    loop {
        if let Err(e) = draw_frame(&mut display, frame, &block, &ball) {
            defmt::warn!("frame {}: {}", frame, defmt::Debug2Format(&e));
        }
        if let Err(e) = display.flip() {
            defmt::warn!("flip: {}", defmt::Debug2Format(&e));
        }

        let control = display.control();
        let buttons = (
            control.is_button_a_pressed().unwrap_or(false),
            control.is_button_x_pressed().unwrap_or(false),
        );
        if buttons.0 && !last_buttons.0 {
            heartbeat = !heartbeat;
            let _ = if heartbeat {
                control.set_led_heartbeat()
            } else {
                control.set_led_level(0)
            };
        }
        if buttons.1 && !last_buttons.1 {
            paused = !paused;
        }
        last_buttons = buttons;

        if !paused {
            block.step();
            ball.step();
            frame = frame.wrapping_add(1);
        }
        if frame % 600 == 0 {
            if let Ok(t) = display.control().gpu_temperature() {
                defmt::info!("coprocessor at {} C", t);
            }
        }
    }
}

/// Position bouncing inside `0..=max` on both axes.
struct Bouncer {
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
    max_x: i32,
    max_y: i32,
}

impl Bouncer {
    fn new(x: i32, y: i32, dx: i32, dy: i32, max_x: u16, max_y: u16) -> Self {
        Self {
            x,
            y,
            dx,
            dy,
            max_x: max_x as i32,
            max_y: max_y as i32,
        }
    }

    fn step(&mut self) {
        self.x += self.dx;
        self.y += self.dy;
        if self.x <= 0 || self.x >= self.max_x {
            self.dx = -self.dx;
            self.x = self.x.clamp(0, self.max_x);
        }
        if self.y <= 0 || self.y >= self.max_y {
            self.dy = -self.dy;
            self.y = self.y.clamp(0, self.max_y);
        }
    }

    fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

type I2cSda = Pin<hal::gpio::bank0::Gpio6, FunctionI2C, PullUp>;
type I2cScl = Pin<hal::gpio::bank0::Gpio7, FunctionI2C, PullUp>;
type Bus = I2cControlBus<hal::I2C<hal::pac::I2C1, (I2cSda, I2cScl)>>;
type Display = DvDisplay<'static, Rp2040ProgramMemory, Rp2040PsramPort, Bus, bank::RamSelect>;
type DisplayResult = Result<(), DisplayError<hal::i2c::Error>>;

/// Store the ball image in both banks; sprite data is per bank.
fn define_ball(display: &mut Display) -> DisplayResult {
    let mut image = [0u16; (BALL * BALL) as usize];
    let r2 = (BALL as i32 - 2) * (BALL as i32 - 2);
    for (i, px) in image.iter_mut().enumerate() {
        // Doubled coordinates put the centre on a pixel corner.
        let x = 2 * (i as i32 % BALL as i32) + 1 - BALL as i32;
        let y = 2 * (i as i32 / BALL as i32) + 1 - BALL as i32;
        if x * x + y * y <= r2 {
            *px = rgb555(255, 255 - (y + 16) as u8 * 6, 64);
        }
    }
    for _ in 0..2 {
        display.define_sprite(BALL_DATA, BALL, BALL, &image)?;
        display.flip()?;
    }
    Ok(())
}

fn draw_frame(display: &mut Display, frame: u32, block: &Bouncer, ball: &Bouncer) -> DisplayResult {
    for y in 0..HEIGHT {
        let shade = ((y as u32 + frame) & 0xFF) as u8;
        display.write_pixel_span(
            Point::new(0, y as i32),
            WIDTH as u32,
            rgb555(0, shade / 4, shade / 2),
        )?;
    }
    let p = block.point();
    for row in 0..BLOCK as i32 {
        display.write_pixel_span(Point::new(p.x, p.y + row), BLOCK as u32, rgb555(255, 255, 255))?;
    }
    display.set_sprite(BALL_SLOT, BALL_DATA, ball.point(), BlendMode::Depth2, 1)
}

fn halt(what: &str, e: impl core::fmt::Debug) -> ! {
    defmt::error!("{}: {}", what, defmt::Debug2Format(&e));
    loop {
        cortex_m::asm::wfi();
    }
}

/// Program metadata for `picotool info`.
#[link_section = ".bi_entries"]
#[used]
pub static PICOTOOL_ENTRIES: [hal::binary_info::EntryAddr; 5] = [
    hal::binary_info::rp_cargo_bin_name!(),
    hal::binary_info::rp_cargo_version!(),
    hal::binary_info::rp_program_description!(c"PicoVision CPU firmware"),
    hal::binary_info::rp_cargo_homepage_url!(),
    hal::binary_info::rp_program_build_attribute!(),
];
