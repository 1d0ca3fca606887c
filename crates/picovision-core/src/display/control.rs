//! Register interface of the display coprocessor.
//!
//! Registers below 0x80 address sprite slots; the rest configure the output
//! and the board peripherals the coprocessor owns.

use picovision_hal::ControlBus;

/// Bus address of the coprocessor.
pub const I2C_ADDR: u8 = 0x0D;

pub const REG_SET_RES: u8 = 0xFC;
pub const REG_START: u8 = 0xFD;
pub const REG_STOP: u8 = 0xFF;
pub const REG_GPIO: u8 = 0xC0;
pub const REG_LED: u8 = 0xC1;
pub const REG_GPIO29_MODE: u8 = 0xC2;
pub const REG_GPIO29_OUT: u8 = 0xC3;
pub const REG_GPIO29_ADC: u8 = 0xC4;
pub const REG_GPU_TEMP: u8 = 0xC6;
pub const REG_GPIO_HI: u8 = 0xC8;
pub const REG_GPIO_HI_OUT: u8 = 0xC9;
pub const REG_GPIO_HI_OE: u8 = 0xCA;
pub const REG_GPIO_HI_PULL_UP: u8 = 0xCB;
pub const REG_GPIO_HI_PULL_DOWN: u8 = 0xCC;
pub const REG_EDID: u8 = 0xFB;
pub const REG_PALETTE_INDEX: u8 = 0xF8;
pub const REG_SCROLL_BASE: u8 = 0xE0;

/// Set in the resolution selector to ask for the most compatible timings.
pub const MAX_COMPATIBILITY: u8 = 0x80;

pub const EDID_LEN: usize = 128;

/// GPIO29 mode register values.
const GPIO29_INPUT: u8 = 0;
const GPIO29_OUTPUT: u8 = 5;
const GPIO29_ADC: u8 = 6;
/// Highest mode value that is an input.
const GPIO29_LAST_INPUT_MODE: u8 = 3;
const GPIO29_PULL_UP: u8 = 1;
const GPIO29_PULL_DOWN: u8 = 2;

const ADC_VOLTS_PER_COUNT: f32 = 3.3 / 4096.0;

/// Bits of the GPIO register.
pub const BUTTON_X: u8 = 1 << 0;
pub const BUTTON_A: u8 = 1 << 1;

/// Die temperature in degrees Celsius from a raw sensor reading.
pub fn temperature_from_raw(raw: u16) -> f32 {
    let volts = raw as f32 * ADC_VOLTS_PER_COUNT;
    27.0 - (volts - 0.706) / 0.001721
}

/// Voltage on GPIO29 from a raw ADC reading.
pub fn adc_volts_from_raw(raw: u16) -> f32 {
    raw as f32 * ADC_VOLTS_PER_COUNT
}

/// Typed access to the coprocessor's registers.
pub struct Coprocessor<C: ControlBus> {
    bus: C,
}

impl<C: ControlBus> Coprocessor<C> {
    pub fn new(bus: C) -> Self {
        Self { bus }
    }

    pub fn bus(&mut self) -> &mut C {
        &mut self.bus
    }

    pub fn write_u8(&mut self, reg: u8, value: u8) -> Result<(), C::Error> {
        self.bus.write_register(reg, &[value])
    }

    pub fn read_u8(&mut self, reg: u8) -> Result<u8, C::Error> {
        let mut buf = [0u8; 1];
        self.bus.read_register(reg, &mut buf)?;
        Ok(buf[0])
    }

    /// 16-bit registers are little-endian.
    pub fn read_u16(&mut self, reg: u8) -> Result<u16, C::Error> {
        let mut buf = [0u8; 2];
        self.bus.read_register(reg, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn modify_bit(&mut self, reg: u8, bit: u8, set: bool) -> Result<(), C::Error> {
        let mut value = self.read_u8(reg)?;
        if set {
            value |= 1 << bit;
        } else {
            value &= !(1 << bit);
        }
        self.write_u8(reg, value)
    }

    pub fn set_resolution(&mut self, selector: u8) -> Result<(), C::Error> {
        self.write_u8(REG_SET_RES, selector)
    }

    pub fn start(&mut self) -> Result<(), C::Error> {
        self.write_u8(REG_START, 1)
    }

    pub fn stop(&mut self) -> Result<(), C::Error> {
        self.write_u8(REG_STOP, 1)
    }

    /// Place a sprite in display slot `slot`.
    pub fn write_sprite(&mut self, slot: u8, command: &[u8; 7]) -> Result<(), C::Error> {
        self.bus.write_register(slot, command)
    }

    pub fn clear_sprite(&mut self, slot: u8) -> Result<(), C::Error> {
        self.bus
            .write_register(slot, &super::sprite::CLEAR_SPRITE_COMMAND)
    }

    pub fn write_scroll_group(&mut self, idx: u8, config: &[u8; 13]) -> Result<(), C::Error> {
        self.bus.write_register(REG_SCROLL_BASE + idx, config)
    }

    /// Select which stored palette is displayed.
    pub fn set_palette_index(&mut self, idx: u8) -> Result<(), C::Error> {
        self.write_u8(REG_PALETTE_INDEX, idx)
    }

    /// Raw GPIO levels; the buttons are active low.
    pub fn gpio(&mut self) -> Result<u8, C::Error> {
        self.read_u8(REG_GPIO)
    }

    pub fn is_button_x_pressed(&mut self) -> Result<bool, C::Error> {
        Ok(self.gpio()? & BUTTON_X == 0)
    }

    pub fn is_button_a_pressed(&mut self) -> Result<bool, C::Error> {
        Ok(self.gpio()? & BUTTON_A == 0)
    }

    pub fn set_led_level(&mut self, level: u8) -> Result<(), C::Error> {
        self.write_u8(REG_LED, level | 0x80)
    }

    pub fn set_led_heartbeat(&mut self) -> Result<(), C::Error> {
        self.write_u8(REG_LED, 2)
    }

    /// Switch GPIO29 to output, or to input without pulls. An input keeps
    /// its pull configuration.
    pub fn set_gpio29_dir(&mut self, output: bool) -> Result<(), C::Error> {
        let mode = self.read_u8(REG_GPIO29_MODE)?;
        let mode = if output {
            GPIO29_OUTPUT
        } else if mode > GPIO29_LAST_INPUT_MODE {
            GPIO29_INPUT
        } else {
            return Ok(());
        };
        self.write_u8(REG_GPIO29_MODE, mode)
    }

    /// PWM level for GPIO29 in output mode.
    pub fn set_gpio29_value(&mut self, value: u8) -> Result<(), C::Error> {
        self.write_u8(REG_GPIO29_OUT, value)
    }

    pub fn set_gpio29_pull_up(&mut self, on: bool) -> Result<(), C::Error> {
        self.set_gpio29_pull(GPIO29_PULL_UP, on)
    }

    pub fn set_gpio29_pull_down(&mut self, on: bool) -> Result<(), C::Error> {
        self.set_gpio29_pull(GPIO29_PULL_DOWN, on)
    }

    fn set_gpio29_pull(&mut self, mask: u8, on: bool) -> Result<(), C::Error> {
        let mut mode = self.read_u8(REG_GPIO29_MODE)?;
        if mode > GPIO29_LAST_INPUT_MODE {
            return Ok(());
        }
        if on {
            mode |= mask;
        } else {
            mode &= !mask;
        }
        self.write_u8(REG_GPIO29_MODE, mode)
    }

    pub fn enable_gpio29_adc(&mut self) -> Result<(), C::Error> {
        self.write_u8(REG_GPIO29_MODE, GPIO29_ADC)
    }

    pub fn gpio29_adc(&mut self) -> Result<f32, C::Error> {
        Ok(adc_volts_from_raw(self.read_u16(REG_GPIO29_ADC)?))
    }

    pub fn gpio_hi(&mut self) -> Result<u8, C::Error> {
        self.read_u8(REG_GPIO_HI)
    }

    pub fn set_gpio_hi_dir(&mut self, pin: u8, output: bool) -> Result<(), C::Error> {
        self.modify_bit(REG_GPIO_HI_OE, pin, output)
    }

    pub fn set_gpio_hi_dir_all(&mut self, mask: u8) -> Result<(), C::Error> {
        self.write_u8(REG_GPIO_HI_OE, mask)
    }

    pub fn set_gpio_hi(&mut self, pin: u8, on: bool) -> Result<(), C::Error> {
        self.modify_bit(REG_GPIO_HI_OUT, pin, on)
    }

    pub fn set_gpio_hi_all(&mut self, mask: u8) -> Result<(), C::Error> {
        self.write_u8(REG_GPIO_HI_OUT, mask)
    }

    pub fn set_gpio_hi_pull_up(&mut self, pin: u8, on: bool) -> Result<(), C::Error> {
        self.modify_bit(REG_GPIO_HI_PULL_UP, pin, on)
    }

    pub fn set_gpio_hi_pull_up_all(&mut self, mask: u8) -> Result<(), C::Error> {
        self.write_u8(REG_GPIO_HI_PULL_UP, mask)
    }

    pub fn set_gpio_hi_pull_down(&mut self, pin: u8, on: bool) -> Result<(), C::Error> {
        self.modify_bit(REG_GPIO_HI_PULL_DOWN, pin, on)
    }

    pub fn set_gpio_hi_pull_down_all(&mut self, mask: u8) -> Result<(), C::Error> {
        self.write_u8(REG_GPIO_HI_PULL_DOWN, mask)
    }

    /// Coprocessor die temperature in degrees Celsius.
    pub fn gpu_temperature(&mut self) -> Result<f32, C::Error> {
        Ok(temperature_from_raw(self.read_u16(REG_GPU_TEMP)?))
    }

    /// The attached monitor's EDID base block.
    pub fn edid(&mut self) -> Result<[u8; EDID_LEN], C::Error> {
        let mut edid = [0u8; EDID_LEN];
        self.bus.read_register(REG_EDID, &mut edid)?;
        Ok(edid)
    }
}
