//! Register file of the display coprocessor, as seen over its control bus.

use std::cell::RefCell;
use std::rc::Rc;

use picovision_hal::ControlBus;

use crate::error::ModelError;

const REG_GPIO: u8 = 0xC0;
const REG_LED: u8 = 0xC1;
const REG_GPIO29_MODE: u8 = 0xC2;
const REG_GPIO29_OUT: u8 = 0xC3;
const REG_GPIO29_ADC: u8 = 0xC4;
const REG_GPU_TEMP: u8 = 0xC6;
const REG_GPIO_HI: u8 = 0xC8;
const REG_GPIO_HI_OUT: u8 = 0xC9;
const REG_GPIO_HI_OE: u8 = 0xCA;
const REG_GPIO_HI_PULL_UP: u8 = 0xCB;
const REG_GPIO_HI_PULL_DOWN: u8 = 0xCC;
const REG_SCROLL_BASE: u8 = 0xE0;
const REG_PALETTE_INDEX: u8 = 0xF8;
const REG_EDID: u8 = 0xFB;
const REG_SET_RES: u8 = 0xFC;
const REG_START: u8 = 0xFD;
const REG_STOP: u8 = 0xFF;

const SPRITE_SLOTS: usize = 0x80;
const SCROLL_GROUPS: usize = 8;

/// Fixed EDID header every base block starts with.
const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

/// What a sprite slot was last told to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteSlot {
    Hidden,
    Shown { command: [u8; 7] },
}

/// Everything the host has configured, plus the inputs it can read back.
#[derive(Debug, Clone)]
pub struct CoprocessorState {
    pub resolution: Option<u8>,
    pub running: bool,
    pub palette_index: u8,
    pub sprites: [SpriteSlot; SPRITE_SLOTS],
    pub scroll_groups: [[u8; 13]; SCROLL_GROUPS],
    /// Active-low button inputs and other GPIO levels.
    pub gpio: u8,
    pub led: u8,
    pub gpio29_mode: u8,
    pub gpio29_out: u8,
    pub gpio29_adc_raw: u16,
    pub temperature_raw: u16,
    pub gpio_hi: u8,
    pub gpio_hi_out: u8,
    pub gpio_hi_oe: u8,
    pub gpio_hi_pull_up: u8,
    pub gpio_hi_pull_down: u8,
    pub edid: [u8; 128],
    /// Every register write, in order.
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Refuse the next this-many transactions.
    pub fail_next: u32,
}

impl Default for CoprocessorState {
    fn default() -> Self {
        let mut edid = [0u8; 128];
        edid[..8].copy_from_slice(&EDID_HEADER);
        let sum = edid[..127].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        edid[127] = 0u8.wrapping_sub(sum);
        Self {
            resolution: None,
            running: false,
            palette_index: 0,
            sprites: [SpriteSlot::Hidden; SPRITE_SLOTS],
            scroll_groups: [[0; 13]; SCROLL_GROUPS],
            gpio: 0xFF,
            led: 0,
            gpio29_mode: 0,
            gpio29_out: 0,
            gpio29_adc_raw: 0,
            // About 27 C on the RP2040 sensor.
            temperature_raw: 876,
            gpio_hi: 0,
            gpio_hi_out: 0,
            gpio_hi_oe: 0,
            gpio_hi_pull_up: 0,
            gpio_hi_pull_down: 0,
            edid,
            writes: Vec::new(),
            fail_next: 0,
        }
    }
}

impl CoprocessorState {
    /// Writes to `reg`, oldest first.
    pub fn writes_to(&self, reg: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, d)| d.clone())
            .collect()
    }

    fn write(&mut self, reg: u8, data: &[u8]) {
        self.writes.push((reg, data.to_vec()));
        let first = data.first().copied().unwrap_or(0);
        match reg {
            r if (r as usize) < SPRITE_SLOTS => {
                let slot = &mut self.sprites[r as usize];
                *slot = match <[u8; 7]>::try_from(data) {
                    Ok(command) => SpriteSlot::Shown { command },
                    Err(_) => SpriteSlot::Hidden,
                };
            }
            r if (REG_SCROLL_BASE..REG_SCROLL_BASE + SCROLL_GROUPS as u8).contains(&r) => {
                let group = &mut self.scroll_groups[(r - REG_SCROLL_BASE) as usize];
                let n = data.len().min(group.len());
                group[..n].copy_from_slice(&data[..n]);
            }
            REG_LED => self.led = first,
            REG_GPIO29_MODE => self.gpio29_mode = first,
            REG_GPIO29_OUT => self.gpio29_out = first,
            REG_GPIO_HI_OUT => self.gpio_hi_out = first,
            REG_GPIO_HI_OE => self.gpio_hi_oe = first,
            REG_GPIO_HI_PULL_UP => self.gpio_hi_pull_up = first,
            REG_GPIO_HI_PULL_DOWN => self.gpio_hi_pull_down = first,
            REG_PALETTE_INDEX => self.palette_index = first,
            REG_SET_RES => self.resolution = Some(first),
            REG_START => self.running = true,
            REG_STOP => self.running = false,
            _ => {}
        }
    }

    fn byte_register(&self, reg: u8) -> Option<u8> {
        Some(match reg {
            REG_GPIO => self.gpio,
            REG_LED => self.led,
            REG_GPIO29_MODE => self.gpio29_mode,
            REG_GPIO29_OUT => self.gpio29_out,
            REG_GPIO_HI => self.gpio_hi,
            REG_GPIO_HI_OUT => self.gpio_hi_out,
            REG_GPIO_HI_OE => self.gpio_hi_oe,
            REG_GPIO_HI_PULL_UP => self.gpio_hi_pull_up,
            REG_GPIO_HI_PULL_DOWN => self.gpio_hi_pull_down,
            REG_PALETTE_INDEX => self.palette_index,
            _ => return None,
        })
    }

    fn read(&self, reg: u8, buf: &mut [u8]) {
        buf.fill(0);
        let mut scratch = [0u8; 2];
        let src: &[u8] = match reg {
            REG_EDID => &self.edid,
            REG_GPIO29_ADC => {
                scratch = self.gpio29_adc_raw.to_le_bytes();
                &scratch
            }
            REG_GPU_TEMP => {
                scratch = self.temperature_raw.to_le_bytes();
                &scratch
            }
            _ => match self.byte_register(reg) {
                Some(value) => {
                    scratch[0] = value;
                    &scratch[..1]
                }
                None => &[],
            },
        };
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
    }
}

/// Control bus endpoint of the coprocessor. Clones share the register file,
/// so a test can keep one while the driver owns another.
#[derive(Clone, Default)]
pub struct SimCoprocessor {
    state: Rc<RefCell<CoprocessorState>>,
}

impl SimCoprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the register file.
    pub fn state(&self) -> CoprocessorState {
        self.state.borrow().clone()
    }

    /// Change inputs or inject failures.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut CoprocessorState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    fn check(&self, reg: u8) -> Result<(), ModelError> {
        let mut state = self.state.borrow_mut();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ModelError::Nak { reg });
        }
        Ok(())
    }
}

impl ControlBus for SimCoprocessor {
    type Error = ModelError;

    fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.check(reg)?;
        self.state.borrow_mut().write(reg, data);
        Ok(())
    }

    fn read_register(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.check(reg)?;
        self.state.borrow().read(reg, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edid_checksum_is_valid() {
        let state = CoprocessorState::default();
        let sum = state.edid.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn sprite_clear_hides_slot() {
        let mut bus = SimCoprocessor::new();
        bus.write_register(3, &[1, 2, 0, 10, 0, 20, 0]).unwrap();
        assert!(matches!(bus.state().sprites[3], SpriteSlot::Shown { .. }));
        bus.write_register(3, &[1, 0xFF, 0xFF]).unwrap();
        assert_eq!(bus.state().sprites[3], SpriteSlot::Hidden);
    }

    #[test]
    fn sixteen_bit_registers_read_little_endian() {
        let mut bus = SimCoprocessor::new();
        bus.with_state(|s| s.temperature_raw = 0x0123);
        let mut buf = [0u8; 2];
        bus.read_register(REG_GPU_TEMP, &mut buf).unwrap();
        assert_eq!(buf, [0x23, 0x01]);
    }

    #[test]
    fn injected_failure_is_reported_once() {
        let mut bus = SimCoprocessor::new();
        bus.with_state(|s| s.fail_next = 1);
        assert_eq!(bus.write_register(REG_START, &[1]), Err(ModelError::Nak { reg: REG_START }));
        assert!(bus.write_register(REG_START, &[1]).is_ok());
        assert!(bus.state().running);
    }
}
