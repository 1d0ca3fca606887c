//! One APS6404 PSRAM chip: 8 MiB of storage plus its command-mode state.

/// Bytes in one chip.
pub const CHIP_SIZE: usize = 8 * 1024 * 1024;
/// Bursts wrap inside a page of this size when the clock is too high for the
/// chip to cross into the next one.
pub const PAGE_SIZE: u32 = 1024;

/// Interface mode the chip is listening in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipMode {
    Spi,
    Qpi,
}

/// Storage and mode of a single chip.
pub struct Chip {
    memory: Vec<u8>,
    mode: ChipMode,
    reset_enabled: bool,
    resets: u32,
}

impl Chip {
    /// A chip straight out of power-on: SPI mode, contents zeroed.
    pub fn new() -> Self {
        Self {
            memory: vec![0; CHIP_SIZE],
            mode: ChipMode::Spi,
            reset_enabled: false,
            resets: 0,
        }
    }

    pub fn mode(&self) -> ChipMode {
        self.mode
    }

    /// Completed software resets since power-on.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Act on a single control command. Returns false for a byte the chip
    /// does not treat as a control command.
    pub fn control(&mut self, command: u8) -> bool {
        match command {
            0x66 => {
                self.reset_enabled = true;
                return true;
            }
            0x99 if self.reset_enabled => {
                self.mode = ChipMode::Spi;
                self.resets += 1;
            }
            0x99 => {}
            0x35 => self.mode = ChipMode::Qpi,
            0xF5 => self.mode = ChipMode::Spi,
            _ => {
                self.reset_enabled = false;
                return false;
            }
        }
        self.reset_enabled = false;
        true
    }

    /// Address of byte `index` of a burst starting at `start`.
    pub fn burst_address(start: u32, index: u32, wrap_in_page: bool) -> usize {
        let addr = if wrap_in_page {
            (start & !(PAGE_SIZE - 1)) | (start.wrapping_add(index) & (PAGE_SIZE - 1))
        } else {
            start.wrapping_add(index)
        };
        addr as usize % CHIP_SIZE
    }

    pub fn write_byte(&mut self, addr: usize, value: u8) {
        self.memory[addr % CHIP_SIZE] = value;
    }

    pub fn read_byte(&self, addr: usize) -> u8 {
        self.memory[addr % CHIP_SIZE]
    }

    /// Copy `buf.len()` bytes out, wrapping at the top of the chip.
    pub fn read(&self, addr: u32, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_byte(addr as usize + i);
        }
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_byte(addr as usize + i, b);
        }
    }
}

impl Default for Chip {
    fn default() -> Self {
        Self::new()
    }
}
