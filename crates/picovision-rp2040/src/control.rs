//! Coprocessor register access over I2C1.

use embedded_hal::i2c::{I2c, Operation};
use picovision_core::display::control::I2C_ADDR;
use picovision_hal::ControlBus;

/// `ControlBus` over any blocking I2C master. A register write is the
/// register number followed by the payload in one transaction; a read
/// writes the register number then reads with a repeated start.
pub struct I2cControlBus<I> {
    i2c: I,
}

impl<I: I2c> I2cControlBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }
}

impl<I: I2c> ControlBus for I2cControlBus<I> {
    type Error = I::Error;

    fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), Self::Error> {
        // Adjacent writes go out back to back without a restart.
        self.i2c
            .transaction(I2C_ADDR, &mut [Operation::Write(&[reg]), Operation::Write(data)])
    }

    fn read_register(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.write_read(I2C_ADDR, &[reg], buf)
    }
}
