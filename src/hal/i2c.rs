//! Bus adapter over any `embedded-hal` 1.0 I2C implementation.

use embedded_hal::i2c::{I2c, SevenBitAddress};

use crate::traits::BusAdapter;

/// I2C device at a fixed 7-bit address.
///
/// Works with any HAL's I2C driver, including `esp_idf_hal::i2c::I2cDriver`.
/// Transfers are bounded by the timeout the underlying driver was built with.
///
/// # Example
///
/// ```ignore
/// use periph_handlers::hal::I2cBus;
/// use periph_handlers::traits::OnceBus;
///
/// let i2c = I2cDriver::new(peripherals.i2c0, sda, scl, &config)?;
/// let provider = OnceBus::new(I2cBus::new(i2c, 0x48));
/// ```
#[derive(Debug)]
pub struct I2cBus<I> {
    i2c: I,
    address: SevenBitAddress,
}

impl<I: I2c> I2cBus<I> {
    /// Binds `i2c` to the device at `address`.
    pub fn new(i2c: I, address: SevenBitAddress) -> Self {
        Self { i2c, address }
    }

    /// Device address.
    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    /// Releases the underlying I2C driver.
    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I: I2c + Send> BusAdapter for I2cBus<I> {
    type Error = I::Error;

    fn write(&mut self, bytes: &[u8]) -> Result<usize, I::Error> {
        self.i2c.write(self.address, bytes)?;
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, I::Error> {
        self.i2c.read(self.address, buf)?;
        Ok(buf.len())
    }

    fn probe(&mut self) -> bool {
        let mut byte = [0u8; 1];
        self.i2c.read(self.address, &mut byte).is_ok()
    }

    fn write_read(&mut self, bytes: &[u8], buf: &mut [u8]) -> Result<usize, I::Error> {
        self.i2c.write_read(self.address, bytes, buf)?;
        Ok(buf.len())
    }
}
