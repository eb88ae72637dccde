//! ESP32 implementations of the timer and clock traits.
//!
//! Buses come from [`I2cBus`](crate::hal::I2cBus) wrapped around an
//! `esp_idf_hal::i2c::I2cDriver`; everything else a handler needs is here.

mod clock;
mod timer;

pub use clock::Esp32Clock;
pub use timer::Esp32Timer;
