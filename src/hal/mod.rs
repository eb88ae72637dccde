//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`] for various platforms.
//!
//! # Available Implementations
//!
//! - `mock`: Test implementations for desktop development
//! - `thread_timer`: std thread timer service and monotonic clock
//! - `i2c`: Bus adapter over `embedded-hal` I2C (requires `embedded-hal` feature)
//! - `esp32`: ESP-IDF timer service and clock (requires `esp32` feature)

pub mod mock;
pub mod thread_timer;

#[cfg(feature = "embedded-hal")]
pub mod i2c;

#[cfg(feature = "esp32")]
pub mod esp32;

pub use mock::*;
pub use thread_timer::{MonotonicClock, ThreadTimer, ThreadTimerError};

#[cfg(feature = "embedded-hal")]
pub use i2c::I2cBus;

#[cfg(feature = "esp32")]
pub use esp32::*;
