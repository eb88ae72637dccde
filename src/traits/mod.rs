//! Trait definitions for the collaborators a handler is built from.
//!
//! This module defines the seams that let the same handler run over
//! different transports, drivers, and timer services:
//! - On ESP32 with ESP-IDF timers and an I2C peripheral
//! - On desktop with std threads and in-memory mocks
//!
//! # Submodules
//!
//! - `bus`: Bus adapter contract and bus construction
//! - `driver`: Driver library contract
//! - `timer`: Periodic timer service contract
//! - `clock`: Monotonic time source
//!
//! # Key Traits
//!
//! - [`BusAdapter`]: write/read/probe transport
//! - [`SensorDriver`]: pure driver bound to a bus adapter
//! - [`TimerService`]: periodic timer with an integer-only callback
//! - [`Clock`]: timestamps and operation timing

pub mod bus;
pub mod clock;
pub mod driver;
pub mod timer;

pub use bus::*;
pub use clock::*;
pub use driver::*;
pub use timer::*;
