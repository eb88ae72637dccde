//! Contract a device driver library exposes to its handler.
//!
//! Drivers are pure: they own a [`BusAdapter`], speak the device's
//! register protocol over it, and know nothing about locking, lifecycle,
//! statistics, or timers. Everything else lives in
//! [`SensorHandler`](crate::handler::SensorHandler).
//!
//! # Implementation Notes
//!
//! - `attach()` must not perform I/O beyond what is needed to bind the bus
//! - `configure()` receives one [`DriverParam`] at a time, in the order the
//!   handler applies its config; return `UnsupportedOperation` for
//!   parameters the device has no notion of
//! - `probe()` is a single cheap liveness check
//! - Power control is optional; report it through [`Capabilities`]

use crate::error::DriverError;
use crate::traits::BusAdapter;

/// One configuration step applied to a driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DriverParam {
    /// Select the bus/ADC channel.
    Channel(u8),
    /// Reference voltage in volts.
    ReferenceVoltage(f32),
    /// Series and parallel divider resistances in ohms.
    Divider {
        /// Series resistance.
        series: f32,
        /// Parallel resistance (0 = none).
        parallel: f32,
    },
    /// Beta/characteristic override.
    Beta(f32),
    /// Averaging: sample count and inter-sample delay.
    Sampling {
        /// Samples per reading.
        count: u32,
        /// Delay between samples in milliseconds.
        delay_ms: u32,
    },
    /// Exponential smoothing.
    Filter {
        /// Whether smoothing is applied.
        enabled: bool,
        /// Smoothing coefficient.
        alpha: f32,
    },
    /// Bus transaction timeout in milliseconds.
    Timeout(u32),
}

/// Feature flags a device reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capabilities {
    /// Supports synchronous threshold checks.
    pub threshold_monitoring: bool,
    /// Supports timer-driven continuous sampling.
    pub continuous_reading: bool,
    /// Supports offset calibration.
    pub calibration: bool,
    /// Has a real low-power state.
    pub power_control: bool,
}

impl Capabilities {
    /// Capabilities of a passive sensor: everything but power control.
    pub const PASSIVE_SENSOR: Self = Self {
        threshold_monitoring: true,
        continuous_reading: true,
        calibration: true,
        power_control: false,
    };
}

/// Static description of a device.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SensorInfo {
    /// Manufacturer name.
    pub manufacturer: &'static str,
    /// Model name.
    pub model: &'static str,
    /// Lowest measurable value.
    pub min_value: f32,
    /// Highest measurable value.
    pub max_value: f32,
    /// Smallest distinguishable step.
    pub resolution: f32,
    /// Typical accuracy.
    pub accuracy: f32,
    /// Typical response time in milliseconds.
    pub response_time_ms: u32,
    /// Feature flags.
    pub capabilities: Capabilities,
}

/// A sensor driver library bound to a bus adapter.
pub trait SensorDriver<B: BusAdapter>: Sized + Send {
    /// Driver error domain.
    type Error: DriverError;

    /// Constructs a driver instance bound to `bus`.
    fn attach(bus: B) -> Result<Self, Self::Error>;

    /// Applies one configuration parameter.
    fn configure(&mut self, param: DriverParam) -> Result<(), Self::Error>;

    /// Single liveness check of the device.
    fn probe(&mut self) -> Result<(), Self::Error>;

    /// Reads a converted value (offset and filtering applied).
    fn read_value(&mut self) -> Result<f32, Self::Error>;

    /// Returns the raw count behind the most recent reading.
    fn read_raw(&mut self) -> Result<u32, Self::Error>;

    /// Sets the offset compensation applied to converted values.
    fn set_offset(&mut self, offset: f32) -> Result<(), Self::Error>;

    /// Device description.
    fn info(&self) -> SensorInfo;

    /// Enters or leaves the device's low-power state.
    ///
    /// Only called when `info().capabilities.power_control` is set.
    /// Default implementation does nothing.
    fn set_low_power(&mut self, _sleep: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Releases the device and returns the bus.
    fn detach(self) -> B;
}
