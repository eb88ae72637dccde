//! Handler configuration.
//!
//! A flat set of named options with explicit defaults. Names use
//! `heapless::String` so a config can live in static memory on targets
//! without an allocator, while remaining ergonomic on desktop.
//!
//! Combinations are not clamped when set; [`HandlerConfig::validate`] is
//! run at the point of use (initialize, range and threshold changes) and
//! rejects invalid ones with [`HandlerError::InvalidParameter`].
//!
//! # Example
//!
//! ```rust
//! use periph_handlers::config::HandlerConfig;
//!
//! let config = HandlerConfig::default()
//!     .with_device_name("motor_ntc")
//!     .with_channel(3)
//!     .with_thresholds(10.0, 80.0)
//!     .with_filtering(true, 0.2);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.device_name.as_str(), "motor_ntc");
//!
//! let bad = HandlerConfig::default().with_thresholds(80.0, 10.0);
//! assert!(bad.validate().is_err());
//! ```

use heapless::String as HString;

use crate::error::{HandlerError, Result};

/// Maximum length for short config strings (device names)
pub const MAX_SHORT_STRING: usize = 32;

/// Maximum length for longer config strings (descriptions)
pub const MAX_LONG_STRING: usize = 96;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

fn truncated<const N: usize>(s: &str) -> HString<N> {
    let mut out = HString::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Create a ShortString from a &str, truncating on a char boundary if too long
pub fn short_string(s: &str) -> ShortString {
    truncated(s)
}

/// Create a LongString from a &str, truncating on a char boundary if too long
pub fn long_string(s: &str) -> LongString {
    truncated(s)
}

// ============================================================================
// Handler Config
// ============================================================================

/// Complete handler configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandlerConfig {
    /// Device identity used in logs and readings
    pub device_name: ShortString,
    /// Human-readable description
    pub description: LongString,
    /// Bus channel (ADC channel, chip-select index, mux port)
    pub channel: u8,
    /// Reference voltage in volts
    pub reference_voltage: f32,
    /// Series divider resistance in ohms
    pub divider_resistance: f32,
    /// Parallel resistance in ohms (0 = none)
    pub parallel_resistance: f32,
    /// Beta/characteristic override (0 = driver default)
    pub beta_value: f32,
    /// Offset added to every converted value
    pub calibration_offset: f32,
    /// Samples averaged per reading
    pub sample_count: u32,
    /// Delay between averaged samples in milliseconds
    pub sample_delay_ms: u32,
    /// Whether exponential smoothing is applied
    pub enable_filtering: bool,
    /// Smoothing coefficient in (0.0, 1.0]
    pub filter_alpha: f32,
    /// Arm threshold monitoring during initialize
    pub enable_threshold_monitoring: bool,
    /// Low threshold bound
    pub low_threshold: f32,
    /// High threshold bound
    pub high_threshold: f32,
    /// Lowest plausible value
    pub min_value: f32,
    /// Highest plausible value
    pub max_value: f32,
    /// Bus transaction timeout in milliseconds
    pub bus_timeout_ms: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            device_name: short_string("sensor"),
            description: long_string("Generic sensor"),
            channel: 0,
            reference_voltage: 3.3,
            divider_resistance: 10_000.0,
            parallel_resistance: 0.0,
            beta_value: 0.0,
            calibration_offset: 0.0,
            sample_count: 1,
            sample_delay_ms: 0,
            enable_filtering: false,
            filter_alpha: 0.1,
            enable_threshold_monitoring: false,
            low_threshold: -40.0,
            high_threshold: 125.0,
            min_value: -40.0,
            max_value: 125.0,
            bus_timeout_ms: 100,
        }
    }
}

impl HandlerConfig {
    /// Set the device name
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = short_string(name);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = long_string(description);
        self
    }

    /// Set the bus channel
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Set the reference voltage
    pub fn with_reference_voltage(mut self, volts: f32) -> Self {
        self.reference_voltage = volts;
        self
    }

    /// Set the series and parallel divider resistances
    pub fn with_divider(mut self, series_ohms: f32, parallel_ohms: f32) -> Self {
        self.divider_resistance = series_ohms;
        self.parallel_resistance = parallel_ohms;
        self
    }

    /// Set the beta override
    pub fn with_beta_value(mut self, beta: f32) -> Self {
        self.beta_value = beta;
        self
    }

    /// Set the calibration offset
    pub fn with_calibration_offset(mut self, offset: f32) -> Self {
        self.calibration_offset = offset;
        self
    }

    /// Set sample averaging
    pub fn with_sampling(mut self, count: u32, delay_ms: u32) -> Self {
        self.sample_count = count;
        self.sample_delay_ms = delay_ms;
        self
    }

    /// Set exponential smoothing
    pub fn with_filtering(mut self, enabled: bool, alpha: f32) -> Self {
        self.enable_filtering = enabled;
        self.filter_alpha = alpha;
        self
    }

    /// Set threshold bounds and arm monitoring at initialize
    pub fn with_thresholds(mut self, low: f32, high: f32) -> Self {
        self.low_threshold = low;
        self.high_threshold = high;
        self.enable_threshold_monitoring = true;
        self
    }

    /// Set the plausible value range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    /// Set the bus timeout
    pub fn with_bus_timeout_ms(mut self, ms: u32) -> Self {
        self.bus_timeout_ms = ms;
        self
    }

    /// Checks every option combination.
    ///
    /// Threshold bounds are only checked when threshold monitoring is armed.
    pub fn validate(&self) -> Result<()> {
        validate_bounds(self.min_value, self.max_value)?;
        if self.enable_threshold_monitoring {
            validate_bounds(self.low_threshold, self.high_threshold)?;
        }
        validate_filter(self.enable_filtering, self.filter_alpha)?;
        if self.sample_count == 0 {
            return Err(HandlerError::InvalidParameter);
        }
        if !(self.reference_voltage > 0.0) || !(self.divider_resistance >= 0.0) {
            return Err(HandlerError::InvalidParameter);
        }
        if self.bus_timeout_ms == 0 {
            return Err(HandlerError::InvalidParameter);
        }
        Ok(())
    }
}

/// Rejects `low >= high` and non-finite bounds.
pub fn validate_bounds(low: f32, high: f32) -> Result<()> {
    if low.is_finite() && high.is_finite() && low < high {
        Ok(())
    } else {
        Err(HandlerError::InvalidParameter)
    }
}

/// Rejects a smoothing coefficient outside (0.0, 1.0] when filtering is on.
pub fn validate_filter(enabled: bool, alpha: f32) -> Result<()> {
    if !enabled || (alpha > 0.0 && alpha <= 1.0) {
        Ok(())
    } else {
        Err(HandlerError::InvalidParameter)
    }
}

// ============================================================================
// Tests
// ============================================================================
