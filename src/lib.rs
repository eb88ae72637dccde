//! # periph-handlers
//!
//! Thread-safe, lazily initialized handlers for sensor devices, with
//! periodic monitoring that survives handler teardown.
//!
//! ## Features
//!
//! - **Lazy initialization**: the driver is built, configured and probed on
//!   first use, exactly once, no matter how many threads race to use it
//! - **Canonical errors**: every driver error domain folds into [`HandlerError`]
//! - **Threshold monitoring**: low/high bounds checked on every read
//! - **Continuous monitoring**: timer-driven sampling through a fixed-capacity
//!   handle registry, so a late tick never reaches a dropped handler
//! - **Statistics and diagnostics**: operation counts, timing, value extrema,
//!   error history and health
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Bus, driver, timer and clock abstractions
//! - `handler` - The sensor handler that ties everything together
//! - `registry` - Integer handle to handler mapping for timer callbacks
//! - `dispatcher` - Periodic timer bound to a registry handle
//! - `error` - Canonical error taxonomy and driver error translation
//! - `hal` - Concrete implementations (mock for testing, threads for desktop,
//!   esp32 for hardware)
//!
//! ## Example
//!
//! ```rust
//! use periph_handlers::{HandlerConfig, HandlerError, SensorHandler};
//! use periph_handlers::hal::{MockBus, MockSensor, MockTimer};
//!
//! let bus = MockBus::new();
//! bus.queue_value(22.5);
//!
//! let handler = SensorHandler::<MockSensor, _, _>::new(
//!     HandlerConfig::default().with_device_name("ambient"),
//!     bus.provider(),
//!     MockTimer::new(),
//! );
//!
//! // First use brings the device up
//! assert_eq!(handler.read(), Ok(22.5));
//! assert!(handler.is_initialized());
//!
//! // Inverted bounds are rejected
//! assert_eq!(handler.set_thresholds(80.0, 10.0), Err(HandlerError::InvalidParameter));
//! ```

#![warn(missing_docs)]

/// Handler configuration.
pub mod config;
/// Periodic timer dispatch through the monitoring registry.
pub mod dispatcher;
/// Error taxonomy and driver error translation.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// The sensor handler.
pub mod handler;
/// Fixed-capacity monitoring handle registry.
pub mod registry;
/// Statistics and diagnostics records.
pub mod stats;
/// Core traits for buses, drivers, timers and clocks.
pub mod traits;

// Re-exports for convenience
pub use config::HandlerConfig;
pub use dispatcher::{period_from_rate, PeriodicDispatcher};
pub use error::{translate, DriverError, DriverErrorKind, HandlerError, Result};
pub use handler::{
    HandlerState, Reading, ReadingCallback, SensorHandler, ThresholdCallback, ThresholdKind,
};
pub use registry::{MonitorTarget, MonitoringHandle, MonitoringRegistry, MONITORING_SLOTS};
pub use stats::{Diagnostics, Statistics};
pub use traits::{
    BusAdapter, BusProvider, Capabilities, Clock, DriverParam, OnceBus, SensorDriver, SensorInfo,
    TimerCallback, TimerService,
};
