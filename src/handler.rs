//! Thread-safe, lazily initialized sensor handler.
//!
//! A [`SensorHandler`] owns exactly one driver instance, built on first use
//! over a bus opened from its [`BusProvider`]. All mutable state sits
//! behind one mutex; every accessor brings the device up if needed, runs
//! under that mutex, records statistics and diagnostics, and returns a
//! canonical [`HandlerError`].
//!
//! # Locking
//!
//! | Lock | Guards |
//! |------|--------|
//! | state mutex | config, driver, lifecycle state, thresholds, callbacks, statistics, diagnostics |
//! | monitor mutex | the periodic dispatcher and its handle |
//! | registry mutex | the process-wide handle table ([`registry::global`]) |
//!
//! Locks are only ever taken in the order monitor, then state. A timer
//! tick takes the registry mutex to resolve its handle, releases it, and
//! only then takes the state mutex. User callbacks always run with no
//! handler lock held.
//!
//! # Stopping Continuous Monitoring
//!
//! [`stop_continuous_monitoring()`](SensorHandler::stop_continuous_monitoring),
//! [`deinitialize()`](SensorHandler::deinitialize) and `Drop` all:
//!
//! 1. Stop the timer (waiting out a tick already running, where the timer
//!    service supports it)
//! 2. Unregister the handle
//! 3. Only then take the state mutex to clear callbacks and free the driver
//!
//! A user callback may stop monitoring on its own handler, even while
//! another thread is stopping it. When the monitor mutex is already taken
//! the callback only clears the monitoring state and returns, and the
//! other thread finishes the teardown.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use periph_handlers::{HandlerConfig, SensorHandler, ThresholdKind};
//! use periph_handlers::hal::{MockBus, MockSensor, MockTimer};
//!
//! let bus = MockBus::new();
//! bus.queue_values(&[5.0, 50.0, 90.0]);
//!
//! let handler = SensorHandler::<MockSensor, _, _>::new(
//!     HandlerConfig::default().with_device_name("coolant"),
//!     bus.provider(),
//!     MockTimer::new(),
//! );
//!
//! let highs = Arc::new(AtomicU32::new(0));
//! let seen = Arc::clone(&highs);
//! handler.set_thresholds(10.0, 80.0).unwrap();
//! handler
//!     .enable_threshold_monitoring(move |_value, kind| {
//!         if kind == ThresholdKind::High {
//!             seen.fetch_add(1, Ordering::SeqCst);
//!         }
//!     })
//!     .unwrap();
//!
//! for _ in 0..3 {
//!     handler.read().unwrap();
//! }
//! assert_eq!(highs.load(Ordering::SeqCst), 1);
//! assert_eq!(handler.statistics().threshold_violations, 2);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

use crate::config::{self, HandlerConfig, ShortString};
use crate::dispatcher::{self, period_from_rate, PeriodicDispatcher};
use crate::error::{translate_error, HandlerError, Result};
use crate::hal::{MonotonicClock, ThreadTimer};
use crate::registry::{self, MonitorTarget};
use crate::stats::{Diagnostics, Statistics, UNHEALTHY_AFTER_CONSECUTIVE_ERRORS};
use crate::traits::{
    BusProvider, Capabilities, Clock, DriverParam, SensorDriver, SensorInfo, TimerService,
};

/// Name given to monitoring timers.
pub const MONITOR_TIMER_NAME: &str = "sensor_monitor";

/// Lifecycle state of a handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HandlerState {
    /// No driver instance exists.
    #[default]
    Uninitialized,
    /// Driver built, configured and probed.
    Initialized,
    /// Initialized, in low-power (or state-only) sleep.
    Sleeping,
    /// The device reported a hardware fault; re-initialize to recover.
    Faulted,
}

/// Which bound a threshold violation crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ThresholdKind {
    /// Value fell below the low bound.
    Low,
    /// Value rose above the high bound.
    High,
}

/// One sample, as delivered to continuous monitoring callbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Converted value (meaningless when `valid` is false).
    pub value: f32,
    /// Raw count behind the value.
    pub raw: u32,
    /// When the sample completed, in microseconds of the handler clock.
    pub timestamp_us: u64,
    /// Whether the sample succeeded.
    pub valid: bool,
    /// Why the sample failed.
    pub error: Option<HandlerError>,
}

impl Reading {
    fn failed(error: HandlerError, timestamp_us: u64) -> Self {
        Self {
            value: 0.0,
            raw: 0,
            timestamp_us,
            valid: false,
            error: Some(error),
        }
    }
}

/// Invoked with the offending value when a read crosses a threshold.
pub type ThresholdCallback = Arc<dyn Fn(f32, ThresholdKind) + Send + Sync>;

/// Invoked with every continuous monitoring sample, failed ones included.
pub type ReadingCallback = Arc<dyn Fn(&Reading) + Send + Sync>;

#[derive(Default)]
struct ThresholdState {
    enabled: bool,
    callback: Option<ThresholdCallback>,
}

type ThresholdEvent = (ThresholdCallback, f32, ThresholdKind);

struct Inner<D, P> {
    config: HandlerConfig,
    provider: P,
    driver: Option<D>,
    info: Option<SensorInfo>,
    state: HandlerState,
    thresholds: ThresholdState,
    continuous: Option<ReadingCallback>,
    statistics: Statistics,
    diagnostics: Diagnostics,
}

/// Handler for one sensor device.
///
/// `D` is the driver library, `P` builds its bus, `T` is the timer service
/// used for continuous monitoring.
pub struct SensorHandler<D, P, T = ThreadTimer>
where
    P: BusProvider,
    D: SensorDriver<P::Bus>,
    T: TimerService,
{
    name: ShortString,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<D, P>>,
    monitor: Mutex<PeriodicDispatcher<T>>,
}

fn relock<G>(result: std::result::Result<G, PoisonError<G>>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl<D, P, T> SensorHandler<D, P, T>
where
    P: BusProvider,
    D: SensorDriver<P::Bus>,
    T: TimerService,
{
    /// Creates an uninitialized handler. No I/O happens until first use.
    pub fn new(config: HandlerConfig, provider: P, timer: T) -> Self {
        Self {
            name: config.device_name.clone(),
            clock: Arc::new(MonotonicClock::new()),
            inner: Mutex::new(Inner {
                config,
                provider,
                driver: None,
                info: None,
                state: HandlerState::Uninitialized,
                thresholds: ThresholdState::default(),
                continuous: None,
                statistics: Statistics::default(),
                diagnostics: Diagnostics::default(),
            }),
            monitor: Mutex::new(PeriodicDispatcher::new(timer)),
        }
    }

    /// Replaces the time source used for timestamps and operation timing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Device name from the config.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<D, P>> {
        relock(self.inner.lock())
    }

    fn lock_monitor(&self) -> MutexGuard<'_, PeriodicDispatcher<T>> {
        relock(self.monitor.lock())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Builds, configures and probes the driver.
    ///
    /// Idempotent: returns `Ok` at once if already initialized. From
    /// [`HandlerState::Faulted`] it discards the old driver and rebuilds.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::InvalidParameter`] for an invalid config
    /// - [`HandlerError::CommunicationFailure`] if the probe fails
    /// - Whatever the bus provider or driver reports, translated
    ///
    /// On any error nothing is left allocated.
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            HandlerState::Initialized | HandlerState::Sleeping => {
                log::debug!("{}: already initialized", self.name);
                Ok(())
            }
            HandlerState::Faulted => {
                log::warn!("{}: rebuilding faulted driver", self.name);
                self.release_driver(&mut inner);
                self.bring_up(&mut inner)
            }
            HandlerState::Uninitialized => self.bring_up(&mut inner),
        }
    }

    /// Returns true if initialized, initializing first if needed.
    ///
    /// A faulted handler is not rebuilt here; call
    /// [`initialize()`](Self::initialize).
    pub fn ensure_initialized(&self) -> bool {
        let mut inner = self.lock();
        self.ready(&mut inner).is_ok()
    }

    /// Returns true if a driver is up and usable.
    pub fn is_initialized(&self) -> bool {
        matches!(
            self.lock().state,
            HandlerState::Initialized | HandlerState::Sleeping
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandlerState {
        self.lock().state
    }

    /// Stops monitoring, then frees the driver and bus. Idempotent.
    pub fn deinitialize(&self) -> Result<()> {
        let stopped = self.stop_continuous_monitoring();

        let mut inner = self.lock();
        if inner.state != HandlerState::Uninitialized {
            self.release_driver(&mut inner);
            log::info!("{}: deinitialized", self.name);
        }
        stopped
    }

    fn bring_up(&self, inner: &mut Inner<D, P>) -> Result<()> {
        let result = self.try_bring_up(inner);
        if let Err(err) = result {
            inner.diagnostics.record_error(err, self.clock.now_ms());
            log::error!("{}: initialization failed: {}", self.name, err);
        }
        result
    }

    fn try_bring_up(&self, inner: &mut Inner<D, P>) -> Result<()> {
        inner.config.validate().inspect_err(|_| {
            log::error!("{}: rejected invalid configuration", self.name);
        })?;

        let bus = inner.provider.open()?;
        let mut driver = D::attach(bus).map_err(|e| translate_error(&e))?;

        for param in driver_params(&inner.config) {
            if let Err(e) = driver.configure(param) {
                log::warn!("{}: {:?} rejected, rolling back", self.name, param);
                drop(driver.detach());
                return Err(translate_error(&e));
            }
        }
        if let Err(e) = driver.set_offset(inner.config.calibration_offset) {
            drop(driver.detach());
            return Err(translate_error(&e));
        }
        if let Err(e) = driver.probe() {
            log::error!("{}: probe failed: {:?}", self.name, e);
            drop(driver.detach());
            return Err(HandlerError::CommunicationFailure);
        }

        let info = driver.info();
        inner.info = Some(info);
        inner.driver = Some(driver);
        inner.state = HandlerState::Initialized;
        inner.diagnostics.sensor_available = true;
        inner.diagnostics.threshold_monitoring_supported = info.capabilities.threshold_monitoring;
        inner.diagnostics.calibration_valid = inner.config.calibration_offset != 0.0;
        inner.diagnostics.record_success();

        if inner.config.enable_threshold_monitoring && info.capabilities.threshold_monitoring {
            inner.thresholds.enabled = true;
            inner.diagnostics.threshold_monitoring_enabled = true;
            log::info!(
                "{}: thresholds armed [{}, {}]",
                self.name,
                inner.config.low_threshold,
                inner.config.high_threshold
            );
        }

        log::info!("{}: initialized ({} {})", self.name, info.manufacturer, info.model);
        Ok(())
    }

    fn release_driver(&self, inner: &mut Inner<D, P>) {
        if let Some(driver) = inner.driver.take() {
            drop(driver.detach());
        }
        inner.info = None;
        inner.state = HandlerState::Uninitialized;
        inner.diagnostics.sensor_available = false;
    }

    /// Lazy-initialization gate run by every accessor.
    fn ready(&self, inner: &mut Inner<D, P>) -> Result<()> {
        match inner.state {
            HandlerState::Initialized | HandlerState::Sleeping => Ok(()),
            HandlerState::Faulted => Err(HandlerError::HardwareFault),
            HandlerState::Uninitialized => self
                .bring_up(inner)
                .map_err(|_| HandlerError::NotInitialized),
        }
    }

    /// Runs one driver operation with timing, statistics and diagnostics.
    fn timed<R>(
        &self,
        inner: &mut Inner<D, P>,
        op: impl FnOnce(&mut D) -> std::result::Result<R, D::Error>,
    ) -> Result<R> {
        self.accounted(inner, |d| op(d).map_err(|e| translate_error(&e)))
    }

    /// Reads one converted value; a non-finite value counts as a failed
    /// operation.
    fn read_checked(&self, inner: &mut Inner<D, P>) -> Result<f32> {
        self.accounted(inner, |d| match d.read_value() {
            Ok(value) if value.is_finite() => Ok(value),
            Ok(_) => Err(HandlerError::OutOfRange),
            Err(e) => Err(translate_error(&e)),
        })
    }

    fn accounted<R>(
        &self,
        inner: &mut Inner<D, P>,
        op: impl FnOnce(&mut D) -> Result<R>,
    ) -> Result<R> {
        let start = self.clock.now_us();
        let result = match inner.driver.as_mut() {
            Some(driver) => op(driver),
            None => Err(HandlerError::NotInitialized),
        };
        let elapsed = self.clock.now_us().saturating_sub(start);

        inner
            .statistics
            .record_operation(result.is_ok(), u32::try_from(elapsed).unwrap_or(u32::MAX));
        inner.diagnostics.record(&result, self.clock.now_ms());

        if let Err(HandlerError::HardwareFault) = result {
            log::error!("{}: hardware fault, handler faulted", self.name);
            inner.state = HandlerState::Faulted;
        }
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads one converted value.
    ///
    /// Successful reads are checked against armed thresholds; a crossing
    /// fires the threshold callback once, after the handler lock is released.
    pub fn read(&self) -> Result<f32> {
        self.read_reading().map(|r| r.value)
    }

    /// Reads one value along with its raw count and timestamp.
    pub fn read_reading(&self) -> Result<Reading> {
        let (result, event) = {
            let mut inner = self.lock();
            self.ready(&mut inner)?;
            self.sample(&mut inner)
        };
        fire(event);
        result
    }

    /// Returns the raw count behind the most recent reading.
    pub fn read_raw(&self) -> Result<u32> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        let raw = self.timed(&mut inner, |d| d.read_raw())?;
        inner.diagnostics.current_raw = raw;
        Ok(raw)
    }

    fn sample(&self, inner: &mut Inner<D, P>) -> (Result<Reading>, Option<ThresholdEvent>) {
        let value = match self.read_checked(inner) {
            Ok(value) => value,
            Err(err) => return (Err(err), None),
        };
        inner.statistics.record_value(value);

        let raw = inner
            .driver
            .as_mut()
            .and_then(|d| d.read_raw().ok())
            .unwrap_or(0);
        inner.diagnostics.current_raw = raw;

        let reading = Reading {
            value,
            raw,
            timestamp_us: self.clock.now_us(),
            valid: true,
            error: None,
        };
        (Ok(reading), check_thresholds(inner, value))
    }

    // =========================================================================
    // Calibration and Range
    // =========================================================================

    /// Calibrates against a known reference value.
    ///
    /// Reads the current value, removes any offset already applied, and
    /// sets `offset = reference - uncompensated` on both the handler and
    /// the driver.
    pub fn calibrate(&self, reference: f32) -> Result<()> {
        if !reference.is_finite() {
            return Err(HandlerError::InvalidParameter);
        }
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        require(inner.info.map(|i| i.capabilities.calibration))?;

        let current = self.read_checked(&mut inner)?;
        let offset = reference - (current - inner.config.calibration_offset);
        self.timed(&mut inner, |d| d.set_offset(offset))
            .map_err(|_| HandlerError::CalibrationFailed)?;

        inner.config.calibration_offset = offset;
        inner.diagnostics.calibration_valid = true;
        inner.statistics.record_calibration();
        log::info!("{}: calibrated, offset {:.3}", self.name, offset);
        Ok(())
    }

    /// Applies a calibration offset directly.
    pub fn set_calibration_offset(&self, offset: f32) -> Result<()> {
        if !offset.is_finite() {
            return Err(HandlerError::InvalidParameter);
        }
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        self.timed(&mut inner, |d| d.set_offset(offset))?;
        inner.config.calibration_offset = offset;
        inner.diagnostics.calibration_valid = true;
        log::info!("{}: calibration offset {:.3}", self.name, offset);
        Ok(())
    }

    /// Current calibration offset.
    pub fn calibration_offset(&self) -> Result<f32> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        Ok(inner.config.calibration_offset)
    }

    /// Clears the calibration offset.
    pub fn reset_calibration(&self) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        self.timed(&mut inner, |d| d.set_offset(0.0))?;
        inner.config.calibration_offset = 0.0;
        inner.diagnostics.calibration_valid = false;
        log::info!("{}: calibration reset", self.name);
        Ok(())
    }

    /// Sets the plausible value range used by [`self_test()`](Self::self_test).
    pub fn set_range(&self, min: f32, max: f32) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        config::validate_bounds(min, max)?;
        inner.config.min_value = min;
        inner.config.max_value = max;
        Ok(())
    }

    /// Plausible value range `(min, max)`.
    pub fn range(&self) -> Result<(f32, f32)> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        Ok((inner.config.min_value, inner.config.max_value))
    }

    /// Smallest distinguishable step the device reports.
    pub fn resolution(&self) -> Result<f32> {
        self.info().map(|i| i.resolution)
    }

    // =========================================================================
    // Thresholds
    // =========================================================================

    /// Stores new threshold bounds.
    ///
    /// # Errors
    ///
    /// [`HandlerError::InvalidParameter`] if `low >= high` or either bound
    /// is not finite; the previous bounds are kept.
    pub fn set_thresholds(&self, low: f32, high: f32) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        if let Err(err) = config::validate_bounds(low, high) {
            log::warn!("{}: rejected thresholds [{}, {}]", self.name, low, high);
            return Err(err);
        }
        inner.config.low_threshold = low;
        inner.config.high_threshold = high;
        log::info!("{}: thresholds [{}, {}]", self.name, low, high);
        Ok(())
    }

    /// Current threshold bounds `(low, high)`.
    pub fn thresholds(&self) -> Result<(f32, f32)> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        Ok((inner.config.low_threshold, inner.config.high_threshold))
    }

    /// Arms threshold checking with `callback`.
    ///
    /// Every successful read below `low` or above `high` counts one
    /// violation and calls `callback` once. There is no hysteresis: a
    /// value sitting past a bound fires on every read.
    pub fn enable_threshold_monitoring<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(f32, ThresholdKind) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        require(inner.info.map(|i| i.capabilities.threshold_monitoring))?;
        config::validate_bounds(inner.config.low_threshold, inner.config.high_threshold)?;

        inner.thresholds.callback = Some(Arc::new(callback));
        inner.thresholds.enabled = true;
        inner.diagnostics.threshold_monitoring_enabled = true;
        log::info!("{}: threshold monitoring enabled", self.name);
        Ok(())
    }

    /// Disarms threshold checking and drops the callback.
    pub fn disable_threshold_monitoring(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.thresholds = ThresholdState::default();
        inner.diagnostics.threshold_monitoring_enabled = false;
        log::info!("{}: threshold monitoring disabled", self.name);
        Ok(())
    }

    /// Whether threshold checking is armed.
    pub fn is_threshold_monitoring_enabled(&self) -> bool {
        self.lock().thresholds.enabled
    }

    // =========================================================================
    // Continuous Monitoring
    // =========================================================================

    /// Stops periodic sampling. Idempotent.
    ///
    /// Safe to call from a monitoring callback. If another thread is
    /// already stopping this handler, the callback only switches sampling
    /// off and leaves the teardown to that thread.
    pub fn stop_continuous_monitoring(&self) -> Result<()> {
        if !dispatcher::in_tick() {
            let mut dispatcher = self.lock_monitor();
            return self.halt_monitoring(&mut dispatcher);
        }

        let mut dispatcher = match self.monitor.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            // The holder is stopping us and waits for this tick to return
            Err(TryLockError::WouldBlock) => {
                let mut inner = self.lock();
                inner.continuous = None;
                inner.diagnostics.continuous_monitoring_active = false;
                log::debug!("{}: stop deferred to concurrent teardown", self.name);
                return Ok(());
            }
        };
        self.halt_monitoring(&mut dispatcher)
    }

    fn halt_monitoring(&self, dispatcher: &mut PeriodicDispatcher<T>) -> Result<()> {
        let Some(handle) = dispatcher.handle() else {
            return Ok(());
        };

        let stopped = dispatcher.stop();
        registry::global().unregister(handle);
        let destroyed = dispatcher.destroy();

        {
            let mut inner = self.lock();
            inner.continuous = None;
            inner.diagnostics.continuous_monitoring_active = false;
        }
        log::info!("{}: continuous monitoring stopped", self.name);
        stopped.and(destroyed)
    }

    /// Whether periodic sampling is running.
    pub fn is_monitoring_active(&self) -> bool {
        self.lock().diagnostics.continuous_monitoring_active
    }

    // =========================================================================
    // Sleep
    // =========================================================================

    /// Enters sleep.
    ///
    /// Devices with [`Capabilities::power_control`] are put into their
    /// low-power state. For passive devices this is a state change only;
    /// reads still reach the device.
    pub fn enter_sleep(&self) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        if inner.state == HandlerState::Sleeping {
            return Ok(());
        }
        if power_control(&inner) {
            self.timed(&mut inner, |d| d.set_low_power(true))?;
            log::info!("{}: entered low-power mode", self.name);
        } else {
            log::info!("{}: entered sleep (state only)", self.name);
        }
        inner.state = HandlerState::Sleeping;
        Ok(())
    }

    /// Leaves sleep.
    pub fn exit_sleep(&self) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        if inner.state != HandlerState::Sleeping {
            return Ok(());
        }
        if power_control(&inner) {
            self.timed(&mut inner, |d| d.set_low_power(false))?;
        }
        inner.state = HandlerState::Initialized;
        log::info!("{}: exited sleep", self.name);
        Ok(())
    }

    /// Whether the handler is sleeping.
    pub fn is_sleeping(&self) -> bool {
        self.lock().state == HandlerState::Sleeping
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Reads once and checks the value against the configured range.
    ///
    /// Failure marks the handler unhealthy; success marks it healthy.
    pub fn self_test(&self) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;

        let value = match self.read_checked(&mut inner) {
            Ok(value) => value,
            Err(err) => {
                inner.diagnostics.healthy = false;
                log::warn!("{}: self-test read failed: {}", self.name, err);
                return Err(err);
            }
        };
        if !(inner.config.min_value..=inner.config.max_value).contains(&value) {
            inner.diagnostics.healthy = false;
            log::warn!("{}: self-test value {} out of range", self.name, value);
            return Err(HandlerError::OutOfRange);
        }
        inner.diagnostics.healthy = true;
        log::info!("{}: self-test passed ({})", self.name, value);
        Ok(())
    }

    /// Reports health from accumulated diagnostics, without I/O.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::HardwareFault`] when marked unhealthy
    /// - [`HandlerError::CommunicationFailure`] when consecutive errors
    ///   exceed the tolerance
    pub fn check_health(&self) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        if !inner.diagnostics.healthy {
            return Err(HandlerError::HardwareFault);
        }
        if inner.diagnostics.consecutive_errors > UNHEALTHY_AFTER_CONSECUTIVE_ERRORS {
            return Err(HandlerError::CommunicationFailure);
        }
        Ok(())
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Snapshot of the statistics.
    pub fn statistics(&self) -> Statistics {
        self.lock().statistics
    }

    /// Snapshot of the diagnostics.
    pub fn diagnostics(&self) -> Diagnostics {
        self.lock().diagnostics
    }

    /// Clears all statistics.
    pub fn reset_statistics(&self) {
        self.lock().statistics = Statistics::default();
        log::info!("{}: statistics reset", self.name);
    }

    /// Clears error history and restores health.
    pub fn reset_diagnostics(&self) {
        self.lock().diagnostics.reset_errors();
        log::info!("{}: diagnostics reset", self.name);
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> HandlerConfig {
        self.lock().config.clone()
    }

    /// Device description reported by the driver.
    pub fn info(&self) -> Result<SensorInfo> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        inner.info.ok_or(HandlerError::NotInitialized)
    }

    /// Device feature flags.
    pub fn capabilities(&self) -> Result<Capabilities> {
        self.info().map(|i| i.capabilities)
    }

    // =========================================================================
    // Driver Parameters
    // =========================================================================

    fn configure(&self, param: DriverParam, commit: impl FnOnce(&mut HandlerConfig)) -> Result<()> {
        let mut inner = self.lock();
        self.ready(&mut inner)?;
        self.timed(&mut inner, |d| d.configure(param))?;
        commit(&mut inner.config);
        log::debug!("{}: applied {:?}", self.name, param);
        Ok(())
    }

    /// Selects the bus/ADC channel.
    pub fn set_channel(&self, channel: u8) -> Result<()> {
        self.configure(DriverParam::Channel(channel), |c| c.channel = channel)
    }

    /// Sets the reference voltage.
    pub fn set_reference_voltage(&self, volts: f32) -> Result<()> {
        if !(volts.is_finite() && volts > 0.0) {
            return Err(HandlerError::InvalidParameter);
        }
        self.configure(DriverParam::ReferenceVoltage(volts), |c| {
            c.reference_voltage = volts
        })
    }

    /// Sets the series and parallel divider resistances.
    pub fn set_divider_resistance(&self, series: f32, parallel: f32) -> Result<()> {
        if !(series.is_finite() && series >= 0.0 && parallel.is_finite() && parallel >= 0.0) {
            return Err(HandlerError::InvalidParameter);
        }
        self.configure(DriverParam::Divider { series, parallel }, |c| {
            c.divider_resistance = series;
            c.parallel_resistance = parallel;
        })
    }

    /// Overrides the device characteristic.
    pub fn set_beta_value(&self, beta: f32) -> Result<()> {
        if !(beta.is_finite() && beta >= 0.0) {
            return Err(HandlerError::InvalidParameter);
        }
        self.configure(DriverParam::Beta(beta), |c| c.beta_value = beta)
    }

    /// Sets sample averaging.
    pub fn set_sampling(&self, count: u32, delay_ms: u32) -> Result<()> {
        if count == 0 {
            return Err(HandlerError::InvalidParameter);
        }
        self.configure(DriverParam::Sampling { count, delay_ms }, |c| {
            c.sample_count = count;
            c.sample_delay_ms = delay_ms;
        })
    }

    /// Enables or disables exponential smoothing.
    pub fn set_filtering(&self, enabled: bool, alpha: f32) -> Result<()> {
        config::validate_filter(enabled, alpha)?;
        self.configure(DriverParam::Filter { enabled, alpha }, |c| {
            c.enable_filtering = enabled;
            c.filter_alpha = alpha;
        })
    }
}

impl<D, P, T> SensorHandler<D, P, T>
where
    P: BusProvider + 'static,
    D: SensorDriver<P::Bus> + 'static,
    T: TimerService + 'static,
{
    /// Starts periodic sampling at `rate_hz`, calling `callback` with
    /// every sample.
    ///
    /// The period is `max(1, 1000 / rate_hz)` ms. Samples that fail are
    /// still delivered, with `valid == false`. Any monitoring already
    /// running is stopped first.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::InvalidParameter`] for a zero rate
    /// - [`HandlerError::Unsupported`] if the device cannot sample continuously
    /// - [`HandlerError::ResourceExhausted`] if every registry slot is taken
    ///   or the timer cannot be created
    pub fn start_continuous_monitoring<F>(self: &Arc<Self>, rate_hz: u32, callback: F) -> Result<()>
    where
        F: Fn(&Reading) + Send + Sync + 'static,
    {
        {
            let mut inner = self.lock();
            self.ready(&mut inner)?;
            require(inner.info.map(|i| i.capabilities.continuous_reading))?;
        }
        let period_ms = period_from_rate(rate_hz).ok_or(HandlerError::InvalidParameter)?;

        let mut dispatcher = self.lock_monitor();
        self.halt_monitoring(&mut dispatcher)?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let target: Weak<dyn MonitorTarget> = weak;
        let handle = registry::global().register(target).inspect_err(|_| {
            log::error!("{}: no monitoring slot available", self.name);
        })?;

        {
            let mut inner = self.lock();
            inner.continuous = Some(Arc::new(callback));
            inner.diagnostics.continuous_monitoring_active = true;
        }

        if let Err(err) = dispatcher.start(MONITOR_TIMER_NAME, handle, period_ms, true) {
            registry::global().unregister(handle);
            let mut inner = self.lock();
            inner.continuous = None;
            inner.diagnostics.continuous_monitoring_active = false;
            log::error!("{}: failed to start monitoring timer", self.name);
            return Err(err);
        }

        log::info!(
            "{}: continuous monitoring at {} Hz (handle {}, {} ms)",
            self.name,
            rate_hz,
            handle.raw(),
            period_ms
        );
        Ok(())
    }
}

impl<D, P, T> MonitorTarget for SensorHandler<D, P, T>
where
    P: BusProvider,
    D: SensorDriver<P::Bus>,
    T: TimerService,
{
    fn on_monitor_tick(&self) {
        let (reading, event, callback) = {
            let mut inner = self.lock();
            if !inner.diagnostics.continuous_monitoring_active {
                return;
            }
            let (result, event) = match self.ready(&mut inner) {
                Ok(()) => self.sample(&mut inner),
                Err(err) => (Err(err), None),
            };
            let reading =
                result.unwrap_or_else(|err| Reading::failed(err, self.clock.now_us()));
            (reading, event, inner.continuous.clone())
        };

        fire(event);
        if let Some(callback) = callback {
            callback(&reading);
        }
    }
}

impl<D, P, T> Drop for SensorHandler<D, P, T>
where
    P: BusProvider,
    D: SensorDriver<P::Bus>,
    T: TimerService,
{
    fn drop(&mut self) {
        if let Err(err) = self.deinitialize() {
            log::warn!("{}: teardown error: {}", self.name, err);
        }
    }
}

fn driver_params(config: &HandlerConfig) -> [DriverParam; 7] {
    [
        DriverParam::Channel(config.channel),
        DriverParam::ReferenceVoltage(config.reference_voltage),
        DriverParam::Divider {
            series: config.divider_resistance,
            parallel: config.parallel_resistance,
        },
        DriverParam::Beta(config.beta_value),
        DriverParam::Sampling {
            count: config.sample_count,
            delay_ms: config.sample_delay_ms,
        },
        DriverParam::Filter {
            enabled: config.enable_filtering,
            alpha: config.filter_alpha,
        },
        DriverParam::Timeout(config.bus_timeout_ms),
    ]
}

fn check_thresholds<D, P>(inner: &mut Inner<D, P>, value: f32) -> Option<ThresholdEvent> {
    if !inner.thresholds.enabled {
        return None;
    }
    let kind = if value < inner.config.low_threshold {
        ThresholdKind::Low
    } else if value > inner.config.high_threshold {
        ThresholdKind::High
    } else {
        return None;
    };
    inner.statistics.record_threshold_violation();
    inner
        .thresholds
        .callback
        .clone()
        .map(|callback| (callback, value, kind))
}

fn fire(event: Option<ThresholdEvent>) {
    if let Some((callback, value, kind)) = event {
        callback(value, kind);
    }
}

fn power_control<D, P>(inner: &Inner<D, P>) -> bool {
    inner.info.is_some_and(|i| i.capabilities.power_control)
}

fn require(capability: Option<bool>) -> Result<()> {
    match capability {
        Some(true) => Ok(()),
        Some(false) => Err(HandlerError::Unsupported),
        None => Err(HandlerError::NotInitialized),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverErrorKind;
    use crate::hal::{MockBus, MockClock, MockSensor, MockTimer};
    use crate::traits::BusAdapter;
    use serial_test::serial;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Provider = Box<dyn FnMut() -> Result<MockBus> + Send>;
    type TestHandler = SensorHandler<MockSensor, Provider, MockTimer>;

    fn provider(bus: &MockBus) -> Provider {
        Box::new(bus.provider())
    }

    fn handler_with(config: HandlerConfig, bus: &MockBus) -> TestHandler {
        SensorHandler::new(config, provider(bus), MockTimer::new())
    }

    fn handler(bus: &MockBus) -> TestHandler {
        handler_with(HandlerConfig::default(), bus)
    }

    /// Driver that hands back whatever `f32` the bus holds, NaN included.
    struct Unchecked {
        bus: MockBus,
    }

    impl SensorDriver<MockBus> for Unchecked {
        type Error = DriverErrorKind;

        fn attach(bus: MockBus) -> std::result::Result<Self, DriverErrorKind> {
            Ok(Self { bus })
        }

        fn configure(&mut self, _: DriverParam) -> std::result::Result<(), DriverErrorKind> {
            Ok(())
        }

        fn probe(&mut self) -> std::result::Result<(), DriverErrorKind> {
            Ok(())
        }

        fn read_value(&mut self) -> std::result::Result<f32, DriverErrorKind> {
            let mut buf = [0u8; 4];
            self.bus
                .read(&mut buf)
                .map_err(|_| DriverErrorKind::BusReadFailed)?;
            Ok(f32::from_le_bytes(buf))
        }

        fn read_raw(&mut self) -> std::result::Result<u32, DriverErrorKind> {
            Ok(0)
        }

        fn set_offset(&mut self, _: f32) -> std::result::Result<(), DriverErrorKind> {
            Ok(())
        }

        fn info(&self) -> SensorInfo {
            SensorInfo {
                manufacturer: "Test",
                model: "UNCHECKED",
                min_value: -40.0,
                max_value: 125.0,
                resolution: 0.1,
                accuracy: 1.0,
                response_time_ms: 1,
                capabilities: Capabilities::PASSIVE_SENSOR,
            }
        }

        fn detach(self) -> MockBus {
            self.bus
        }
    }

    fn unchecked(
        config: HandlerConfig,
        bus: &MockBus,
    ) -> SensorHandler<Unchecked, Provider, MockTimer> {
        SensorHandler::new(config, provider(bus), MockTimer::new())
    }

    // =========================================================================
    // Lifecycle Tests
    // =========================================================================

    #[test]
    fn lazy_initialization_on_first_read() {
        let bus = MockBus::new();
        bus.queue_value(20.0);
        let h = handler(&bus);

        assert_eq!(h.state(), HandlerState::Uninitialized);
        assert_eq!(bus.attach_count(), 0);

        assert_eq!(h.read(), Ok(20.0));
        assert_eq!(h.state(), HandlerState::Initialized);
        assert_eq!(bus.attach_count(), 1);
    }

    #[test]
    fn initialize_is_idempotent() {
        let bus = MockBus::new();
        let h = handler(&bus);
        h.initialize().unwrap();
        h.initialize().unwrap();
        assert!(h.ensure_initialized());
        assert_eq!(bus.attach_count(), 1);
    }

    #[test]
    fn config_applied_in_order() {
        let bus = MockBus::new();
        let h = handler_with(HandlerConfig::default().with_channel(3), &bus);
        h.initialize().unwrap();

        let params = bus.configured_params();
        assert_eq!(params.len(), 7);
        assert_eq!(params[0], DriverParam::Channel(3));
        assert_eq!(params[6], DriverParam::Timeout(100));
    }

    #[test]
    fn rejected_param_rolls_back() {
        let bus = MockBus::new();
        bus.set_reject_configure(Some(DriverErrorKind::InvalidParameter));
        let h = handler(&bus);

        assert_eq!(h.initialize(), Err(HandlerError::InvalidParameter));
        assert_eq!(h.state(), HandlerState::Uninitialized);
        assert_eq!(bus.detach_count(), 1);
        assert!(!h.diagnostics().sensor_available);
    }

    #[test]
    fn failed_probe_is_communication_failure() {
        let bus = MockBus::new();
        bus.set_present(false);
        let h = handler(&bus);

        assert_eq!(h.initialize(), Err(HandlerError::CommunicationFailure));
        assert_eq!(h.state(), HandlerState::Uninitialized);
        assert_eq!(bus.detach_count(), 1);
    }

    #[test]
    fn accessor_before_successful_init_is_not_initialized() {
        let bus = MockBus::new();
        bus.set_present(false);
        let h = handler(&bus);

        assert_eq!(h.read(), Err(HandlerError::NotInitialized));
        assert_eq!(h.thresholds(), Err(HandlerError::NotInitialized));
        assert!(!h.ensure_initialized());
        // Nothing was read from the device
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn invalid_config_rejected_at_init() {
        let bus = MockBus::new();
        let config = HandlerConfig::default().with_thresholds(80.0, 10.0);
        let h = handler_with(config, &bus);
        assert_eq!(h.initialize(), Err(HandlerError::InvalidParameter));
        assert_eq!(bus.attach_count(), 0);
    }

    #[test]
    fn deinitialize_is_idempotent() {
        let bus = MockBus::new();
        let h = handler(&bus);
        h.initialize().unwrap();

        h.deinitialize().unwrap();
        h.deinitialize().unwrap();
        assert_eq!(h.state(), HandlerState::Uninitialized);
        assert_eq!(bus.detach_count(), 1);

        // Next use builds a fresh driver
        assert!(h.ensure_initialized());
        assert_eq!(bus.attach_count(), 2);
    }

    #[test]
    fn hardware_fault_faults_handler() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let h = handler(&bus);
        h.initialize().unwrap();

        bus.inject_fault(DriverErrorKind::HardwareFault);
        assert_eq!(h.read(), Err(HandlerError::HardwareFault));
        assert_eq!(h.state(), HandlerState::Faulted);
        assert_eq!(h.read(), Err(HandlerError::HardwareFault));
        assert!(!h.ensure_initialized());

        h.initialize().unwrap();
        assert_eq!(h.state(), HandlerState::Initialized);
        assert_eq!(h.read(), Ok(1.0));
    }

    // =========================================================================
    // Read Tests
    // =========================================================================

    #[test]
    fn read_updates_statistics_and_raw() {
        let bus = MockBus::new();
        bus.queue_values(&[5.0, 7.0]);
        let h = handler(&bus);

        h.read().unwrap();
        let reading = h.read_reading().unwrap();
        assert_eq!(reading.value, 7.0);
        assert_eq!(reading.raw, 7.0f32.to_bits());
        assert!(reading.valid);

        let stats = h.statistics();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.readings, 2);
        assert_eq!(stats.value_range(), Some((5.0, 7.0)));
        assert_eq!(h.diagnostics().current_raw, 7.0f32.to_bits());
        assert_eq!(h.read_raw(), Ok(7.0f32.to_bits()));
    }

    #[test]
    fn failed_read_translates_and_records() {
        let bus = MockBus::new();
        let h = handler(&bus);
        h.initialize().unwrap();
        bus.set_fail_reads(true);

        assert_eq!(h.read(), Err(HandlerError::CommunicationFailure));
        let diag = h.diagnostics();
        assert_eq!(diag.last_error, Some(HandlerError::CommunicationFailure));
        assert_eq!(diag.consecutive_errors, 1);
        assert_eq!(h.statistics().failed_operations, 1);
    }

    #[test]
    fn timestamps_come_from_clock() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let clock = Arc::new(MockClock::new());
        let h = handler(&bus).with_clock(clock.clone());

        clock.set_us(5_000_000);
        assert_eq!(h.read_reading().unwrap().timestamp_us, 5_000_000);
        assert_eq!(h.statistics().min_operation_time(), Some(0));

        clock.advance_ms(250);
        bus.set_fail_reads(true);
        let _ = h.read();
        assert_eq!(h.diagnostics().last_error_timestamp_ms, 5_250);
    }

    #[test]
    fn non_finite_value_is_a_failed_read() {
        let bus = MockBus::new();
        bus.queue_values(&[10.0, f32::NAN, 10.0, f32::INFINITY, 10.0]);
        let h = unchecked(HandlerConfig::default(), &bus);
        h.set_thresholds(0.0, 5.0).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&hits);
        h.enable_threshold_monitoring(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(h.read(), Ok(10.0));
        assert_eq!(h.read_reading(), Err(HandlerError::OutOfRange));
        assert_eq!(h.read(), Ok(10.0));
        assert_eq!(h.read(), Err(HandlerError::OutOfRange));
        assert_eq!(h.read(), Ok(10.0));

        let stats = h.statistics();
        assert_eq!(stats.failed_operations, 2);
        assert_eq!(stats.readings, 3);
        assert_eq!(stats.average_value, 10.0);
        assert_eq!(stats.value_range(), Some((10.0, 10.0)));
        assert_eq!(stats.threshold_violations, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(h.diagnostics().last_error, Some(HandlerError::OutOfRange));
    }

    #[test]
    fn unhealthy_after_repeated_failures() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let h = handler(&bus);
        h.initialize().unwrap();
        bus.set_fail_reads(true);

        for _ in 0..=UNHEALTHY_AFTER_CONSECUTIVE_ERRORS {
            let _ = h.read();
        }
        assert!(!h.diagnostics().healthy);
        assert_eq!(h.check_health(), Err(HandlerError::HardwareFault));

        bus.set_fail_reads(false);
        h.read().unwrap();
        assert!(h.diagnostics().healthy);
        assert_eq!(h.check_health(), Ok(()));
    }

    // =========================================================================
    // Threshold Tests
    // =========================================================================

    #[test]
    fn inverted_thresholds_rejected_without_change() {
        let bus = MockBus::new();
        let h = handler(&bus);
        h.set_thresholds(10.0, 80.0).unwrap();

        assert_eq!(h.set_thresholds(80.0, 10.0), Err(HandlerError::InvalidParameter));
        assert_eq!(h.set_thresholds(50.0, 50.0), Err(HandlerError::InvalidParameter));
        assert_eq!(h.thresholds(), Ok((10.0, 80.0)));
    }

    #[test]
    fn threshold_callback_fires_per_crossing() {
        let bus = MockBus::new();
        bus.queue_values(&[5.0, 50.0, 90.0, 50.0]);
        let h = handler(&bus);
        h.set_thresholds(10.0, 80.0).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        h.enable_threshold_monitoring(move |v, k| relock(sink.lock()).push((v, k)))
            .unwrap();

        for _ in 0..4 {
            h.read().unwrap();
        }
        assert_eq!(
            *relock(events.lock()),
            vec![(5.0, ThresholdKind::Low), (90.0, ThresholdKind::High)]
        );
        assert_eq!(h.statistics().threshold_violations, 2);
    }

    #[test]
    fn value_past_bound_fires_every_read() {
        let bus = MockBus::new();
        bus.queue_value(100.0);
        let h = handler(&bus);
        h.set_thresholds(0.0, 50.0).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        h.enable_threshold_monitoring(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        for _ in 0..3 {
            h.read().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn disabled_thresholds_do_not_fire() {
        let bus = MockBus::new();
        bus.queue_value(100.0);
        let h = handler(&bus);
        h.set_thresholds(0.0, 50.0).unwrap();
        h.enable_threshold_monitoring(|_, _| panic!("disarmed")).unwrap();
        h.disable_threshold_monitoring().unwrap();

        h.read().unwrap();
        assert!(!h.is_threshold_monitoring_enabled());
        assert_eq!(h.statistics().threshold_violations, 0);
    }

    #[test]
    fn thresholds_armed_from_config() {
        let bus = MockBus::new();
        bus.queue_value(-50.0);
        let h = handler_with(HandlerConfig::default().with_thresholds(-10.0, 10.0), &bus);

        h.read().unwrap();
        assert!(h.is_threshold_monitoring_enabled());
        assert!(h.diagnostics().threshold_monitoring_enabled);
        assert_eq!(h.statistics().threshold_violations, 1);
    }

    #[test]
    fn callback_may_reenter_handler() {
        let bus = MockBus::new();
        bus.queue_value(100.0);
        let h = Arc::new(handler(&bus));
        h.set_thresholds(0.0, 50.0).unwrap();

        let weak = Arc::downgrade(&h);
        h.enable_threshold_monitoring(move |_, _| {
            if let Some(h) = weak.upgrade() {
                // Would deadlock if called under the handler lock
                let _ = h.statistics();
            }
        })
        .unwrap();
        h.read().unwrap();
    }

    // =========================================================================
    // Calibration and Range Tests
    // =========================================================================

    #[test]
    fn calibrate_sets_offset_on_handler_and_driver() {
        let bus = MockBus::new();
        bus.queue_value(24.0);
        let h = handler(&bus);

        h.calibrate(25.0).unwrap();
        assert_eq!(h.calibration_offset(), Ok(1.0));
        assert_eq!(bus.device_offset(), 1.0);
        assert_eq!(h.read(), Ok(25.0));

        // Recalibrating is relative to the uncompensated value
        h.calibrate(30.0).unwrap();
        assert_eq!(h.calibration_offset(), Ok(6.0));

        let stats = h.statistics();
        assert_eq!(stats.calibration_count, 2);
        assert!(h.diagnostics().calibration_valid);

        h.reset_calibration().unwrap();
        assert_eq!(h.calibration_offset(), Ok(0.0));
        assert_eq!(bus.device_offset(), 0.0);
        assert!(!h.diagnostics().calibration_valid);
    }

    #[test]
    fn calibration_offset_rejects_nan() {
        let bus = MockBus::new();
        let h = handler(&bus);
        assert_eq!(h.set_calibration_offset(f32::NAN), Err(HandlerError::InvalidParameter));
        h.set_calibration_offset(-2.5).unwrap();
        assert_eq!(h.calibration_offset(), Ok(-2.5));
    }

    #[test]
    fn range_and_self_test() {
        let bus = MockBus::new();
        bus.queue_value(60.0);
        let h = handler(&bus);

        h.self_test().unwrap();
        h.set_range(0.0, 50.0).unwrap();
        assert_eq!(h.range(), Ok((0.0, 50.0)));
        assert_eq!(h.self_test(), Err(HandlerError::OutOfRange));
        assert!(!h.diagnostics().healthy);

        assert_eq!(h.set_range(10.0, 10.0), Err(HandlerError::InvalidParameter));
        assert_eq!(h.range(), Ok((0.0, 50.0)));
    }

    #[test]
    fn self_test_rejects_nan() {
        let bus = MockBus::new();
        bus.queue_value(f32::NAN);
        let h = unchecked(HandlerConfig::default().with_range(0.0, 50.0), &bus);

        assert_eq!(h.self_test(), Err(HandlerError::OutOfRange));
        assert!(!h.diagnostics().healthy);
        assert_eq!(h.statistics().failed_operations, 1);
        assert_eq!(h.calibrate(20.0), Err(HandlerError::OutOfRange));
    }

    #[test]
    fn info_and_resolution() {
        let bus = MockBus::new();
        let h = handler(&bus);
        let info = h.info().unwrap();
        assert_eq!(info.model, "MOCK-1");
        assert_eq!(h.resolution(), Ok(0.01));
        assert!(h.capabilities().unwrap().calibration);
    }

    // =========================================================================
    // Sleep Tests
    // =========================================================================

    #[test]
    fn sleep_is_state_only_for_passive_device() {
        let bus = MockBus::new();
        bus.queue_value(3.0);
        let h = handler(&bus);

        h.enter_sleep().unwrap();
        assert!(h.is_sleeping());
        assert!(!bus.is_low_power());
        assert_eq!(h.read(), Ok(3.0));

        h.exit_sleep().unwrap();
        assert!(!h.is_sleeping());
        assert_eq!(h.state(), HandlerState::Initialized);
    }

    #[test]
    fn sleep_uses_power_control_when_supported() {
        let bus = MockBus::new();
        bus.set_power_control(true);
        let h = handler(&bus);

        h.enter_sleep().unwrap();
        assert!(bus.is_low_power());
        h.exit_sleep().unwrap();
        assert!(!bus.is_low_power());
    }

    // =========================================================================
    // Parameter Tests
    // =========================================================================

    #[test]
    fn setters_update_config_and_driver() {
        let bus = MockBus::new();
        let h = handler(&bus);

        h.set_channel(4).unwrap();
        h.set_sampling(8, 0).unwrap();
        h.set_filtering(true, 0.25).unwrap();
        h.set_divider_resistance(4_700.0, 0.0).unwrap();

        let config = h.config();
        assert_eq!(config.channel, 4);
        assert_eq!(config.sample_count, 8);
        assert!(config.enable_filtering);
        assert_eq!(config.divider_resistance, 4_700.0);
        assert!(bus
            .configured_params()
            .contains(&DriverParam::Sampling { count: 8, delay_ms: 0 }));

        assert_eq!(h.set_sampling(0, 0), Err(HandlerError::InvalidParameter));
        assert_eq!(h.set_filtering(true, 0.0), Err(HandlerError::InvalidParameter));
        assert_eq!(h.set_reference_voltage(-1.0), Err(HandlerError::InvalidParameter));
        assert_eq!(h.config().sample_count, 8);
    }

    #[test]
    fn driver_rejection_leaves_config() {
        let bus = MockBus::new();
        let h = handler(&bus);
        h.initialize().unwrap();
        bus.set_reject_configure(Some(DriverErrorKind::UnsupportedOperation));

        assert_eq!(h.set_beta_value(3950.0), Err(HandlerError::Unsupported));
        assert_eq!(h.config().beta_value, 0.0);
    }

    #[test]
    fn reset_statistics_and_diagnostics() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let h = handler(&bus);
        h.read().unwrap();
        bus.set_fail_reads(true);
        let _ = h.read();

        h.reset_statistics();
        assert_eq!(h.statistics(), Statistics::default());
        h.reset_diagnostics();
        let diag = h.diagnostics();
        assert!(diag.last_error.is_none());
        assert!(diag.sensor_available);
    }

    // =========================================================================
    // Continuous Monitoring Tests
    // =========================================================================

    fn monitored(bus: &MockBus) -> (Arc<TestHandler>, MockTimer) {
        let timer = MockTimer::new();
        let h = Arc::new(SensorHandler::new(
            HandlerConfig::default(),
            provider(bus),
            timer.clone(),
        ));
        (h, timer)
    }

    #[test]
    #[serial]
    fn ticks_deliver_readings() {
        let bus = MockBus::new();
        bus.queue_values(&[1.0, 2.0, 3.0]);
        let (h, timer) = monitored(&bus);

        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        h.start_continuous_monitoring(10, move |r| relock(sink.lock()).push(r.value))
            .unwrap();
        assert!(h.is_monitoring_active());
        assert_eq!(timer.period_ms(), Some(100));
        assert_eq!(timer.name().as_deref(), Some(MONITOR_TIMER_NAME));

        assert_eq!(timer.fire_n(3), 3);
        assert_eq!(*relock(values.lock()), vec![1.0, 2.0, 3.0]);

        h.stop_continuous_monitoring().unwrap();
        assert!(!h.is_monitoring_active());
        assert_eq!(timer.fire_n(3), 0);
        assert_eq!(relock(values.lock()).len(), 3);
    }

    #[test]
    #[serial]
    fn failed_tick_delivers_invalid_reading() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let (h, timer) = monitored(&bus);

        let readings = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&readings);
        h.start_continuous_monitoring(50, move |r| relock(sink.lock()).push(*r))
            .unwrap();

        bus.set_fail_reads(true);
        timer.fire();
        let got = relock(readings.lock()).clone();
        assert_eq!(got.len(), 1);
        assert!(!got[0].valid);
        assert_eq!(got[0].error, Some(HandlerError::CommunicationFailure));

        h.stop_continuous_monitoring().unwrap();
    }

    #[test]
    #[serial]
    fn zero_rate_rejected() {
        let bus = MockBus::new();
        let (h, timer) = monitored(&bus);
        assert_eq!(
            h.start_continuous_monitoring(0, |_| {}),
            Err(HandlerError::InvalidParameter)
        );
        assert!(!h.is_monitoring_active());
        assert_eq!(timer.create_count(), 0);
    }

    #[test]
    #[serial]
    fn timer_failure_releases_slot() {
        let bus = MockBus::new();
        let (h, timer) = monitored(&bus);
        timer.fail_create(true);

        let before = registry::global().occupied();
        assert_eq!(
            h.start_continuous_monitoring(10, |_| {}),
            Err(HandlerError::ResourceExhausted)
        );
        assert_eq!(registry::global().occupied(), before);
        assert!(!h.is_monitoring_active());
    }

    #[test]
    #[serial]
    fn restart_replaces_previous_monitoring() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let (h, timer) = monitored(&bus);
        let before = registry::global().occupied();

        h.start_continuous_monitoring(10, |_| {}).unwrap();
        h.start_continuous_monitoring(100, |_| {}).unwrap();
        assert_eq!(timer.period_ms(), Some(10));
        assert_eq!(timer.create_count(), 2);
        assert_eq!(registry::global().occupied(), before + 1);

        h.deinitialize().unwrap();
        assert_eq!(registry::global().occupied(), before);
    }

    #[test]
    #[serial]
    fn callback_can_stop_its_own_monitoring() {
        let bus = MockBus::new();
        bus.queue_value(1.0);
        let (h, timer) = monitored(&bus);

        let weak = Arc::downgrade(&h);
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        h.start_continuous_monitoring(10, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(h) = weak.upgrade() {
                h.stop_continuous_monitoring().unwrap();
            }
        })
        .unwrap();

        timer.fire();
        assert!(!h.is_monitoring_active());
        assert!(!timer.fire());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial]
    fn dropped_handler_releases_slot() {
        let bus = MockBus::new();
        let (h, timer) = monitored(&bus);
        let before = registry::global().occupied();

        h.start_continuous_monitoring(10, |_| panic!("tick after drop"))
            .unwrap();
        drop(h);

        assert_eq!(registry::global().occupied(), before);
        assert!(!timer.fire());
    }
}
