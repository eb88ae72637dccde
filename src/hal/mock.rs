//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for every collaborator trait, so
//! handlers can be exercised on desktop without a bus, a device, or an
//! RTOS timer.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockBus`] | [`BusAdapter`] | Scripted responses, device-side fault knobs |
//! | [`MockSensor`] | [`SensorDriver`] | Reads an `f32` register over a [`MockBus`] |
//! | [`MockTimer`] | [`TimerService`] | Ticks fired manually with [`MockTimer::fire`] |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//!
//! All mocks are `Clone` and share their state between clones: keep one
//! copy in the test, hand the other to the handler.
//!
//! # Example
//!
//! ```rust
//! use periph_handlers::{HandlerConfig, SensorHandler};
//! use periph_handlers::hal::{MockBus, MockSensor, MockTimer};
//!
//! let bus = MockBus::new();
//! bus.queue_value(21.5);
//!
//! let handler = SensorHandler::<MockSensor, _, _>::new(
//!     HandlerConfig::default(),
//!     bus.provider(),
//!     MockTimer::new(),
//! );
//!
//! let value = handler.read().unwrap();
//! assert!((value - 21.5).abs() < 1e-6);
//! assert_eq!(bus.attach_count(), 1);
//! ```
//!
//! [`BusAdapter`]: crate::traits::BusAdapter
//! [`SensorDriver`]: crate::traits::SensorDriver
//! [`TimerService`]: crate::traits::TimerService
//! [`Clock`]: crate::traits::Clock

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::DriverErrorKind;
use crate::traits::{
    BusAdapter, Capabilities, Clock, DriverParam, SensorDriver, SensorInfo, TimerCallback,
    TimerService,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Bus Mock
// ============================================================================

/// Error returned by [`MockBus`] transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockBusError {
    /// Device did not acknowledge.
    Nack,
    /// Nothing was ever queued to read.
    Empty,
}

#[derive(Debug)]
struct BusState {
    responses: VecDeque<Vec<u8>>,
    last: Option<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    present: bool,
    fail_reads: bool,
    fail_writes: bool,

    // Device-side knobs, consulted by MockSensor
    faults: VecDeque<DriverErrorKind>,
    reject_configure: Option<DriverErrorKind>,
    power_control: bool,
    low_power: bool,
    attached: usize,
    detached: usize,
    params: Vec<DriverParam>,
    offset: f32,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            responses: VecDeque::new(),
            last: None,
            writes: Vec::new(),
            present: true,
            fail_reads: false,
            fail_writes: false,
            faults: VecDeque::new(),
            reject_configure: None,
            power_control: false,
            low_power: false,
            attached: 0,
            detached: 0,
            params: Vec::new(),
            offset: 0.0,
        }
    }
}

/// Mock bus adapter for testing.
///
/// Reads return queued responses in FIFO order. Once the queue runs dry
/// the last response is repeated, which keeps long-running monitoring
/// tests fed. Writes are recorded for inspection.
///
/// The bus also carries the simulated device's state, so a test can
/// inject faults into a [`MockSensor`] that lives inside a handler.
///
/// # Example
///
/// ```rust
/// use periph_handlers::hal::MockBus;
/// use periph_handlers::traits::BusAdapter;
///
/// let mut bus = MockBus::new();
/// bus.queue_response(&[1, 2]);
///
/// let mut buf = [0u8; 2];
/// assert_eq!(bus.read(&mut buf), Ok(2));
/// assert_eq!(bus.read(&mut buf), Ok(2)); // Repeats the last response
///
/// bus.set_present(false);
/// assert!(!bus.probe());
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Creates a bus with a present device and nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus provider handing out clones of this bus.
    pub fn provider(&self) -> impl FnMut() -> crate::Result<MockBus> + Send + 'static {
        let bus = self.clone();
        move || Ok(bus.clone())
    }

    /// Queues raw bytes for the next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        lock(&self.state).responses.push_back(bytes.to_vec());
    }

    /// Queues one value register read, as [`MockSensor`] decodes it.
    pub fn queue_value(&self, value: f32) {
        self.queue_response(&value.to_bits().to_le_bytes());
    }

    /// Queues several value register reads.
    pub fn queue_values(&self, values: &[f32]) {
        for v in values {
            self.queue_value(*v);
        }
    }

    /// Responses not yet read.
    pub fn pending_responses(&self) -> usize {
        lock(&self.state).responses.len()
    }

    /// Sets whether the device answers probes.
    pub fn set_present(&self, present: bool) {
        lock(&self.state).present = present;
    }

    /// Makes every read fail with [`MockBusError::Nack`].
    pub fn set_fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Makes every write fail with [`MockBusError::Nack`].
    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Everything written so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    /// Fails the device's next sample with `kind`.
    pub fn inject_fault(&self, kind: DriverErrorKind) {
        lock(&self.state).faults.push_back(kind);
    }

    /// Makes every driver `configure()` fail with `kind`.
    pub fn set_reject_configure(&self, kind: Option<DriverErrorKind>) {
        lock(&self.state).reject_configure = kind;
    }

    /// Sets whether the device reports a low-power state.
    ///
    /// Read by [`MockSensor`] at attach.
    pub fn set_power_control(&self, supported: bool) {
        lock(&self.state).power_control = supported;
    }

    /// Whether the device is in its low-power state.
    pub fn is_low_power(&self) -> bool {
        lock(&self.state).low_power
    }

    /// Drivers attached to this bus so far.
    pub fn attach_count(&self) -> usize {
        lock(&self.state).attached
    }

    /// Drivers detached from this bus so far.
    pub fn detach_count(&self) -> usize {
        lock(&self.state).detached
    }

    /// Parameters the driver accepted, in order.
    pub fn configured_params(&self) -> Vec<DriverParam> {
        lock(&self.state).params.clone()
    }

    /// Offset the driver last applied.
    pub fn device_offset(&self) -> f32 {
        lock(&self.state).offset
    }

    fn take_fault(&self) -> Option<DriverErrorKind> {
        lock(&self.state).faults.pop_front()
    }
}

impl BusAdapter for MockBus {
    type Error = MockBusError;

    fn write(&mut self, bytes: &[u8]) -> Result<usize, MockBusError> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(MockBusError::Nack);
        }
        state.writes.push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MockBusError> {
        let mut state = lock(&self.state);
        if state.fail_reads {
            return Err(MockBusError::Nack);
        }
        if let Some(next) = state.responses.pop_front() {
            state.last = Some(next);
        }
        let response = state.last.as_ref().ok_or(MockBusError::Empty)?;
        let n = buf.len().min(response.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn probe(&mut self) -> bool {
        lock(&self.state).present
    }
}

// ============================================================================
// Driver Mock
// ============================================================================

/// Register address of the value register.
pub const MOCK_REG_VALUE: u8 = 0x00;

/// Mock sensor driver.
///
/// Each sample writes [`MOCK_REG_VALUE`] and reads four bytes: the raw
/// count, little-endian, which is also the bit pattern of the measured
/// `f32`. The converted value is the average of `sample_count` samples
/// plus the offset, optionally smoothed. `read_raw()` returns the count
/// behind the last sample, sampling once if there is none yet.
#[derive(Debug)]
pub struct MockSensor {
    bus: MockBus,
    sample_count: u32,
    sample_delay_ms: u32,
    filter: Option<f32>,
    filtered: Option<f32>,
    offset: f32,
    last_raw: Option<u32>,
    power_control: bool,
}

impl MockSensor {
    fn sample(&mut self) -> Result<u32, DriverErrorKind> {
        if let Some(kind) = self.bus.take_fault() {
            return Err(kind);
        }
        self.bus
            .write(&[MOCK_REG_VALUE])
            .map_err(|_| DriverErrorKind::BusWriteFailed)?;

        let mut buf = [0u8; 4];
        let n = self.bus.read(&mut buf).map_err(|e| match e {
            MockBusError::Nack => DriverErrorKind::BusReadFailed,
            MockBusError::Empty => DriverErrorKind::Timeout,
        })?;
        if n != buf.len() {
            return Err(DriverErrorKind::InvalidReading);
        }
        let raw = u32::from_le_bytes(buf);
        self.last_raw = Some(raw);
        Ok(raw)
    }
}

impl SensorDriver<MockBus> for MockSensor {
    type Error = DriverErrorKind;

    fn attach(bus: MockBus) -> Result<Self, DriverErrorKind> {
        let power_control = {
            let mut state = lock(&bus.state);
            state.attached += 1;
            state.params.clear();
            state.power_control
        };
        Ok(Self {
            bus,
            sample_count: 1,
            sample_delay_ms: 0,
            filter: None,
            filtered: None,
            offset: 0.0,
            last_raw: None,
            power_control,
        })
    }

    fn configure(&mut self, param: DriverParam) -> Result<(), DriverErrorKind> {
        if let Some(kind) = lock(&self.bus.state).reject_configure {
            return Err(kind);
        }
        match param {
            DriverParam::Sampling { count: 0, .. } => {
                return Err(DriverErrorKind::InvalidParameter)
            }
            DriverParam::Sampling { count, delay_ms } => {
                self.sample_count = count;
                self.sample_delay_ms = delay_ms;
            }
            DriverParam::Filter { enabled, alpha } => {
                if enabled && !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(DriverErrorKind::InvalidParameter);
                }
                self.filter = enabled.then_some(alpha);
                self.filtered = None;
            }
            DriverParam::Channel(_)
            | DriverParam::ReferenceVoltage(_)
            | DriverParam::Divider { .. }
            | DriverParam::Beta(_)
            | DriverParam::Timeout(_) => {}
        }
        lock(&self.bus.state).params.push(param);
        Ok(())
    }

    fn probe(&mut self) -> Result<(), DriverErrorKind> {
        if self.bus.probe() {
            Ok(())
        } else {
            Err(DriverErrorKind::DeviceNotFound)
        }
    }

    fn read_value(&mut self) -> Result<f32, DriverErrorKind> {
        let mut sum = 0.0f32;
        for i in 0..self.sample_count {
            if i > 0 && self.sample_delay_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(u64::from(
                    self.sample_delay_ms,
                )));
            }
            let value = f32::from_bits(self.sample()?);
            if !value.is_finite() {
                return Err(DriverErrorKind::InvalidReading);
            }
            sum += value;
        }
        let value = sum / self.sample_count as f32 + self.offset;

        let value = match (self.filter, self.filtered) {
            (Some(alpha), Some(prev)) => prev + alpha * (value - prev),
            _ => value,
        };
        if self.filter.is_some() {
            self.filtered = Some(value);
        }
        Ok(value)
    }

    fn read_raw(&mut self) -> Result<u32, DriverErrorKind> {
        match self.last_raw {
            Some(raw) => Ok(raw),
            None => self.sample(),
        }
    }

    fn set_offset(&mut self, offset: f32) -> Result<(), DriverErrorKind> {
        if !offset.is_finite() {
            return Err(DriverErrorKind::InvalidParameter);
        }
        self.offset = offset;
        lock(&self.bus.state).offset = offset;
        Ok(())
    }

    fn info(&self) -> SensorInfo {
        SensorInfo {
            manufacturer: "Mock",
            model: "MOCK-1",
            min_value: -40.0,
            max_value: 125.0,
            resolution: 0.01,
            accuracy: 0.5,
            response_time_ms: 10,
            capabilities: Capabilities {
                power_control: self.power_control,
                ..Capabilities::PASSIVE_SENSOR
            },
        }
    }

    fn set_low_power(&mut self, sleep: bool) -> Result<(), DriverErrorKind> {
        if !self.power_control {
            return Err(DriverErrorKind::UnsupportedOperation);
        }
        lock(&self.bus.state).low_power = sleep;
        Ok(())
    }

    fn detach(self) -> MockBus {
        lock(&self.bus.state).detached += 1;
        self.bus
    }
}

// ============================================================================
// Timer Mock
// ============================================================================

/// Error returned by [`MockTimer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockTimerError {
    /// `create()` was configured to fail.
    CreateRefused,
    /// No timer has been created.
    NotCreated,
}

#[derive(Debug, Default)]
struct TimerState {
    callback: Option<TimerCallback>,
    arg: u32,
    period_ms: u32,
    name: String,
    running: bool,
    created: usize,
    fail_create: bool,
}

/// Mock timer service for testing.
///
/// Never fires on its own; call [`fire`](Self::fire) to deliver a tick
/// on the calling thread, exactly as the timer service would.
///
/// # Example
///
/// ```rust
/// use periph_handlers::hal::MockTimer;
/// use periph_handlers::traits::TimerService;
///
/// fn tick(_arg: u32) {}
///
/// let mut timer = MockTimer::new();
/// timer.create("demo", tick, 7, 100, true).unwrap();
/// assert!(timer.fire());
///
/// timer.stop().unwrap();
/// assert!(!timer.fire()); // Stopped timers don't tick
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockTimer {
    state: Arc<Mutex<TimerState>>,
}

impl MockTimer {
    /// Creates a timer service with no timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one tick if the timer is armed. Returns whether it fired.
    pub fn fire(&self) -> bool {
        let tick = {
            let state = lock(&self.state);
            match state.callback {
                Some(cb) if state.running => Some((cb, state.arg)),
                _ => None,
            }
        };
        match tick {
            Some((cb, arg)) => {
                cb(arg);
                true
            }
            None => false,
        }
    }

    /// Delivers up to `n` ticks, returning how many fired.
    pub fn fire_n(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.fire()).count()
    }

    /// Period of the current timer.
    pub fn period_ms(&self) -> Option<u32> {
        let state = lock(&self.state);
        state.callback.map(|_| state.period_ms)
    }

    /// Argument the current timer passes to its callback.
    pub fn arg(&self) -> Option<u32> {
        let state = lock(&self.state);
        state.callback.map(|_| state.arg)
    }

    /// Name of the current timer.
    pub fn name(&self) -> Option<String> {
        let state = lock(&self.state);
        state.callback.map(|_| state.name.clone())
    }

    /// Timers created so far.
    pub fn create_count(&self) -> usize {
        lock(&self.state).created
    }

    /// Makes `create()` fail.
    pub fn fail_create(&self, fail: bool) {
        lock(&self.state).fail_create = fail;
    }
}

impl TimerService for MockTimer {
    type Error = MockTimerError;

    fn create(
        &mut self,
        name: &str,
        callback: TimerCallback,
        arg: u32,
        period_ms: u32,
        auto_start: bool,
    ) -> Result<(), MockTimerError> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(MockTimerError::CreateRefused);
        }
        state.callback = Some(callback);
        state.arg = arg;
        state.period_ms = period_ms;
        state.name = name.to_string();
        state.running = auto_start;
        state.created += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), MockTimerError> {
        let mut state = lock(&self.state);
        if state.callback.is_none() {
            return Err(MockTimerError::NotCreated);
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MockTimerError> {
        lock(&self.state).running = false;
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), MockTimerError> {
        let mut state = lock(&self.state);
        state.running = false;
        state.callback = None;
        Ok(())
    }

    fn is_valid(&self) -> bool {
        lock(&self.state).callback.is_some()
    }

    fn is_running(&self) -> bool {
        let state = lock(&self.state);
        state.callback.is_some() && state.running
    }
}

// ============================================================================
// Clock Mock
// ============================================================================

/// Mock clock for testing.
///
/// Provides a controllable time source. Shared through an `Arc`, it can
/// be advanced from a test while a handler reads it.
///
/// # Example
///
/// ```rust
/// use periph_handlers::hal::MockClock;
/// use periph_handlers::traits::Clock;
///
/// let clock = MockClock::new();
/// clock.set_us(1_000_000);
/// assert_eq!(clock.now_ms(), 1_000);
///
/// clock.advance_ms(500);
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current_us: AtomicU64,
}

impl MockClock {
    /// Creates a new mock clock starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time in microseconds.
    pub fn set_us(&self, us: u64) {
        self.current_us.store(us, Ordering::SeqCst);
    }

    /// Advances the clock by `us` microseconds.
    pub fn advance_us(&self, us: u64) {
        self.current_us.fetch_add(us, Ordering::SeqCst);
    }

    /// Advances the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        self.current_us.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
