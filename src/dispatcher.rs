//! Periodic callback dispatch through the monitoring registry.
//!
//! A [`PeriodicDispatcher`] drives one [`TimerService`] whose callback
//! carries only a [`MonitoringHandle`]'s raw integer. Each tick runs
//! [`dispatch_tick`]:
//!
//! 1. Resolve the integer through the global registry
//! 2. If it resolves to nothing, return; the owner has gone away
//! 3. Otherwise deliver one tick to the resolved target
//!
//! The registry lock is released before the target runs, so a tick never
//! holds the registry lock and a handler lock at the same time.
//!
//! # Teardown Ordering
//!
//! Whoever owns the dispatcher must stop it in this order:
//!
//! 1. [`stop()`](PeriodicDispatcher::stop) the timer
//! 2. Unregister the handle from the registry
//! 3. Only then lock the handler and free driver resources
//!
//! After step 1 no new tick can begin; after step 2 an in-flight lookup
//! resolves to nothing. Reversing the steps lets a tick reach a handler
//! whose teardown has started.
//!
//! # Example
//!
//! ```rust
//! use periph_handlers::dispatcher::period_from_rate;
//!
//! assert_eq!(period_from_rate(10), Some(100));
//! assert_eq!(period_from_rate(3), Some(333));
//! assert_eq!(period_from_rate(5000), Some(1)); // clamped to 1 ms
//! assert_eq!(period_from_rate(0), None);
//! ```

use std::cell::Cell;

use crate::error::{HandlerError, Result};
use crate::registry::{self, MonitoringHandle};
use crate::traits::TimerService;

/// Shortest timer period in milliseconds.
pub const MIN_PERIOD_MS: u32 = 1;

/// Converts a sample rate to a timer period, `max(1, 1000 / rate_hz)`.
///
/// Returns `None` for a zero rate.
pub const fn period_from_rate(rate_hz: u32) -> Option<u32> {
    if rate_hz == 0 {
        return None;
    }
    let period = 1000 / rate_hz;
    Some(if period < MIN_PERIOD_MS {
        MIN_PERIOD_MS
    } else {
        period
    })
}

thread_local! {
    static IN_TICK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a tick until dropped.
struct TickScope {
    outer: bool,
}

impl TickScope {
    fn enter() -> Self {
        Self {
            outer: IN_TICK.with(|t| t.replace(true)),
        }
    }
}

impl Drop for TickScope {
    fn drop(&mut self) {
        IN_TICK.with(|t| t.set(self.outer));
    }
}

/// Whether the calling thread is inside [`dispatch_tick`].
pub(crate) fn in_tick() -> bool {
    IN_TICK.with(Cell::get)
}

/// Timer callback: resolve `raw` in the global registry and deliver a tick.
pub fn dispatch_tick(raw: u32) {
    match registry::global().resolve(raw) {
        Some(target) => {
            let _scope = TickScope::enter();
            target.on_monitor_tick();
        }
        None => log::trace!("tick for handle {} dropped: no live target", raw),
    }
}

/// Owns one periodic timer bound to a monitoring handle.
#[derive(Debug)]
pub struct PeriodicDispatcher<T: TimerService> {
    timer: T,
    handle: Option<MonitoringHandle>,
}

impl<T: TimerService> PeriodicDispatcher<T> {
    /// Wraps an uncreated timer.
    pub fn new(timer: T) -> Self {
        Self {
            timer,
            handle: None,
        }
    }

    /// Creates the periodic timer for `handle`.
    ///
    /// Any timer this dispatcher already owns is destroyed first.
    ///
    /// # Errors
    ///
    /// [`HandlerError::ResourceExhausted`] if the timer service refuses to
    /// create the timer.
    pub fn start(
        &mut self,
        name: &str,
        handle: MonitoringHandle,
        period_ms: u32,
        auto_start: bool,
    ) -> Result<()> {
        self.destroy()?;
        let period_ms = period_ms.max(MIN_PERIOD_MS);
        self.timer
            .create(name, dispatch_tick, handle.raw(), period_ms, auto_start)
            .map_err(|e| {
                log::error!("timer '{}' create failed: {:?}", name, e);
                HandlerError::ResourceExhausted
            })?;
        self.handle = Some(handle);
        log::debug!(
            "timer '{}' created: handle {}, period {} ms",
            name,
            handle.raw(),
            period_ms
        );
        Ok(())
    }

    /// Arms a timer created with `auto_start == false`.
    pub fn resume(&mut self) -> Result<()> {
        if !self.timer.is_valid() {
            return Err(HandlerError::NotInitialized);
        }
        if self.timer.is_running() {
            return Ok(());
        }
        self.timer.start().map_err(|e| {
            log::error!("timer start failed: {:?}", e);
            HandlerError::Failure
        })
    }

    /// Halts the timer. No new tick begins after this returns.
    pub fn stop(&mut self) -> Result<()> {
        if !self.timer.is_valid() || !self.timer.is_running() {
            return Ok(());
        }
        self.timer.stop().map_err(|e| {
            log::error!("timer stop failed: {:?}", e);
            HandlerError::Failure
        })
    }

    /// Halts and releases the timer.
    pub fn destroy(&mut self) -> Result<()> {
        self.stop()?;
        self.handle = None;
        if !self.timer.is_valid() {
            return Ok(());
        }
        self.timer.destroy().map_err(|e| {
            log::error!("timer destroy failed: {:?}", e);
            HandlerError::Failure
        })
    }

    /// The handle the timer is bound to, while it exists.
    #[inline]
    pub fn handle(&self) -> Option<MonitoringHandle> {
        self.handle
    }

    /// Returns true while the timer is armed.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.timer.is_valid() && self.timer.is_running()
    }

    /// The underlying timer.
    #[inline]
    pub fn timer(&self) -> &T {
        &self.timer
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockTimer;
    use crate::registry::MonitorTarget;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl MonitorTarget for Counter {
        fn on_monitor_tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    // =========================================================================
    // Period Tests
    // =========================================================================

    #[test]
    fn period_clamps_to_floor() {
        assert_eq!(period_from_rate(1), Some(1000));
        assert_eq!(period_from_rate(999), Some(1));
        assert_eq!(period_from_rate(1000), Some(1));
        assert_eq!(period_from_rate(1001), Some(1));
        assert_eq!(period_from_rate(u32::MAX), Some(1));
    }

    #[test]
    fn zero_rate_has_no_period() {
        assert_eq!(period_from_rate(0), None);
    }

    // =========================================================================
    // Dispatch Tests
    // =========================================================================

    #[test]
    #[serial]
    fn tick_reaches_registered_target() {
        let counter = Arc::new(Counter::default());
        let target: Arc<dyn MonitorTarget> = counter.clone();
        let handle = registry::global()
            .register(Arc::downgrade(&target))
            .unwrap();

        let timer = MockTimer::new();
        let mut dispatcher = PeriodicDispatcher::new(timer.clone());
        dispatcher.start("test", handle, 100, true).unwrap();

        assert_eq!(timer.period_ms(), Some(100));
        assert_eq!(timer.arg(), Some(handle.raw()));
        assert_eq!(timer.fire_n(3), 3);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);

        dispatcher.destroy().unwrap();
        registry::global().unregister(handle);
    }

    #[test]
    #[serial]
    fn tick_after_unregister_is_dropped() {
        let counter = Arc::new(Counter::default());
        let target: Arc<dyn MonitorTarget> = counter.clone();
        let handle = registry::global()
            .register(Arc::downgrade(&target))
            .unwrap();
        registry::global().unregister(handle);

        dispatch_tick(handle.raw());
        dispatch_tick(0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[serial]
    fn tick_context_is_scoped_to_delivery() {
        struct Witness(AtomicUsize);

        impl MonitorTarget for Witness {
            fn on_monitor_tick(&self) {
                if in_tick() {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let witness = Arc::new(Witness(AtomicUsize::new(0)));
        let target: Arc<dyn MonitorTarget> = witness.clone();
        let handle = registry::global()
            .register(Arc::downgrade(&target))
            .unwrap();

        assert!(!in_tick());
        dispatch_tick(handle.raw());
        assert_eq!(witness.0.load(Ordering::SeqCst), 1);
        assert!(!in_tick());

        registry::global().unregister(handle);
    }

    #[test]
    fn stop_prevents_further_ticks() {
        let timer = MockTimer::new();
        let mut dispatcher = PeriodicDispatcher::new(timer.clone());
        let handle = MonitoringHandle::from_raw(3).unwrap();
        dispatcher.start("stopper", handle, 10, true).unwrap();
        assert!(dispatcher.is_running());

        dispatcher.stop().unwrap();
        assert!(!dispatcher.is_running());
        assert_eq!(timer.fire_n(5), 0);

        // Idempotent
        dispatcher.stop().unwrap();
        dispatcher.destroy().unwrap();
        dispatcher.destroy().unwrap();
        assert!(!timer.is_valid());
        assert!(dispatcher.handle().is_none());
    }

    #[test]
    fn deferred_start() {
        let timer = MockTimer::new();
        let mut dispatcher = PeriodicDispatcher::new(timer.clone());
        let handle = MonitoringHandle::from_raw(2).unwrap();
        dispatcher.start("deferred", handle, 50, false).unwrap();
        assert!(!dispatcher.is_running());

        dispatcher.resume().unwrap();
        assert!(dispatcher.is_running());
        dispatcher.destroy().unwrap();
    }

    #[test]
    fn zero_period_is_clamped() {
        let timer = MockTimer::new();
        let mut dispatcher = PeriodicDispatcher::new(timer.clone());
        dispatcher
            .start("fast", MonitoringHandle::from_raw(1).unwrap(), 0, true)
            .unwrap();
        assert_eq!(timer.period_ms(), Some(MIN_PERIOD_MS));
    }

    #[test]
    fn create_failure_is_resource_exhaustion() {
        let timer = MockTimer::new();
        timer.fail_create(true);
        let mut dispatcher = PeriodicDispatcher::new(timer);
        let result = dispatcher.start("nope", MonitoringHandle::from_raw(1).unwrap(), 10, true);
        assert_eq!(result, Err(HandlerError::ResourceExhausted));
        assert!(dispatcher.handle().is_none());
    }

    #[test]
    fn resume_without_timer_fails() {
        let mut dispatcher = PeriodicDispatcher::new(MockTimer::new());
        assert_eq!(dispatcher.resume(), Err(HandlerError::NotInitialized));
    }
}
