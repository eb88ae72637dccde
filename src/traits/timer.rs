//! Periodic timer service contract.
//!
//! Models an RTOS software timer: the callback is a plain function that
//! receives a single `u32` argument. It cannot carry a typed reference,
//! which is why handlers are reached through the
//! [`MonitoringRegistry`](crate::registry::MonitoringRegistry).
//!
//! # Implementations
//!
//! | Type | Backend |
//! |------|---------|
//! | [`ThreadTimer`](crate::hal::ThreadTimer) | One std thread per timer |
//! | [`MockTimer`](crate::hal::MockTimer) | Ticks fired manually from tests |
//! | `Esp32Timer` | ESP-IDF `esp_timer` task (`esp32` feature) |

/// Callback signature accepted by a timer service.
pub type TimerCallback = fn(u32);

/// One periodic timer.
///
/// # Contract
///
/// - `stop()` does not cancel a tick already running, but no new tick may
///   begin after it returns
/// - `stop()` and `destroy()` are idempotent
/// - Callbacks run in the timer service's own context, not the caller's
pub trait TimerService: Send {
    /// Timer backend error.
    type Error: core::fmt::Debug;

    /// Creates a periodic timer invoking `callback(arg)` every `period_ms`.
    ///
    /// Arms it immediately when `auto_start` is set. Creating over an
    /// existing timer destroys the old one first.
    fn create(
        &mut self,
        name: &str,
        callback: TimerCallback,
        arg: u32,
        period_ms: u32,
        auto_start: bool,
    ) -> Result<(), Self::Error>;

    /// Arms a created timer.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Disarms the timer.
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Releases timer resources.
    fn destroy(&mut self) -> Result<(), Self::Error>;

    /// Returns true if a timer has been created and not destroyed.
    fn is_valid(&self) -> bool;

    /// Returns true if the timer is armed.
    fn is_running(&self) -> bool;
}
