//! Monotonic time source.

/// Time source for timestamps and operation timing.
///
/// Provides monotonic time since an arbitrary epoch. On desktop this wraps
/// `std::time::Instant`; on ESP32 the `esp_timer` counter.
///
/// # Example
///
/// ```rust
/// use periph_handlers::traits::Clock;
/// use periph_handlers::hal::MockClock;
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now_us(), 0);
///
/// clock.advance_us(1_500);
/// assert_eq!(clock.now_us(), 1_500);
/// assert_eq!(clock.now_ms(), 1);
/// ```
pub trait Clock: Send + Sync {
    /// Returns current time in microseconds.
    ///
    /// Must be monotonically non-decreasing.
    fn now_us(&self) -> u64;

    /// Returns current time in milliseconds.
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}
