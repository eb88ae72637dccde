//! Desktop timer service and clock built on std threads.
//!
//! [`ThreadTimer`] runs each periodic timer on its own named thread. The
//! thread holds a gate mutex for the duration of every tick, so
//! [`stop()`](TimerService::stop) can wait out a tick already running and
//! guarantee none starts afterwards. Stopping from inside a tick (on the
//! timer's own thread) only disarms; it cannot wait for itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::traits::{Clock, TimerCallback, TimerService};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Error returned by [`ThreadTimer`].
#[derive(Debug, thiserror::Error)]
pub enum ThreadTimerError {
    /// No timer has been created.
    #[error("no timer created")]
    NotCreated,
    /// The OS refused to spawn the timer thread.
    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    shutdown: AtomicBool,
    // Held by the timer thread while a tick runs
    gate: Mutex<()>,
    signal: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn notify(&self) {
        let _signal = lock(&self.signal);
        self.wake.notify_all();
    }

    fn run(&self, callback: TimerCallback, arg: u32, period: Duration) {
        let mut next = Instant::now() + period;
        loop {
            {
                let mut signal = lock(&self.signal);
                loop {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        signal = self
                            .wake
                            .wait(signal)
                            .unwrap_or_else(PoisonError::into_inner);
                        next = Instant::now() + period;
                        continue;
                    }
                    let now = Instant::now();
                    if now >= next {
                        break;
                    }
                    signal = self
                        .wake
                        .wait_timeout(signal, next - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }

            {
                let _tick = lock(&self.gate);
                if self.running.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst) {
                    callback(arg);
                }
            }

            // Missed deadlines are skipped, not replayed
            next += period;
            let now = Instant::now();
            if next <= now {
                next = now + period;
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Worker {
    fn on_timer_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn halt(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify();
        if !self.on_timer_thread() {
            drop(lock(&self.shared.gate));
        }
    }

    fn shutdown(mut self) {
        self.halt();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.notify();
        if self.on_timer_thread() {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("timer thread panicked");
            }
        }
    }
}

/// Periodic timer backed by a dedicated std thread.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
/// use periph_handlers::hal::ThreadTimer;
/// use periph_handlers::traits::TimerService;
///
/// static TICKS: AtomicU32 = AtomicU32::new(0);
/// fn tick(_arg: u32) {
///     TICKS.fetch_add(1, Ordering::SeqCst);
/// }
///
/// let mut timer = ThreadTimer::new();
/// timer.create("demo", tick, 0, 5, true).unwrap();
/// std::thread::sleep(Duration::from_millis(50));
/// timer.destroy().unwrap();
///
/// let seen = TICKS.load(Ordering::SeqCst);
/// std::thread::sleep(Duration::from_millis(20));
/// assert_eq!(TICKS.load(Ordering::SeqCst), seen);
/// ```
#[derive(Debug, Default)]
pub struct ThreadTimer {
    worker: Option<Worker>,
}

impl ThreadTimer {
    /// Creates a timer service with no timer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimerService for ThreadTimer {
    type Error = ThreadTimerError;

    fn create(
        &mut self,
        name: &str,
        callback: TimerCallback,
        arg: u32,
        period_ms: u32,
        auto_start: bool,
    ) -> Result<(), ThreadTimerError> {
        self.destroy()?;

        let shared = Arc::new(Shared::default());
        shared.running.store(auto_start, Ordering::SeqCst);
        let period = Duration::from_millis(u64::from(period_ms.max(1)));

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || shared.run(callback, arg, period))?
        };
        let thread_id = thread.thread().id();
        self.worker = Some(Worker {
            shared,
            thread: Some(thread),
            thread_id,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), ThreadTimerError> {
        let worker = self.worker.as_ref().ok_or(ThreadTimerError::NotCreated)?;
        worker.shared.running.store(true, Ordering::SeqCst);
        worker.shared.notify();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ThreadTimerError> {
        if let Some(worker) = &self.worker {
            worker.halt();
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), ThreadTimerError> {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.worker.is_some()
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.shared.running.load(Ordering::SeqCst))
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

/// Monotonic clock over [`Instant`], counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Starts a clock at zero.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn ticks_at_roughly_the_period() {
        static TICKS: AtomicU32 = AtomicU32::new(0);
        fn tick(_: u32) {
            TICKS.fetch_add(1, Ordering::SeqCst);
        }

        let mut timer = ThreadTimer::new();
        timer.create("rate", tick, 0, 20, true).unwrap();
        thread::sleep(Duration::from_millis(210));
        timer.destroy().unwrap();

        let n = TICKS.load(Ordering::SeqCst);
        assert!((6..=12).contains(&n), "got {} ticks", n);
    }

    #[test]
    fn deferred_start_waits_for_start() {
        static TICKS: AtomicU32 = AtomicU32::new(0);
        fn tick(_: u32) {
            TICKS.fetch_add(1, Ordering::SeqCst);
        }

        let mut timer = ThreadTimer::new();
        timer.create("deferred", tick, 0, 5, false).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(TICKS.load(Ordering::SeqCst), 0);
        assert!(!timer.is_running());

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        timer.stop().unwrap();
        let seen = TICKS.load(Ordering::SeqCst);
        assert!(seen > 0);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(TICKS.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn stop_waits_for_in_flight_tick() {
        static INSIDE: AtomicBool = AtomicBool::new(false);
        fn slow(_: u32) {
            INSIDE.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            INSIDE.store(false, Ordering::SeqCst);
        }

        let mut timer = ThreadTimer::new();
        timer.create("slow", slow, 0, 1, true).unwrap();
        while !INSIDE.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        timer.stop().unwrap();
        assert!(!INSIDE.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_and_destroy_are_idempotent() {
        fn noop(_: u32) {}
        let mut timer = ThreadTimer::new();
        assert!(timer.stop().is_ok());
        assert!(timer.destroy().is_ok());
        assert!(matches!(timer.start(), Err(ThreadTimerError::NotCreated)));

        timer.create("idem", noop, 0, 10, true).unwrap();
        assert!(timer.is_valid());
        timer.stop().unwrap();
        timer.stop().unwrap();
        timer.destroy().unwrap();
        timer.destroy().unwrap();
        assert!(!timer.is_valid());
    }

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        thread::sleep(Duration::from_millis(2));
        assert!(clock.now_us() >= a + 1_000);
    }
}
