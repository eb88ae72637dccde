//! ESP32 timer service on the ESP-IDF `esp_timer` task.

use core::time::Duration;

use esp_idf_svc::sys::EspError;
use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};

use crate::traits::{TimerCallback, TimerService};

/// Periodic timer dispatched from the `esp_timer` task.
///
/// Callbacks run serially on the shared timer task, so they must stay
/// short. `stop()` cancels future ticks; a tick already running on the
/// timer task completes.
///
/// # Example
///
/// ```ignore
/// use periph_handlers::hal::esp32::Esp32Timer;
///
/// let timer = Esp32Timer::new()?;
/// let handler = Arc::new(SensorHandler::<Tmp, _, _>::new(config, provider, timer));
/// handler.start_continuous_monitoring(10, |r| log::info!("{:.2}", r.value))?;
/// ```
pub struct Esp32Timer {
    service: EspTaskTimerService,
    timer: Option<EspTimer<'static>>,
    period: Duration,
}

impl Esp32Timer {
    /// Binds to the system timer task.
    pub fn new() -> Result<Self, EspError> {
        Ok(Self {
            service: EspTaskTimerService::new()?,
            timer: None,
            period: Duration::ZERO,
        })
    }
}

impl core::fmt::Debug for Esp32Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Esp32Timer")
            .field("created", &self.timer.is_some())
            .field("period", &self.period)
            .finish()
    }
}

impl TimerService for Esp32Timer {
    type Error = EspError;

    fn create(
        &mut self,
        name: &str,
        callback: TimerCallback,
        arg: u32,
        period_ms: u32,
        auto_start: bool,
    ) -> Result<(), EspError> {
        self.destroy()?;
        let timer = self.service.timer(move || callback(arg))?;
        self.period = Duration::from_millis(u64::from(period_ms.max(1)));
        if auto_start {
            timer.every(self.period)?;
        }
        log::debug!("esp timer '{}' created ({:?})", name, self.period);
        self.timer = Some(timer);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EspError> {
        if let Some(timer) = &self.timer {
            if !timer.is_scheduled()? {
                timer.every(self.period)?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EspError> {
        if let Some(timer) = &self.timer {
            timer.cancel()?;
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), EspError> {
        self.stop()?;
        self.timer = None;
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.timer.is_some()
    }

    fn is_running(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|t| t.is_scheduled().unwrap_or(false))
    }
}
