//! Per-handler statistics and diagnostics.
//!
//! Both structs are plain data mutated under the owning handler's mutex
//! and copied out by value. Counters only grow; they are cleared only by
//! an explicit `reset_statistics()` / `reset_diagnostics()` on the handler.

use crate::error::HandlerError;

/// Consecutive failures tolerated before a handler reports unhealthy.
pub const UNHEALTHY_AFTER_CONSECUTIVE_ERRORS: u32 = 5;

// ============================================================================
// Statistics
// ============================================================================

/// Operation counters, timing and value extrema.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    /// All recorded operations.
    pub total_operations: u32,
    /// Operations that succeeded.
    pub successful_operations: u32,
    /// Operations that failed.
    pub failed_operations: u32,
    /// Successful value readings.
    pub readings: u32,
    /// Readings outside the armed threshold bounds.
    pub threshold_violations: u32,
    /// Completed calibrations.
    pub calibration_count: u32,
    /// Fastest operation in microseconds (`u32::MAX` until the first one).
    pub min_operation_time_us: u32,
    /// Slowest operation in microseconds.
    pub max_operation_time_us: u32,
    /// Running average operation time in microseconds.
    pub average_operation_time_us: u32,
    /// Smallest value read (`f32::MAX` until the first reading).
    pub min_value: f32,
    /// Largest value read (`f32::MIN` until the first reading).
    pub max_value: f32,
    /// Running average of values read.
    pub average_value: f32,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            readings: 0,
            threshold_violations: 0,
            calibration_count: 0,
            min_operation_time_us: u32::MAX,
            max_operation_time_us: 0,
            average_operation_time_us: 0,
            min_value: f32::MAX,
            max_value: f32::MIN,
            average_value: 0.0,
        }
    }
}

impl Statistics {
    /// Records one operation and its duration.
    ///
    /// The average is recomputed as `avg' = (avg*(n-1) + sample) / n`.
    pub fn record_operation(&mut self, success: bool, time_us: u32) {
        self.total_operations = self.total_operations.saturating_add(1);
        if success {
            self.successful_operations = self.successful_operations.saturating_add(1);
        } else {
            self.failed_operations = self.failed_operations.saturating_add(1);
        }

        self.min_operation_time_us = self.min_operation_time_us.min(time_us);
        self.max_operation_time_us = self.max_operation_time_us.max(time_us);

        let n = u64::from(self.total_operations);
        let avg = u64::from(self.average_operation_time_us);
        self.average_operation_time_us = ((avg * (n - 1) + u64::from(time_us)) / n) as u32;
    }

    /// Records a successfully read value.
    pub fn record_value(&mut self, value: f32) {
        self.readings = self.readings.saturating_add(1);
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);

        let n = self.readings as f32;
        self.average_value = (self.average_value * (n - 1.0) + value) / n;
    }

    /// Counts one threshold violation.
    #[inline]
    pub fn record_threshold_violation(&mut self) {
        self.threshold_violations = self.threshold_violations.saturating_add(1);
    }

    /// Counts one completed calibration.
    #[inline]
    pub fn record_calibration(&mut self) {
        self.calibration_count = self.calibration_count.saturating_add(1);
    }

    /// Fastest operation, if any were recorded.
    pub fn min_operation_time(&self) -> Option<u32> {
        (self.total_operations > 0).then_some(self.min_operation_time_us)
    }

    /// Value extrema `(min, max)`, if any readings were recorded.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        (self.readings > 0).then_some((self.min_value, self.max_value))
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Error history, health and availability flags.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostics {
    /// False once consecutive errors exceed
    /// [`UNHEALTHY_AFTER_CONSECUTIVE_ERRORS`]; true again on the next success.
    pub healthy: bool,
    /// Most recent error.
    pub last_error: Option<HandlerError>,
    /// When `last_error` happened, in milliseconds of the handler clock.
    pub last_error_timestamp_ms: u64,
    /// Failures since the last success.
    pub consecutive_errors: u32,
    /// Whether the device answered its liveness probe.
    pub sensor_available: bool,
    /// Whether the device supports threshold monitoring.
    pub threshold_monitoring_supported: bool,
    /// Whether threshold monitoring is armed.
    pub threshold_monitoring_enabled: bool,
    /// Whether continuous monitoring is running.
    pub continuous_monitoring_active: bool,
    /// Raw count behind the last successful reading.
    pub current_raw: u32,
    /// Whether a calibration offset is applied.
    pub calibration_valid: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_timestamp_ms: 0,
            consecutive_errors: 0,
            sensor_available: false,
            threshold_monitoring_supported: true,
            threshold_monitoring_enabled: false,
            continuous_monitoring_active: false,
            current_raw: 0,
            calibration_valid: false,
        }
    }
}

impl Diagnostics {
    /// Records a successful operation.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.healthy = true;
    }

    /// Records a failed operation.
    pub fn record_error(&mut self, err: HandlerError, now_ms: u64) {
        self.last_error = Some(err);
        self.last_error_timestamp_ms = now_ms;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors > UNHEALTHY_AFTER_CONSECUTIVE_ERRORS {
            self.healthy = false;
        }
    }

    /// Records the outcome of an operation.
    pub fn record<T>(&mut self, result: &Result<T, HandlerError>, now_ms: u64) {
        match result {
            Ok(_) => self.record_success(),
            Err(err) => self.record_error(*err, now_ms),
        }
    }

    /// Clears error history and restores health; flags are kept.
    pub fn reset_errors(&mut self) {
        self.last_error = None;
        self.last_error_timestamp_ms = 0;
        self.consecutive_errors = 0;
        self.healthy = true;
    }
}

// ============================================================================
// Tests
// ============================================================================
