//! Canonical error taxonomy and driver error translation.
//!
//! Every handler operation returns [`Result<T>`](Result). Driver libraries
//! have their own error domains; they describe themselves through the
//! [`DriverError`] trait, and [`translate`] folds that domain into a single
//! [`HandlerError`] at the handler boundary. Native driver errors never
//! leave a handler.
//!
//! # Example
//!
//! ```rust
//! use periph_handlers::error::{translate, DriverErrorKind, HandlerError};
//!
//! assert_eq!(translate(DriverErrorKind::Timeout), HandlerError::Timeout);
//! assert_eq!(translate(DriverErrorKind::BusReadFailed), HandlerError::CommunicationFailure);
//! assert_eq!(translate(DriverErrorKind::Unknown(0xEE)), HandlerError::Failure);
//! ```

use core::fmt;

/// Result type alias used by every handler operation.
pub type Result<T> = core::result::Result<T, HandlerError>;

/// Canonical handler error.
///
/// Success is represented by `Ok(..)`; every failure a handler can report
/// is one of these kinds.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HandlerError {
    /// The handler could not be brought up, or was used after teardown.
    #[error("handler not initialized")]
    NotInitialized,
    /// Initialization was requested on something already initialized.
    #[error("already initialized")]
    AlreadyInitialized,
    /// A required argument or collaborator was missing.
    #[error("required argument missing")]
    NullArgument,
    /// An argument or configuration combination was rejected.
    #[error("invalid parameter")]
    InvalidParameter,
    /// A fixed-capacity resource (registry slot, timer, memory) ran out.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// The bus or device did not respond correctly.
    #[error("communication failure")]
    CommunicationFailure,
    /// A bounded operation did not complete in time.
    #[error("operation timed out")]
    Timeout,
    /// A value fell outside the configured or physical range.
    #[error("value out of range")]
    OutOfRange,
    /// Calibration could not be computed or applied.
    #[error("calibration failed")]
    CalibrationFailed,
    /// The device reported an unrecoverable fault.
    #[error("hardware fault")]
    HardwareFault,
    /// The device or driver does not support the operation.
    #[error("operation not supported")]
    Unsupported,
    /// Any failure without a more specific kind.
    #[error("operation failed")]
    Failure,
}

impl HandlerError {
    /// Returns a short snake_case name, useful in logs and diagnostics output.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HandlerError::NotInitialized => "not_initialized",
            HandlerError::AlreadyInitialized => "already_initialized",
            HandlerError::NullArgument => "null_argument",
            HandlerError::InvalidParameter => "invalid_parameter",
            HandlerError::ResourceExhausted => "resource_exhausted",
            HandlerError::CommunicationFailure => "communication_failure",
            HandlerError::Timeout => "timeout",
            HandlerError::OutOfRange => "out_of_range",
            HandlerError::CalibrationFailed => "calibration_failed",
            HandlerError::HardwareFault => "hardware_fault",
            HandlerError::Unsupported => "unsupported",
            HandlerError::Failure => "failure",
        }
    }
}

/// Error domain of a sensor driver library.
///
/// Driver crates each have their own error enum; this is the common
/// vocabulary they are described in before translation. `Unknown` carries
/// raw codes the driver could not classify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Driver was handed a missing buffer or interface.
    NullPointer,
    /// Driver used before its own init.
    NotInitialized,
    /// Driver init called twice.
    AlreadyInitialized,
    /// Parameter rejected by the driver.
    InvalidParameter,
    /// Driver-side allocation failed.
    OutOfMemory,
    /// Bus read failed.
    BusReadFailed,
    /// Bus write failed.
    BusWriteFailed,
    /// Device did not answer a probe.
    DeviceNotFound,
    /// Raw reading is physically implausible (open or shorted sensor).
    InvalidReading,
    /// Converted value is outside the driver's range.
    ValueOutOfRange,
    /// Bus transaction timed out.
    Timeout,
    /// Calibration routine failed.
    CalibrationFailed,
    /// Device reported a fault condition.
    HardwareFault,
    /// Raw-to-value conversion failed.
    ConversionFailed,
    /// Lookup table missing or corrupt.
    LookupTableError,
    /// Operation not implemented by this device.
    UnsupportedOperation,
    /// Generic driver failure.
    Failure,
    /// Unclassified raw error code.
    Unknown(u8),
}

/// Implemented by driver error types so handlers can translate them.
pub trait DriverError: fmt::Debug {
    /// Classifies this error in the driver error domain.
    fn kind(&self) -> DriverErrorKind;
}

impl DriverError for DriverErrorKind {
    fn kind(&self) -> DriverErrorKind {
        *self
    }
}

/// Translates a driver error kind into the canonical taxonomy.
///
/// Total over [`DriverErrorKind`]: every kind maps to exactly one
/// [`HandlerError`], and anything without a dedicated kind maps to
/// [`HandlerError::Failure`].
pub const fn translate(kind: DriverErrorKind) -> HandlerError {
    match kind {
        DriverErrorKind::NullPointer => HandlerError::NullArgument,
        DriverErrorKind::NotInitialized => HandlerError::NotInitialized,
        DriverErrorKind::AlreadyInitialized => HandlerError::AlreadyInitialized,
        DriverErrorKind::InvalidParameter => HandlerError::InvalidParameter,
        DriverErrorKind::OutOfMemory => HandlerError::ResourceExhausted,
        DriverErrorKind::BusReadFailed
        | DriverErrorKind::BusWriteFailed
        | DriverErrorKind::DeviceNotFound => HandlerError::CommunicationFailure,
        DriverErrorKind::InvalidReading | DriverErrorKind::ValueOutOfRange => {
            HandlerError::OutOfRange
        }
        DriverErrorKind::Timeout => HandlerError::Timeout,
        DriverErrorKind::CalibrationFailed => HandlerError::CalibrationFailed,
        DriverErrorKind::HardwareFault => HandlerError::HardwareFault,
        DriverErrorKind::UnsupportedOperation => HandlerError::Unsupported,
        DriverErrorKind::ConversionFailed
        | DriverErrorKind::LookupTableError
        | DriverErrorKind::Failure
        | DriverErrorKind::Unknown(_) => HandlerError::Failure,
    }
}

/// Translates any [`DriverError`] value.
#[inline]
pub fn translate_error<E: DriverError>(err: &E) -> HandlerError {
    translate(err.kind())
}
