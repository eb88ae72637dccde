//! Bus adapter contract between a transport and a driver library.
//!
//! A driver library only needs three synchronous, bounded-timeout
//! operations from whatever carries its bytes. [`BusAdapter`] states that
//! contract explicitly so drivers can be generic over it with static
//! dispatch.
//!
//! # Implementations
//!
//! | Type | Transport |
//! |------|-----------|
//! | [`MockBus`](crate::hal::MockBus) | Scripted in-memory responses |
//! | `I2cBus` | Any `embedded-hal` 1.0 I2C bus (`embedded-hal` feature) |
//!
//! # Example
//!
//! ```rust
//! use periph_handlers::hal::MockBus;
//! use periph_handlers::traits::BusAdapter;
//!
//! let mut bus = MockBus::new();
//! bus.queue_response(&[0x12, 0x34]);
//!
//! let mut buf = [0u8; 2];
//! assert_eq!(bus.read(&mut buf), Ok(2));
//! assert_eq!(buf, [0x12, 0x34]);
//! assert!(bus.probe());
//! ```

use crate::error::{HandlerError, Result};

/// Synchronous byte transport used by a driver library.
///
/// All operations must be bounded by the transport's timeout; none may
/// block indefinitely.
pub trait BusAdapter: Send {
    /// Transport-specific error.
    type Error: core::fmt::Debug;

    /// Writes `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> core::result::Result<usize, Self::Error>;

    /// Reads into `buf`, returning how many bytes were filled.
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error>;

    /// Returns true if the device answers on the bus.
    fn probe(&mut self) -> bool;

    /// Writes `bytes` then reads into `buf`.
    ///
    /// Default implementation issues the two transfers back to back.
    fn write_read(
        &mut self,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> core::result::Result<usize, Self::Error> {
        self.write(bytes)?;
        self.read(buf)
    }
}

/// Constructs bus adapters on demand.
///
/// Handlers build their bus lazily, on first use, and drop it on
/// deinitialize; a provider is how they get a fresh one each time.
/// Any `FnMut() -> Result<B>` closure is a provider.
pub trait BusProvider: Send {
    /// The adapter this provider builds.
    type Bus: BusAdapter;

    /// Opens a new adapter.
    fn open(&mut self) -> Result<Self::Bus>;
}

impl<B, F> BusProvider for F
where
    B: BusAdapter,
    F: FnMut() -> Result<B> + Send,
{
    type Bus = B;

    fn open(&mut self) -> Result<B> {
        self()
    }
}

/// Provider that hands out one pre-built adapter, once.
///
/// Useful when the transport cannot be cloned: after the first `open()`
/// the handler owns it, and reopening after deinitialize fails with
/// [`HandlerError::ResourceExhausted`].
#[derive(Debug)]
pub struct OnceBus<B>(Option<B>);

impl<B> OnceBus<B> {
    /// Wraps an adapter for a single hand-off.
    pub fn new(bus: B) -> Self {
        Self(Some(bus))
    }
}

impl<B: BusAdapter> BusProvider for OnceBus<B> {
    type Bus = B;

    fn open(&mut self) -> Result<B> {
        self.0.take().ok_or(HandlerError::ResourceExhausted)
    }
}
