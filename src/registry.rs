//! Fixed-capacity registry mapping small integer handles to live handlers.
//!
//! A timer service can only hand its callback a `u32`. The registry turns
//! that integer back into a handler, or into nothing if the handler has
//! gone away, without ever dereferencing freed memory:
//!
//! - Entries are [`Weak`] references; the registry never owns a handler
//! - A handle is `slot index + 1`; `0` is never issued
//! - The table has its own mutex, independent of any handler's mutex, and
//!   [`resolve`](MonitoringRegistry::resolve) releases it before returning
//!
//! Capacity is a compile-time constant. When the table is full,
//! [`register`](MonitoringRegistry::register) fails with
//! [`HandlerError::ResourceExhausted`]; it never grows.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Weak};
//! use periph_handlers::registry::{MonitorTarget, MonitoringRegistry};
//!
//! struct Probe;
//! impl MonitorTarget for Probe {
//!     fn on_monitor_tick(&self) {}
//! }
//!
//! let registry: MonitoringRegistry<4> = MonitoringRegistry::new();
//! let probe: Arc<dyn MonitorTarget> = Arc::new(Probe);
//!
//! let handle = registry.register(Arc::downgrade(&probe)).unwrap();
//! assert_ne!(handle.raw(), 0);
//! assert!(registry.resolve(handle.raw()).is_some());
//!
//! registry.unregister(handle);
//! assert!(registry.resolve(handle.raw()).is_none());
//! ```

use core::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{HandlerError, Result};

/// Slots in the process-wide registry.
pub const MONITORING_SLOTS: usize = 16;

/// Something a timer tick can be delivered to.
pub trait MonitorTarget: Send + Sync {
    /// Performs one sample and notifies listeners.
    ///
    /// Runs in the timer service's context; must not block unboundedly.
    fn on_monitor_tick(&self);
}

/// Non-zero integer identifying a live registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MonitoringHandle(NonZeroU32);

impl MonitoringHandle {
    /// Wraps a raw handle; `0` is the reserved invalid value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// The integer carried through the timer service.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0.get()
    }

    #[inline]
    const fn slot(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

type Slots<const K: usize> = [Option<Weak<dyn MonitorTarget>>; K];

/// Fixed table of `K` non-owning handler references.
pub struct MonitoringRegistry<const K: usize> {
    slots: Mutex<Slots<K>>,
}

impl<const K: usize> MonitoringRegistry<K> {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new([const { None }; K]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<K>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        K
    }

    /// Stores `target` in the first free slot.
    ///
    /// # Errors
    ///
    /// [`HandlerError::ResourceExhausted`] if every slot is occupied.
    pub fn register(&self, target: Weak<dyn MonitorTarget>) -> Result<MonitoringHandle> {
        let mut slots = self.lock();
        let index = slots
            .iter()
            .position(Option::is_none)
            .ok_or(HandlerError::ResourceExhausted)?;
        slots[index] = Some(target);

        // index < K <= u32::MAX, and index + 1 is never zero
        MonitoringHandle::from_raw(index as u32 + 1).ok_or(HandlerError::Failure)
    }

    /// Clears the slot behind `handle`. Clearing an empty slot is a no-op.
    pub fn unregister(&self, handle: MonitoringHandle) {
        let index = handle.slot();
        if index < K {
            self.lock()[index] = None;
        }
    }

    /// Resolves a raw handle to its live target.
    ///
    /// `None` is the normal outcome for `0`, out-of-range values, cleared
    /// slots, and targets that have been dropped.
    pub fn resolve(&self, raw: u32) -> Option<Arc<dyn MonitorTarget>> {
        let handle = MonitoringHandle::from_raw(raw)?;
        let index = handle.slot();
        if index >= K {
            return None;
        }
        let weak = self.lock()[index].clone()?;
        weak.upgrade()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.lock().iter().filter(|s| s.is_some()).count()
    }
}

impl<const K: usize> Default for MonitoringRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

static MONITORING_REGISTRY: MonitoringRegistry<MONITORING_SLOTS> = MonitoringRegistry::new();

/// The process-wide registry used by handlers and the dispatcher.
#[inline]
pub fn global() -> &'static MonitoringRegistry<MONITORING_SLOTS> {
    &MONITORING_REGISTRY
}

// ============================================================================
// Tests
// ============================================================================
