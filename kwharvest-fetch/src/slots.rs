//! Global concurrency slots per operation class.
//!
//! Each class is a [`Semaphore`] that is only ever acquired with
//! `try_acquire`, so taking a slot either succeeds at once or reports
//! failure. Counters are process-local.

use kwharvest_core::OperationClass;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::warn;

#[derive(Debug)]
struct Slot {
    semaphore: Semaphore,
    max: usize,
    // Serializes explicit releases so `add_permits` never lifts the
    // semaphore above `max`.
    releasing: Mutex<()>,
}

impl Slot {
    fn new(max: usize) -> Self {
        Self {
            semaphore: Semaphore::new(max),
            max,
            releasing: Mutex::new(()),
        }
    }

    fn active(&self) -> usize {
        self.max.saturating_sub(self.semaphore.available_permits())
    }

    fn release(&self) -> bool {
        let _guard = self.releasing.lock().unwrap_or_else(PoisonError::into_inner);
        if self.semaphore.available_permits() >= self.max {
            return false;
        }
        self.semaphore.add_permits(1);
        true
    }
}

/// Occupancy of one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotUsage {
    /// Operation class.
    pub operation: OperationClass,
    /// Slots in use.
    pub active: usize,
    /// Ceiling.
    pub max: usize,
}

/// One non-blocking semaphore per operation class.
#[derive(Debug)]
pub struct GlobalSlots {
    related: Slot,
    docs: Slot,
}

impl GlobalSlots {
    /// Creates slots with the given ceilings.
    pub fn new(related: usize, docs: usize) -> Self {
        Self {
            related: Slot::new(related),
            docs: Slot::new(docs),
        }
    }

    fn slot(&self, operation: OperationClass) -> &Slot {
        match operation {
            OperationClass::Related => &self.related,
            OperationClass::Docs => &self.docs,
        }
    }

    /// Takes a slot that stays held until [`Self::release`]. Never waits.
    pub fn try_acquire(&self, operation: OperationClass) -> bool {
        self.try_permit(operation).map(SlotPermit::keep).is_some()
    }

    /// Takes a slot wrapped in a guard that gives it back on drop.
    pub fn try_permit(&self, operation: OperationClass) -> Option<SlotPermit<'_>> {
        self.slot(operation)
            .semaphore
            .try_acquire()
            .ok()
            .map(|permit| SlotPermit { permit })
    }

    /// Gives a slot back. Releasing an idle class is logged and ignored.
    pub fn release(&self, operation: OperationClass) {
        if !self.slot(operation).release() {
            warn!(operation = %operation, "Released a global slot that was not held");
        }
    }

    /// Slots currently in use for a class.
    pub fn active(&self, operation: OperationClass) -> usize {
        self.slot(operation).active()
    }

    /// Occupancy of every class.
    pub fn usage(&self) -> Vec<SlotUsage> {
        OperationClass::all()
            .iter()
            .map(|&operation| SlotUsage {
                operation,
                active: self.active(operation),
                max: self.slot(operation).max,
            })
            .collect()
    }
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct SlotPermit<'a> {
    permit: SemaphorePermit<'a>,
}

impl SlotPermit<'_> {
    /// Keeps the slot held after the permit is gone; the caller must release it.
    pub fn keep(self) {
        self.permit.forget();
    }
}
