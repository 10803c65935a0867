//! Slot index allocation for the connection registry.
//!
//! Indices come from a monotonically increasing counter that wraps once it
//! passes a large bound, so indices are recycled only after roughly two
//! billion admissions. A wrapped counter can land on an index that is still
//! occupied; the allocator probes past collisions up to a fixed budget and
//! reports exhaustion explicitly instead of spinning.

use thiserror::Error;

/// Counter wraps back to the first index past this bound
const INDEX_BOUND: u32 = 2_000_000_000;

/// Occupied indices probed before giving up on an allocation
const PROBE_BUDGET: usize = 1000;

/// No free slot index was found within the probe budget.
///
/// Treated as transient overload: the connection that asked for the slot is
/// rejected, the registry itself stays usable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no free connection slot after {attempts} probes")]
pub struct SlotsExhausted {
    pub attempts: usize,
}

#[derive(Debug)]
pub struct SlotAllocator {
    next: u32,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocates the next free slot index.
    ///
    /// `occupied` reports whether an index is currently registered; the
    /// registry's map removal is the matching release.
    pub fn allocate<F>(&mut self, occupied: F) -> Result<u32, SlotsExhausted>
    where
        F: Fn(u32) -> bool,
    {
        for _ in 0..PROBE_BUDGET {
            self.next = if self.next >= INDEX_BOUND { 1 } else { self.next + 1 };
            if !occupied(self.next) {
                return Ok(self.next);
            }
        }

        Err(SlotsExhausted { attempts: PROBE_BUDGET })
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}
