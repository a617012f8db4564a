use std::sync::atomic::{AtomicU32, Ordering};

use crate::Smri;

/// Issues SMRIs in strictly increasing order.
///
/// One allocator belongs to one registry (shared through an `Arc` when a
/// registry is built with an injected allocator). All state transitions are
/// single atomic operations, so `next` and `adopt` may be called from any
/// thread without extra locking.
#[derive(Debug, Default)]
pub struct SmriAllocator {
    last: AtomicU32,
}

impl SmriAllocator {
    /// A fresh allocator. The first `next()` returns `Smri(1)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator that continues after `last`.
    pub fn starting_after(last: Smri) -> Self {
        Self {
            last: AtomicU32::new(last.0),
        }
    }

    /// Allocate the next SMRI.
    ///
    /// # Panics
    /// When the `u32` space is exhausted. Wrapping would reissue live identifiers.
    pub fn next(&self) -> Smri {
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
        {
            Ok(prev) => Smri(prev + 1),
            Err(_) => panic!("SMRI space exhausted"),
        }
    }

    /// Raise the counter to at least `smri` so later allocations never collide
    /// with an identifier that was inserted from outside (e.g. on load).
    /// Never lowers the counter.
    pub fn adopt(&self, smri: Smri) {
        let prev = self.last.fetch_max(smri.0, Ordering::AcqRel);
        if smri.0 > prev {
            tracing::trace!(from = prev, to = smri.0, "allocator adopted SMRI");
        }
    }

    /// The highest SMRI returned or adopted so far.
    pub fn current(&self) -> Smri {
        Smri(self.last.load(Ordering::Acquire))
    }
}
