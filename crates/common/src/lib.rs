//! Shared types for the snapshot registry: SMRIs, their allocator, and the
//! header every model record carries.
//!
//! # Invariants
//! - An allocator never hands out the same SMRI twice.
//! - `next()` is strictly greater than anything previously returned or adopted.

mod allocator;
mod types;

pub use allocator::SmriAllocator;
pub use types::{ModelHeader, Smri};
