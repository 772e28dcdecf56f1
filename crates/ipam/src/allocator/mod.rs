//! Prefix allocation planning
//!
//! Carves child prefixes out of a parent range using deterministic
//! first-fit over the allocated children read from the store.

mod first_fit;

pub use first_fit::FirstFitAllocator;
