//! Heap allocator and concurrent copy-forward core for segmented ("arraylet")
//! array objects.
//!
//! Large arrays are split across fixed-size leaves referenced from a spine
//! header object, so a collector can satisfy huge array allocations without a
//! single contiguous free region. On targets with page-granularity remapping
//! the discontiguous leaves can additionally be presented as one contiguous
//! virtual range (double mapping) for native code that needs a flat view.
#[macro_use]
extern crate log;

pub mod config;
pub mod double_map;
pub mod heap;
pub mod scheduler;
