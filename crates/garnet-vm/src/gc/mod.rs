//! Memory management for the runtime.
//!
//! There is no collector: heap objects, classes, environments and global
//! cells live in [`Arena`]s addressed by stable [`ArenaRef`] handles. Slots are
//! released explicitly (frame environments that were never captured) and
//! reused through a free list.

pub mod arena;

pub use arena::{Arena, ArenaRef};
