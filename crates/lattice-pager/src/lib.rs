//! Paged storage for lattice.
//!
//! This crate provides the storage substrate under the B+ tree:
//! - Fixed-size page I/O over a single file
//! - A bounded buffer pool with pin counts and dirty tracking
//! - LRU eviction of unpinned frames
//! - Scoped page guards that pair a pin with an optional reader/writer latch

mod disk;
mod frame;
mod guard;
mod pool;
mod replacer;

pub use disk::DiskManager;
pub use frame::{Frame, FrameId};
pub use guard::{LatchMode, PageGuard};
pub use pool::BufferPoolManager;
pub use replacer::{LruReplacer, Replacer};
