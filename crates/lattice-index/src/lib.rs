//! Concurrent disk-backed B+ tree index.
//!
//! An ordered map over fixed-size pages: point lookup, ordered insertion,
//! deletion, forward iteration, and half-open range scans, with per-page
//! reader/writer latching and latch crabbing for concurrent access.
//!
//! ```no_run
//! use lattice_index::BPlusTree;
//!
//! let tree: BPlusTree<i64, i64> = BPlusTree::open("index.db", 64, 64)?;
//! tree.insert(&1, &10)?;
//! assert_eq!(tree.get(&1)?, Some(10));
//! # Ok::<(), lattice_index::LatticeError>(())
//! ```

pub mod datum;
mod internal;
mod iter;
mod leaf;
mod node;
mod tree;

pub use datum::Datum;
pub use iter::TreeIter;
pub use tree::BPlusTree;

pub use lattice_common::{LatticeError, PagerConfig, Result, TreeOptions};
