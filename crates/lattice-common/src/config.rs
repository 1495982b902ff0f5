//! Configuration for the pager and the B+ tree.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of frames in the buffer pool.
pub const POOL_SIZE: usize = 64;

/// Latch wait budget. Declared for callers that want to build timeouts on
/// top of the engine; in-flight operations are never cancelled by it.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Buffer pool and disk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagerConfig {
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// Enable fsync after page writes.
    pub fsync: bool,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            pool_size: POOL_SIZE,
            fsync: true,
        }
    }
}

impl PagerConfig {
    /// Sizes the pool to 25% of available system RAM, with a floor of
    /// 1,000 frames so low-memory systems still cache usefully.
    pub fn auto_sized() -> Self {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let pool_size = (target_bytes / PAGE_SIZE).max(1_000);

        Self {
            pool_size,
            fsync: true,
        }
    }

    /// Total pool size in bytes.
    pub fn pool_size_bytes(&self) -> usize {
        self.pool_size * PAGE_SIZE
    }
}

/// B+ tree shape settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeOptions {
    /// Maximum keys per leaf node.
    pub leaf_max_size: usize,
    /// Maximum keys per internal node.
    pub internal_max_size: usize,
    /// Pager settings for the backing file.
    pub pager: PagerConfig,
}

impl TreeOptions {
    /// Options with the given node fanouts and default pager settings.
    pub fn new(leaf_max_size: usize, internal_max_size: usize) -> Self {
        Self {
            leaf_max_size,
            internal_max_size,
            pager: PagerConfig::default(),
        }
    }
}
