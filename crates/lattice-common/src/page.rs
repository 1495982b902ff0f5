//! Page identifiers and size constants.

use serde::{Deserialize, Serialize};

/// Page size in bytes. Pages are the unit of I/O, caching, and latching.
pub const PAGE_SIZE: usize = 4096;

/// Identifier of a page within the backing file.
///
/// Page offsets are `id * PAGE_SIZE`. Negative ids are sentinels; page 0 is
/// reserved for the meta page that records the index root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// The reserved meta page holding the root page id.
pub const META_PAGE_ID: PageId = PageId(0);

impl PageId {
    /// Returns true unless this is the invalid sentinel.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page in the backing file.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
