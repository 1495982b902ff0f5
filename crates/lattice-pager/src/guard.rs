//! Scoped page guards.

use crate::pool::BufferPoolManager;
use lattice_common::{PageId, PAGE_SIZE};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

/// Latch held by a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    None,
    Read,
    Write,
}

pub(crate) enum Latch<'a> {
    None,
    Read(RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>),
    Write(RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>),
}

/// A pinned page, optionally latched.
///
/// Dropping the guard releases the latch first and then unpins the frame
/// with the guard's dirty flag, so the unlatch-before-unpin ordering holds
/// on every path, including early returns. Guards are the only way engine
/// code touches page bytes.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    latch: Latch<'a>,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, page_id: PageId, latch: Latch<'a>) -> Self {
        Self {
            pool,
            page_id,
            latch,
            dirty: false,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn mode(&self) -> LatchMode {
        match self.latch {
            Latch::None => LatchMode::None,
            Latch::Read(_) => LatchMode::Read,
            Latch::Write(_) => LatchMode::Write,
        }
    }

    /// Marks the page dirty; propagated to the pool on release.
    #[inline]
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Page bytes. The guard must hold a latch.
    #[inline]
    pub fn data(&self) -> &[u8] {
        match &self.latch {
            Latch::Read(g) => &g[..],
            Latch::Write(g) => &g[..],
            Latch::None => panic!("page {} accessed without a latch", self.page_id),
        }
    }

    /// Mutable page bytes. The guard must hold the write latch.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.latch {
            Latch::Write(g) => &mut g[..],
            _ => panic!("page {} mutated without the write latch", self.page_id),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        // Unlatch, then unpin.
        self.latch = Latch::None;
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("mode", &self.mode())
            .field("dirty", &self.dirty)
            .finish()
    }
}
