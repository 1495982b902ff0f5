//! Buffer pool frames.

use lattice_common::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Index of a frame within the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A slot in the buffer pool holding one page.
///
/// The data lock doubles as the per-page reader/writer latch: page bytes are
/// only reachable through it. Pin count and dirty flag are atomics mutated
/// under the pool's coarse mutex.
pub struct Frame {
    /// The page currently stored in this frame, INVALID when empty.
    page_id: AtomicI32,
    /// Page bytes behind the reader/writer latch.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of users currently holding this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was loaded.
    is_dirty: AtomicBool,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page_id: AtomicI32::new(INVALID_PAGE_ID.0),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count, returning the new count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count, returning the new count. Saturates at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.load(Ordering::Acquire);
        if prev == 0 {
            return 0;
        }
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Takes the read latch on the page bytes.
    #[inline]
    pub fn latch_read(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Takes the write latch on the page bytes.
    #[inline]
    pub fn latch_write(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Tries the read latch without blocking.
    #[inline]
    pub fn try_latch_read(&self) -> Option<RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>>> {
        self.data.try_read()
    }

    /// Zeroes the data and clears all metadata.
    pub fn reset(&self) {
        self.page_id.store(INVALID_PAGE_ID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = Frame::new();
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_pin_unpin() {
        let frame = Frame::new();

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert!(frame.is_pinned());

        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_frame_unpin_saturates_at_zero() {
        let frame = Frame::new();
        assert_eq!(frame.unpin(), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_dirty_flag() {
        let frame = Frame::new();
        frame.set_dirty(true);
        assert!(frame.is_dirty());
        frame.set_dirty(false);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_data_latching() {
        let frame = Frame::new();

        {
            let mut data = frame.latch_write();
            data[0] = 0xAB;
            data[1] = 0xCD;
        }
        {
            let data = frame.latch_read();
            assert_eq!(data[0], 0xAB);
            assert_eq!(data[1], 0xCD);
        }
    }

    #[test]
    fn test_frame_try_latch_read_fails_under_writer() {
        let frame = Frame::new();
        let _w = frame.latch_write();
        assert!(frame.try_latch_read().is_none());
    }

    #[test]
    fn test_frame_try_latch_read_shares_with_readers() {
        let frame = Frame::new();
        let _r = frame.latch_read();
        assert!(frame.try_latch_read().is_some());
    }

    #[test]
    fn test_frame_reset() {
        let frame = Frame::new();
        frame.set_page_id(PageId(9));
        frame.pin();
        frame.set_dirty(true);
        frame.latch_write()[0] = 0xFF;

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.latch_read()[0], 0);
    }
}
