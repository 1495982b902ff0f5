//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{Frame, FrameId};
use crate::guard::{Latch, PageGuard};
use crate::replacer::{LruReplacer, Replacer};
use lattice_common::{LatticeError, PageId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

struct PoolInner {
    /// Maps resident pages to their frame index.
    page_table: HashMap<PageId, usize>,
    /// Frames that have never held a page, or were freed by delete.
    free_list: Vec<usize>,
}

/// Caches pages in a bounded set of frames.
///
/// One coarse mutex protects the page table and free list; per-frame latches
/// are independent and are only acquired after the mutex is released. Frames
/// with a nonzero pin count are never chosen for eviction.
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    inner: Mutex<PoolInner>,
    replacer: LruReplacer,
    disk: DiskManager,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, pool_size: usize) -> Self {
        let frames: Vec<_> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<_> = (0..pool_size).rev().collect();

        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Pins the page, loading it from disk on a miss, and returns its frame
    /// index. Fails with `BufferPoolFull` only when no frame is free and the
    /// replacer has no victim.
    fn fetch_frame(&self, page_id: PageId) -> Result<usize> {
        if !page_id.is_valid() {
            return Err(LatticeError::PageNotFound { page_id: page_id.0 });
        }

        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.page_table.get(&page_id) {
            self.frames[idx].pin();
            self.replacer.pin(FrameId(idx as u32));
            return Ok(idx);
        }

        let idx = self.obtain_frame(&mut inner)?;
        let frame = &self.frames[idx];

        {
            let mut data = frame.latch_write();
            if let Err(e) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                frame.reset();
                inner.free_list.push(idx);
                return Err(e);
            }
        }

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.set_pin_count(1);
        inner.page_table.insert(page_id, idx);

        Ok(idx)
    }

    /// Finds a reusable frame, writing back a dirty victim before handing
    /// the frame out. Caller holds the pool mutex.
    fn obtain_frame(&self, inner: &mut PoolInner) -> Result<usize> {
        if let Some(idx) = inner.free_list.pop() {
            return Ok(idx);
        }

        let Some(frame_id) = self.replacer.victim() else {
            return Err(LatticeError::BufferPoolFull);
        };
        let idx = frame_id.0 as usize;
        let frame = &self.frames[idx];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            trace!(page_id = %old_page_id, "writing back dirty victim");
            let data = frame.latch_read();
            if let Err(e) = self.disk.write_page(old_page_id, &data) {
                drop(data);
                self.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        inner.page_table.remove(&old_page_id);
        Ok(idx)
    }

    /// Fetches a page and takes its read latch.
    pub fn fetch_read(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let idx = self.fetch_frame(page_id)?;
        let latch = Latch::Read(self.frames[idx].latch_read());
        Ok(PageGuard::new(self, page_id, latch))
    }

    /// Fetches a page and takes its write latch.
    pub fn fetch_write(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let idx = self.fetch_frame(page_id)?;
        let latch = Latch::Write(self.frames[idx].latch_write());
        Ok(PageGuard::new(self, page_id, latch))
    }

    /// Fetches a page and tries its read latch without blocking. Returns
    /// `Ok(None)` and drops the pin when the latch is unavailable.
    pub fn try_fetch_read(&self, page_id: PageId) -> Result<Option<PageGuard<'_>>> {
        let idx = self.fetch_frame(page_id)?;
        match self.frames[idx].try_latch_read() {
            Some(latch) => Ok(Some(PageGuard::new(self, page_id, Latch::Read(latch)))),
            None => {
                self.unpin_page(page_id, false);
                Ok(None)
            }
        }
    }

    /// Allocates a fresh zeroed page, pinned and write-latched.
    pub fn new_page(&self) -> Result<PageGuard<'_>> {
        let (idx, page_id) = {
            let mut inner = self.inner.lock();
            let idx = self.obtain_frame(&mut inner)?;
            let page_id = self.disk.allocate_page();

            let frame = &self.frames[idx];
            frame.latch_write().fill(0);
            frame.set_page_id(page_id);
            frame.set_dirty(false);
            frame.set_pin_count(1);
            inner.page_table.insert(page_id, idx);
            (idx, page_id)
        };

        let latch = Latch::Write(self.frames[idx].latch_write());
        Ok(PageGuard::new(self, page_id, latch))
    }

    /// Drops one pin. Sets the dirty flag when requested; hands the frame to
    /// the replacer when the pin count reaches zero. Returns false if the
    /// page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let inner = self.inner.lock();
        let Some(&idx) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[idx];
        if frame.pin_count() == 0 {
            return false;
        }

        if dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(FrameId(idx as u32));
        }
        true
    }

    /// Writes a resident page to disk regardless of its dirty flag and
    /// clears the flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let inner = self.inner.lock();
        let Some(&idx) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[idx];
        let data = frame.latch_read();
        self.disk.write_page(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every resident dirty page to disk.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.inner.lock();
        for (&page_id, &idx) in inner.page_table.iter() {
            let frame = &self.frames[idx];
            if frame.is_dirty() {
                let data = frame.latch_read();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Removes a page from the pool and returns its frame to the free list.
    /// Vacuously succeeds when the page is not resident; refuses pinned
    /// pages.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        let Some(&idx) = inner.page_table.get(&page_id) else {
            return true;
        };
        let frame = &self.frames[idx];
        if frame.is_pinned() {
            return false;
        }

        inner.page_table.remove(&page_id);
        self.replacer.pin(FrameId(idx as u32));
        frame.reset();
        inner.free_list.push(idx);
        self.disk.deallocate_page(page_id);
        true
    }
}
