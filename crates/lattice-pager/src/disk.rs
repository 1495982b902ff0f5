//! Disk manager for page-level file I/O.

use lattice_common::{PageId, Result, PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

/// Reads and writes fixed-size pages from a single backing file.
///
/// Page `id` lives at byte offset `id * PAGE_SIZE`. Reads past the end of
/// file succeed and yield zero-filled bytes, so freshly allocated pages read
/// as zero. Allocation is append-only; deallocated ids are never reused.
pub struct DiskManager {
    file: Mutex<File>,
    path: PathBuf,
    /// Next page id to hand out, seeded from the file size at open.
    next_page_id: AtomicI32,
    fsync: bool,
}

impl DiskManager {
    /// Opens the backing file, creating it if absent.
    pub fn open(path: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as i32;
        debug!(path = %path.display(), num_pages, "opened database file");

        Ok(Self {
            file: Mutex::new(file),
            path,
            next_page_id: AtomicI32::new(num_pages),
            fsync,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a page into `buf`. Reads beyond the end of file zero-fill.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();

        let len = file.metadata()?.len();
        if page_id.offset() >= len {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(page_id.offset()))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                // Short file tail reads as zeros.
                buf[filled..].fill(0);
                break;
            }
            filled += n;
        }
        Ok(())
    }

    /// Writes a page, flushing durably before returning when fsync is on.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.offset()))?;
        file.write_all(buf)?;
        if self.fsync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Returns a fresh, monotonically increasing page id.
    pub fn allocate_page(&self) -> PageId {
        PageId(self.next_page_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Releases a page id. Free-list management is out of scope, so this is
    /// a no-op; the slot stays allocated on disk.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Number of pages the allocator has handed out (or found on disk).
    pub fn num_pages(&self) -> i32 {
        self.next_page_id.load(Ordering::Acquire)
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}
