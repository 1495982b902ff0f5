//! The B+ tree engine.

use crate::datum::Datum;
use crate::internal::InternalLayout;
use crate::iter::TreeIter;
use crate::leaf::LeafLayout;
use crate::node;
use lattice_common::{
    LatticeError, PageId, Result, TreeOptions, INVALID_PAGE_ID, META_PAGE_ID, PAGE_SIZE,
};
use lattice_pager::{BufferPoolManager, DiskManager, PageGuard};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::marker::PhantomData;
use std::path::Path;
use tempfile::TempPath;
use tracing::{debug, trace, warn};

#[derive(Clone, Copy)]
enum WriteOp {
    Insert,
    Remove,
}

/// Latch protecting a node's position in the tree during descent: either
/// the root pointer lock (for the root node) or the parent's read latch.
/// Held purely for its release timing.
#[allow(dead_code)]
enum Prot<'a> {
    None,
    Root(RwLockReadGuard<'a, PageId>),
    Page(PageGuard<'a>),
}

/// Outcome of an optimistic descent.
enum LeafProbe<'a> {
    Empty,
    Found { leaf: PageGuard<'a>, is_root: bool },
}

/// Write latches accumulated by a pessimistic descent, root-side first.
/// Dropping releases the root lock and then the pages in descent order.
struct WriteSet<'a> {
    root_lock: Option<RwLockWriteGuard<'a, PageId>>,
    pages: Vec<PageGuard<'a>>,
}

/// A disk-backed ordered map from fixed-width keys to fixed-width values.
///
/// Point operations are linearizable with respect to each other; structural
/// changes are coordinated by per-page latches with crabbing plus an outer
/// lock on the root pointer. Dropping the tree flushes all dirty pages and
/// persists the root id to the meta page.
pub struct BPlusTree<K: Datum + Ord, V: Datum> {
    pool: BufferPoolManager,
    root: RwLock<PageId>,
    leaf_max: usize,
    internal_max: usize,
    /// Backing file for in-memory trees, deleted when the tree drops.
    _temp: Option<TempPath>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: Datum + Ord, V: Datum> BPlusTree<K, V> {
    /// Opens (or creates) a tree stored in the file at `path`, with the
    /// given leaf and internal fanouts and default pager settings.
    pub fn open(path: impl AsRef<Path>, leaf_max_size: usize, internal_max_size: usize) -> Result<Self> {
        Self::open_with(path, TreeOptions::new(leaf_max_size, internal_max_size))
    }

    /// Opens (or creates) a tree with explicit options.
    pub fn open_with(path: impl AsRef<Path>, opts: TreeOptions) -> Result<Self> {
        Self::build(path.as_ref(), opts, None)
    }

    /// A tree backed by a temporary file that is deleted on drop. The
    /// backing file never outlives the tree, so fsync is disabled.
    pub fn new_in_memory(leaf_max_size: usize, internal_max_size: usize) -> Result<Self> {
        let temp = tempfile::NamedTempFile::new()?.into_temp_path();
        let mut opts = TreeOptions::new(leaf_max_size, internal_max_size);
        opts.pager.fsync = false;
        let path = temp.to_path_buf();
        Self::build(&path, opts, Some(temp))
    }

    fn build(path: &Path, opts: TreeOptions, temp: Option<TempPath>) -> Result<Self> {
        Self::validate(&opts)?;

        let disk = DiskManager::open(path, opts.pager.fsync)?;
        let pool = BufferPoolManager::new(disk, opts.pager.pool_size);

        // A fresh file gets its meta page materialized up front so node
        // allocation starts at page 1.
        if pool.disk().num_pages() == 0 {
            let mut meta = pool.new_page()?;
            if meta.page_id() != META_PAGE_ID {
                return Err(LatticeError::Corrupted(format!(
                    "fresh file allocated {} as its first page",
                    meta.page_id()
                )));
            }
            meta.set_dirty();
            drop(meta);
            pool.flush_page(META_PAGE_ID)?;
        }

        let root_id = {
            let meta = pool.fetch_read(META_PAGE_ID)?;
            let data = meta.data();
            let raw = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            // Zero (fresh file) and -1 both mean an empty tree.
            if raw <= 0 {
                INVALID_PAGE_ID
            } else {
                PageId(raw)
            }
        };
        debug!(path = %path.display(), root = %root_id, "opened tree");

        Ok(Self {
            pool,
            root: RwLock::new(root_id),
            leaf_max: opts.leaf_max_size,
            internal_max: opts.internal_max_size,
            _temp: temp,
            _marker: PhantomData,
        })
    }

    fn validate(opts: &TreeOptions) -> Result<()> {
        if opts.leaf_max_size < 3 {
            return Err(LatticeError::InvalidParameter {
                name: "leaf_max_size",
                value: opts.leaf_max_size.to_string(),
            });
        }
        if opts.internal_max_size < 3 {
            return Err(LatticeError::InvalidParameter {
                name: "internal_max_size",
                value: opts.internal_max_size.to_string(),
            });
        }
        if LeafLayout::<K, V>::bytes_required(opts.leaf_max_size) > PAGE_SIZE {
            return Err(LatticeError::InvalidParameter {
                name: "leaf_max_size",
                value: format!("{} (layout exceeds page size)", opts.leaf_max_size),
            });
        }
        if InternalLayout::<K>::bytes_required(opts.internal_max_size) > PAGE_SIZE {
            return Err(LatticeError::InvalidParameter {
                name: "internal_max_size",
                value: format!("{} (layout exceeds page size)", opts.internal_max_size),
            });
        }
        if opts.pager.pool_size == 0 {
            return Err(LatticeError::InvalidParameter {
                name: "pool_size",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &BufferPoolManager {
        &self.pool
    }

    pub(crate) fn leaf_layout(&self) -> LeafLayout<K, V> {
        LeafLayout::new(self.leaf_max)
    }

    fn internal_layout(&self) -> InternalLayout<K> {
        InternalLayout::new(self.internal_max)
    }

    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Number of levels from the root down to the leaves; 0 when empty.
    pub fn height(&self) -> Result<usize> {
        let root_lock = self.root.read();
        let root_id = *root_lock;
        if !root_id.is_valid() {
            return Ok(0);
        }
        let il = self.internal_layout();

        let mut cur = self.pool.fetch_read(root_id)?;
        drop(root_lock);
        let mut height = 1;
        while !node::is_leaf(cur.data()) {
            let child = il.first_child(cur.data());
            if !child.is_valid() {
                return Err(LatticeError::Corrupted(format!(
                    "internal {} points to an invalid child",
                    cur.page_id()
                )));
            }
            cur = self.pool.fetch_read(child)?;
            height += 1;
        }
        Ok(height)
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let lf = self.leaf_layout();
        match self.find_leaf_read(Some(key))? {
            None => Ok(None),
            Some(leaf) => Ok(lf.get(leaf.data(), key)),
        }
    }

    /// Inserts a key/value pair. Returns false (mutating nothing) when the
    /// key is already present.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let lf = self.leaf_layout();
        match self.find_leaf_optimistic(key)? {
            LeafProbe::Empty => {}
            LeafProbe::Found { mut leaf, is_root } => {
                if lf.get(leaf.data(), key).is_some() {
                    return Ok(false);
                }
                if self.is_safe(leaf.data(), is_root, WriteOp::Insert) {
                    lf.insert(leaf.data_mut(), key, value);
                    leaf.set_dirty();
                    return Ok(true);
                }
                // The leaf may split; retry with the full write path.
            }
        }
        self.insert_pessimistic(key, value)
    }

    /// Removes a key. Absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        let lf = self.leaf_layout();
        match self.find_leaf_optimistic(key)? {
            LeafProbe::Empty => return Ok(()),
            LeafProbe::Found { mut leaf, is_root } => {
                if lf.get(leaf.data(), key).is_none() {
                    return Ok(());
                }
                if self.is_safe(leaf.data(), is_root, WriteOp::Remove) {
                    lf.remove(leaf.data_mut(), key);
                    leaf.set_dirty();
                    return Ok(());
                }
                // The leaf may underflow; retry with the full write path.
            }
        }
        self.remove_pessimistic(key)
    }

    /// Entries with `lo <= key < hi` in ascending key order.
    pub fn range_scan(&self, lo: &K, hi: &K) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        let mut iter = self.iter_from(lo)?;
        while let Some((key, value)) = iter.next_entry()? {
            if key >= *hi {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    /// Forward iterator from the smallest key.
    pub fn iter(&self) -> Result<TreeIter<'_, K, V>> {
        let leaf = self.find_leaf_read(None)?;
        Ok(TreeIter::new(self, leaf, 0))
    }

    /// Forward iterator from the first key not less than `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIter<'_, K, V>> {
        let lf = self.leaf_layout();
        match self.find_leaf_read(Some(key))? {
            None => Ok(TreeIter::new(self, None, 0)),
            Some(leaf) => {
                let idx = lf.find_index(leaf.data(), key);
                Ok(TreeIter::new(self, Some(leaf), idx))
            }
        }
    }

    /// A node is safe for an operation when the operation cannot make it
    /// split (insert) or underflow (remove), so latches above it may be
    /// released during descent.
    fn is_safe(&self, page: &[u8], is_root: bool, op: WriteOp) -> bool {
        let size = node::size(page);
        let leaf = node::is_leaf(page);
        match op {
            WriteOp::Insert => {
                if leaf {
                    size < self.leaf_max - 1
                } else {
                    size < self.internal_max
                }
            }
            WriteOp::Remove => {
                if is_root {
                    if leaf {
                        size > 1
                    } else {
                        size > 2
                    }
                } else if leaf {
                    size > node::min_size(self.leaf_max)
                } else {
                    size > node::min_size(self.internal_max)
                }
            }
        }
    }

    /// Read descent with latch crabbing: the parent's read latch is dropped
    /// as soon as the child's is held. `None` key descends leftmost.
    fn find_leaf_read(&self, key: Option<&K>) -> Result<Option<PageGuard<'_>>> {
        let root_lock = self.root.read();
        let root_id = *root_lock;
        if !root_id.is_valid() {
            return Ok(None);
        }
        let il = self.internal_layout();

        let mut cur = self.pool.fetch_read(root_id)?;
        drop(root_lock);
        loop {
            if node::is_leaf(cur.data()) {
                return Ok(Some(cur));
            }
            let child_id = match key {
                Some(key) => il.lookup(cur.data(), key),
                None => il.first_child(cur.data()),
            };
            if !child_id.is_valid() {
                return Err(LatticeError::Corrupted(format!(
                    "internal {} points to an invalid child",
                    cur.page_id()
                )));
            }
            // Latch the child, then release the parent.
            cur = self.pool.fetch_read(child_id)?;
        }
    }

    /// Optimistic write descent: read latches down to the leaf, then the
    /// leaf's latch is re-taken in write mode while the protection latch
    /// (the parent's read latch, or the root lock when the leaf is the
    /// root) keeps the leaf's key range from shifting underneath us.
    fn find_leaf_optimistic(&self, key: &K) -> Result<LeafProbe<'_>> {
        let root_lock = self.root.read();
        let root_id = *root_lock;
        if !root_id.is_valid() {
            return Ok(LeafProbe::Empty);
        }
        let il = self.internal_layout();

        let mut prot = Prot::Root(root_lock);
        let mut cur = self.pool.fetch_read(root_id)?;
        loop {
            if node::is_leaf(cur.data()) {
                let leaf_id = cur.page_id();
                drop(cur);
                let leaf = self.pool.fetch_write(leaf_id)?;
                drop(prot);
                if !node::is_leaf(leaf.data()) {
                    return Err(LatticeError::Corrupted(format!(
                        "{leaf_id} stopped being a leaf during latch upgrade"
                    )));
                }
                return Ok(LeafProbe::Found {
                    leaf,
                    is_root: leaf_id == root_id,
                });
            }

            // cur is internal, so its own parent latch is no longer needed.
            prot = Prot::None;
            let child_id = il.lookup(cur.data(), key);
            if !child_id.is_valid() {
                return Err(LatticeError::Corrupted(format!(
                    "internal {} points to an invalid child",
                    cur.page_id()
                )));
            }
            let next = self.pool.fetch_read(child_id)?;
            prot = Prot::Page(cur);
            cur = next;
        }
    }

    /// Pessimistic descent: write latches top-down under the exclusive root
    /// lock, releasing everything above a node that is safe for `op`. The
    /// surviving set is the minimal subtree a structural change can touch.
    fn collect_write_path<'a>(
        &'a self,
        root_lock: RwLockWriteGuard<'a, PageId>,
        key: &K,
        op: WriteOp,
    ) -> Result<WriteSet<'a>> {
        let root_id = *root_lock;
        let il = self.internal_layout();

        let mut ws = WriteSet {
            root_lock: Some(root_lock),
            pages: Vec::new(),
        };
        let mut next_id = root_id;
        loop {
            let guard = self.pool.fetch_write(next_id)?;
            if self.is_safe(guard.data(), guard.page_id() == root_id, op) {
                ws.root_lock = None;
                ws.pages.clear();
            }
            let leaf = node::is_leaf(guard.data());
            if !leaf {
                next_id = il.lookup(guard.data(), key);
                if !next_id.is_valid() {
                    return Err(LatticeError::Corrupted(format!(
                        "internal {} points to an invalid child",
                        guard.page_id()
                    )));
                }
            }
            ws.pages.push(guard);
            if leaf {
                return Ok(ws);
            }
        }
    }

    /// Creates the first leaf and makes it the root. The caller holds the
    /// exclusive root lock and has verified the tree is empty.
    fn start_new_tree(
        &self,
        root_lock: &mut RwLockWriteGuard<'_, PageId>,
        key: &K,
        value: &V,
    ) -> Result<()> {
        let lf = self.leaf_layout();

        let mut guard = self.pool.new_page()?;
        lf.init(guard.data_mut());
        lf.insert(guard.data_mut(), key, value);
        guard.set_dirty();
        let root_id = guard.page_id();
        drop(guard);

        **root_lock = root_id;
        self.write_meta(root_id)?;
        debug!(root = %root_id, "created root leaf");
        Ok(())
    }

    fn insert_pessimistic(&self, key: &K, value: &V) -> Result<bool> {
        let mut root_lock = self.root.write();
        if !root_lock.is_valid() {
            return self.start_new_tree(&mut root_lock, key, value).map(|_| true);
        }

        let lf = self.leaf_layout();
        let il = self.internal_layout();
        let mut ws = self.collect_write_path(root_lock, key, WriteOp::Insert)?;
        let leaf_idx = ws.pages.len() - 1;

        {
            let leaf = &mut ws.pages[leaf_idx];
            if lf.get(leaf.data(), key).is_some() {
                return Ok(false);
            }
            if !node::is_full(leaf.data(), self.leaf_max) {
                lf.insert(leaf.data_mut(), key, value);
                leaf.set_dirty();
                return Ok(true);
            }
        }

        // Every page the split cascade will need is allocated before any
        // byte is mutated, so pool exhaustion cannot strand a half-linked
        // sibling.
        let mut fresh = self.allocate_for_splits(&ws, leaf_idx)?.into_iter();
        let mut next_fresh = |step: &str| {
            fresh
                .next()
                .ok_or_else(|| LatticeError::Corrupted(format!("split ran out of pages at {step}")))
        };

        // Split the leaf and place the new entry in the owning half.
        let (mut up_key, mut new_child) = {
            let mut sibling = next_fresh("leaf")?;
            let leaf = &mut ws.pages[leaf_idx];
            lf.init(sibling.data_mut());
            let up_key = lf.split(leaf.data_mut(), sibling.data_mut());
            let old_next = lf.next(leaf.data());
            lf.set_next(sibling.data_mut(), old_next);
            lf.set_next(leaf.data_mut(), sibling.page_id());
            if *key < up_key {
                lf.insert(leaf.data_mut(), key, value);
            } else {
                lf.insert(sibling.data_mut(), key, value);
            }
            leaf.set_dirty();
            sibling.set_dirty();
            trace!(leaf = %leaf.page_id(), sibling = %sibling.page_id(), "split leaf");
            (up_key, sibling.page_id())
        };

        // Walk the separator up the held path.
        let mut level = leaf_idx;
        while level > 0 {
            level -= 1;
            let parent = &mut ws.pages[level];
            if !node::is_full(parent.data(), self.internal_max) {
                il.insert(parent.data_mut(), &up_key, new_child);
                parent.set_dirty();
                return Ok(true);
            }

            let mut sibling = next_fresh("internal")?;
            il.init(sibling.data_mut());
            let promoted = il.split(parent.data_mut(), sibling.data_mut());
            if up_key < promoted {
                il.insert(parent.data_mut(), &up_key, new_child);
            } else {
                il.insert(sibling.data_mut(), &up_key, new_child);
            }
            parent.set_dirty();
            sibling.set_dirty();
            trace!(node = %parent.page_id(), sibling = %sibling.page_id(), "split internal node");
            up_key = promoted;
            new_child = sibling.page_id();
        }

        // The top of the held path split, which only happens while the root
        // lock is still held: grow a new root.
        let Some(mut root_lock) = ws.root_lock.take() else {
            return Err(LatticeError::Corrupted(
                "node split escaped the latched path".to_string(),
            ));
        };
        let new_root_id = {
            let mut new_root = next_fresh("root")?;
            il.init(new_root.data_mut());
            il.populate_new_root(new_root.data_mut(), &up_key, ws.pages[0].page_id(), new_child);
            new_root.set_dirty();
            new_root.page_id()
        };
        *root_lock = new_root_id;
        debug!(root = %new_root_id, "root split, tree grew");
        Ok(true)
    }

    /// Allocates one page per node the cascade will split (the leaf plus
    /// every consecutively full ancestor) and one more if the cascade will
    /// grow a new root.
    fn allocate_for_splits<'a>(
        &'a self,
        ws: &WriteSet<'a>,
        leaf_idx: usize,
    ) -> Result<Vec<PageGuard<'a>>> {
        let mut count = 1;
        let mut level = leaf_idx;
        while level > 0 && node::is_full(ws.pages[level - 1].data(), self.internal_max) {
            level -= 1;
            count += 1;
        }
        if level == 0 {
            // Everything held splits; a new root will be needed.
            count += 1;
        }

        let mut fresh = Vec::with_capacity(count);
        for _ in 0..count {
            fresh.push(self.pool.new_page()?);
        }
        Ok(fresh)
    }

    fn remove_pessimistic(&self, key: &K) -> Result<()> {
        let root_lock = self.root.write();
        if !root_lock.is_valid() {
            return Ok(());
        }

        let lf = self.leaf_layout();
        let mut ws = self.collect_write_path(root_lock, key, WriteOp::Remove)?;
        let mut deleted: Vec<PageId> = Vec::new();

        {
            let leaf_idx = ws.pages.len() - 1;
            let leaf = &mut ws.pages[leaf_idx];
            if !lf.remove(leaf.data_mut(), key) {
                return Ok(());
            }
            leaf.set_dirty();
        }

        let leaf_idx = ws.pages.len() - 1;
        if node::is_underflow(ws.pages[leaf_idx].data(), self.leaf_max) {
            self.repair_underflow(&mut ws, &mut deleted)?;
        }

        // Deallocation waits until every latch in the write set is gone so
        // no concurrent reader can race against frame reuse.
        drop(ws);
        for page_id in deleted {
            if !self.pool.delete_page(page_id) {
                warn!(%page_id, "deferred page delete skipped, page still in use");
            }
        }
        Ok(())
    }

    /// Repairs an underflow at the bottom of the write set, walking up the
    /// held path while merges keep shrinking parents.
    fn repair_underflow(&self, ws: &mut WriteSet<'_>, deleted: &mut Vec<PageId>) -> Result<()> {
        let lf = self.leaf_layout();
        let il = self.internal_layout();

        let mut idx = ws.pages.len() - 1;
        loop {
            let cur_id = ws.pages[idx].page_id();

            if idx == 0 {
                // Top of the held path. Nodes only reach here without a
                // parent in the set when they are the root, which is exempt
                // from the minimum: a non-empty root needs no repair.
                let page = &ws.pages[0];
                let size = node::size(page.data());
                if size > 0 {
                    return Ok(());
                }

                // An empty root changes the root pointer, and descent only
                // releases the root lock above nodes that cannot empty.
                let Some(root_lock) = ws.root_lock.as_mut() else {
                    return Err(LatticeError::Corrupted(
                        "underflow cascade escaped the latched path".to_string(),
                    ));
                };
                if **root_lock != cur_id {
                    return Err(LatticeError::Corrupted(format!(
                        "{cur_id} emptied without a parent but is not the root"
                    )));
                }

                if node::is_leaf(page.data()) {
                    **root_lock = INVALID_PAGE_ID;
                    deleted.push(cur_id);
                    debug!(root = %cur_id, "last key removed, tree is empty");
                } else {
                    let new_root = il.first_child(page.data());
                    **root_lock = new_root;
                    deleted.push(cur_id);
                    debug!(old = %cur_id, new = %new_root, "root collapsed");
                }
                return Ok(());
            }

            let (head, tail) = ws.pages.split_at_mut(idx);
            let parent = &mut head[idx - 1];
            let cur = &mut tail[0];

            let child_idx = il
                .find_child_index(parent.data(), cur_id)
                .ok_or_else(|| {
                    LatticeError::Corrupted(format!("{cur_id} missing from its parent"))
                })?;
            let parent_size = node::size(parent.data());
            let cur_is_leaf = node::is_leaf(cur.data());
            let max = if cur_is_leaf {
                self.leaf_max
            } else {
                self.internal_max
            };

            let mut left = if child_idx > 0 {
                let left_id = il.child_at(parent.data(), child_idx - 1);
                Some(self.pool.fetch_write(left_id)?)
            } else {
                None
            };
            let mut right = if child_idx < parent_size {
                let right_id = il.child_at(parent.data(), child_idx + 1);
                Some(self.pool.fetch_write(right_id)?)
            } else {
                None
            };

            // Prefer borrowing: left first, then right.
            let mut borrowed = false;
            if let Some(left) = left.as_mut() {
                if node::size(left.data()) > node::min_size(max) {
                    if cur_is_leaf {
                        lf.borrow_from_left(cur.data_mut(), left.data_mut());
                        let separator = lf.key_at(cur.data(), 0);
                        il.set_key_at(parent.data_mut(), child_idx - 1, &separator);
                    } else {
                        il.borrow_from_left(
                            cur.data_mut(),
                            left.data_mut(),
                            parent.data_mut(),
                            child_idx - 1,
                        );
                    }
                    cur.set_dirty();
                    left.set_dirty();
                    parent.set_dirty();
                    trace!(node = %cur_id, "borrowed from left sibling");
                    borrowed = true;
                }
            }
            if !borrowed {
                if let Some(right) = right.as_mut() {
                    if node::size(right.data()) > node::min_size(max) {
                        if cur_is_leaf {
                            lf.borrow_from_right(cur.data_mut(), right.data_mut());
                            let separator = lf.key_at(right.data(), 0);
                            il.set_key_at(parent.data_mut(), child_idx, &separator);
                        } else {
                            il.borrow_from_right(
                                cur.data_mut(),
                                right.data_mut(),
                                parent.data_mut(),
                                child_idx,
                            );
                        }
                        cur.set_dirty();
                        right.set_dirty();
                        parent.set_dirty();
                        trace!(node = %cur_id, "borrowed from right sibling");
                        borrowed = true;
                    }
                }
            }
            if borrowed {
                return Ok(());
            }

            // No sibling can spare an entry: merge with one that has room
            // for the combined node (internal merges also absorb the parent
            // separator). The emptied page is only deallocated after all
            // latches release.
            let cur_size = node::size(cur.data());
            let merged_size = |sibling: usize| {
                if cur_is_leaf {
                    sibling + cur_size
                } else {
                    sibling + cur_size + 1
                }
            };
            if let Some(left) = left
                .as_mut()
                .filter(|g| merged_size(node::size(g.data())) <= max)
            {
                if cur_is_leaf {
                    lf.merge(left.data_mut(), cur.data_mut());
                } else {
                    il.merge_into(left.data_mut(), cur.data_mut(), parent.data(), child_idx - 1);
                }
                il.remove_at(parent.data_mut(), child_idx - 1);
                deleted.push(cur_id);
                left.set_dirty();
                parent.set_dirty();
                trace!(node = %cur_id, into = %left.page_id(), "merged into left sibling");
            } else if let Some(right) = right
                .as_mut()
                .filter(|g| merged_size(node::size(g.data())) <= max)
            {
                let right_id = right.page_id();
                if cur_is_leaf {
                    lf.merge(cur.data_mut(), right.data_mut());
                } else {
                    il.merge_into(cur.data_mut(), right.data_mut(), parent.data(), child_idx);
                }
                il.remove_at(parent.data_mut(), child_idx);
                deleted.push(right_id);
                cur.set_dirty();
                parent.set_dirty();
                trace!(node = %right_id, into = %cur_id, "merged right sibling in");
            } else {
                return Err(LatticeError::Corrupted(format!(
                    "{cur_id} underflowed with no sibling able to absorb it"
                )));
            }

            if node::is_underflow(parent.data(), self.internal_max) {
                idx -= 1;
                continue;
            }
            return Ok(());
        }
    }

    /// Writes the root id into the meta page and flushes it.
    fn write_meta(&self, root_id: PageId) -> Result<()> {
        let mut meta = self.pool.fetch_write(META_PAGE_ID)?;
        meta.data_mut()[..4].copy_from_slice(&root_id.0.to_le_bytes());
        meta.set_dirty();
        drop(meta);
        self.pool.flush_page(META_PAGE_ID)?;
        Ok(())
    }
}

impl<K: Datum + Ord, V: Datum> Drop for BPlusTree<K, V> {
    fn drop(&mut self) {
        let root_id = *self.root.get_mut();
        if let Err(e) = self.pool.flush_all() {
            tracing::error!(error = %e, "failed to flush pages on close");
        }
        if let Err(e) = self.write_meta(root_id) {
            tracing::error!(error = %e, "failed to persist root to the meta page");
        }
    }
}
