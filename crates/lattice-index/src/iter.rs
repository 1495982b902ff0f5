//! Forward iteration over the leaf chain.

use crate::datum::Datum;
use crate::node;
use crate::tree::BPlusTree;
use lattice_common::Result;
use lattice_pager::PageGuard;

/// Forward iterator holding a pinned, read-latched leaf and a position.
///
/// Advancing to the next leaf acquires its read latch before releasing the
/// current one, but never blocks on it: if a writer holds the sibling, the
/// iterator ends early instead of risking a deadlock through the leaf
/// chain. Dropping the iterator releases its latch and pin.
pub struct TreeIter<'a, K: Datum + Ord, V: Datum> {
    tree: &'a BPlusTree<K, V>,
    leaf: Option<PageGuard<'a>>,
    idx: usize,
}

impl<'a, K: Datum + Ord, V: Datum> TreeIter<'a, K, V> {
    pub(crate) fn new(tree: &'a BPlusTree<K, V>, leaf: Option<PageGuard<'a>>, idx: usize) -> Self {
        Self { tree, leaf, idx }
    }

    /// Next entry, or `None` at the end of the chain. Errors from fetching
    /// the next leaf propagate; the iterator is finished afterwards.
    pub fn next_entry(&mut self) -> Result<Option<(K, V)>> {
        let lf = self.tree.leaf_layout();
        loop {
            let next_id = {
                let Some(guard) = self.leaf.as_ref() else {
                    return Ok(None);
                };
                let data = guard.data();
                if self.idx < node::size(data) {
                    let key = lf.key_at(data, self.idx);
                    let value = lf.value_at(data, self.idx);
                    self.idx += 1;
                    return Ok(Some((key, value)));
                }
                lf.next(data)
            };

            if !next_id.is_valid() {
                self.leaf = None;
                return Ok(None);
            }

            match self.tree.pool().try_fetch_read(next_id) {
                // The next latch is held before the current one is dropped
                // by the assignment.
                Ok(Some(next_guard)) => {
                    self.leaf = Some(next_guard);
                    self.idx = 0;
                }
                Ok(None) => {
                    // Sibling latch contended: end rather than block.
                    self.leaf = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.leaf = None;
                    return Err(e);
                }
            }
        }
    }
}

impl<K: Datum + Ord, V: Datum> Iterator for TreeIter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.next_entry().ok().flatten()
    }
}
