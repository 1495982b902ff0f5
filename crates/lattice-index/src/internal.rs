//! Internal node layout and mutation primitives.
//!
//! Payload after the header: `keys[0..max]` then `children[0..=max]` as
//! `i32` page ids. A node with `size` keys has `size + 1` live children;
//! every key in `children[i]`'s subtree is less than `keys[i]`, and every
//! key in `children[i+1]`'s subtree is greater or equal.

use crate::datum::Datum;
use crate::node::{self, HEADER_SIZE, KIND_INTERNAL};
use lattice_common::PageId;
use std::marker::PhantomData;

const CHILD_WIDTH: usize = 4;

/// Stateless view over internal pages with `max` key slots.
pub(crate) struct InternalLayout<K> {
    max: usize,
    _marker: PhantomData<fn() -> K>,
}

impl<K: Datum + Ord> InternalLayout<K> {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            _marker: PhantomData,
        }
    }

    /// Bytes an internal node with `max` key slots occupies.
    pub fn bytes_required(max: usize) -> usize {
        HEADER_SIZE + max * K::WIDTH + (max + 1) * CHILD_WIDTH
    }

    #[inline]
    fn key_offset(&self, i: usize) -> usize {
        HEADER_SIZE + i * K::WIDTH
    }

    #[inline]
    fn child_offset(&self, i: usize) -> usize {
        HEADER_SIZE + self.max * K::WIDTH + i * CHILD_WIDTH
    }

    pub fn init(&self, page: &mut [u8]) {
        node::set_kind(page, KIND_INTERNAL);
        node::set_size(page, 0);
    }

    pub fn key_at(&self, page: &[u8], i: usize) -> K {
        K::decode(&page[self.key_offset(i)..])
    }

    pub fn set_key_at(&self, page: &mut [u8], i: usize, key: &K) {
        key.encode(&mut page[self.key_offset(i)..]);
    }

    pub fn child_at(&self, page: &[u8], i: usize) -> PageId {
        let off = self.child_offset(i);
        PageId(i32::from_le_bytes([
            page[off],
            page[off + 1],
            page[off + 2],
            page[off + 3],
        ]))
    }

    pub fn set_child_at(&self, page: &mut [u8], i: usize, child: PageId) {
        let off = self.child_offset(i);
        page[off..off + CHILD_WIDTH].copy_from_slice(&child.0.to_le_bytes());
    }

    /// Upper bound: index of the first live key greater than `key`, which
    /// is also the child slot to descend into.
    fn upper_bound(&self, page: &[u8], key: &K) -> usize {
        let mut lo = 0;
        let mut hi = node::size(page);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if *key < self.key_at(page, mid) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Child to descend into for `key`.
    pub fn lookup(&self, page: &[u8], key: &K) -> PageId {
        self.child_at(page, self.upper_bound(page, key))
    }

    /// Inserts a separator and the child to its right. The caller ensures
    /// the node has room.
    pub fn insert(&self, page: &mut [u8], key: &K, right_child: PageId) {
        let size = node::size(page);
        let idx = self.upper_bound(page, key);

        page.copy_within(
            self.key_offset(idx)..self.key_offset(size),
            self.key_offset(idx + 1),
        );
        page.copy_within(
            self.child_offset(idx + 1)..self.child_offset(size + 1),
            self.child_offset(idx + 2),
        );
        self.set_key_at(page, idx, key);
        self.set_child_at(page, idx + 1, right_child);
        node::set_size(page, size + 1);
    }

    /// Splits `src` around its middle key, which is promoted: keys after it
    /// and their children move into the empty, initialized `dst`, and the
    /// middle key is returned without surviving in either half.
    pub fn split(&self, src: &mut [u8], dst: &mut [u8]) -> K {
        let size = node::size(src);
        let split_point = self.max / 2;
        let up_key = self.key_at(src, split_point);

        let moved_keys = size - split_point - 1;
        let moved_children = size - split_point;

        dst[self.key_offset(0)..self.key_offset(moved_keys)]
            .copy_from_slice(&src[self.key_offset(split_point + 1)..self.key_offset(size)]);
        dst[self.child_offset(0)..self.child_offset(moved_children)].copy_from_slice(
            &src[self.child_offset(split_point + 1)..self.child_offset(size + 1)],
        );

        node::set_size(src, split_point);
        node::set_size(dst, moved_keys);
        up_key
    }

    /// Fills an initialized page as the root produced by a root split.
    pub fn populate_new_root(&self, page: &mut [u8], up_key: &K, left: PageId, right: PageId) {
        self.set_key_at(page, 0, up_key);
        self.set_child_at(page, 0, left);
        self.set_child_at(page, 1, right);
        node::set_size(page, 1);
    }

    /// Slot of `child` in the children array, if present.
    pub fn find_child_index(&self, page: &[u8], child: PageId) -> Option<usize> {
        (0..=node::size(page)).find(|&i| self.child_at(page, i) == child)
    }

    /// Removes `keys[key_idx]` and `children[key_idx + 1]`.
    pub fn remove_at(&self, page: &mut [u8], key_idx: usize) {
        let size = node::size(page);

        page.copy_within(
            self.key_offset(key_idx + 1)..self.key_offset(size),
            self.key_offset(key_idx),
        );
        page.copy_within(
            self.child_offset(key_idx + 2)..self.child_offset(size + 1),
            self.child_offset(key_idx + 1),
        );
        node::set_size(page, size - 1);
    }

    /// First child, the surviving subtree when an internal root collapses.
    pub fn first_child(&self, page: &[u8]) -> PageId {
        self.child_at(page, 0)
    }

    /// Rotates `left`'s last entry through the parent: the separator at
    /// `parent_key_idx` drops into `cur`'s front, `left`'s last child moves
    /// with it, and `left`'s last key replaces the separator.
    pub fn borrow_from_left(
        &self,
        cur: &mut [u8],
        left: &mut [u8],
        parent: &mut [u8],
        parent_key_idx: usize,
    ) {
        let cur_size = node::size(cur);
        let left_size = node::size(left);

        cur.copy_within(
            self.key_offset(0)..self.key_offset(cur_size),
            self.key_offset(1),
        );
        cur.copy_within(
            self.child_offset(0)..self.child_offset(cur_size + 1),
            self.child_offset(1),
        );

        let separator = self.key_at(parent, parent_key_idx);
        self.set_key_at(cur, 0, &separator);
        let moved_child = self.child_at(left, left_size);
        self.set_child_at(cur, 0, moved_child);

        let new_separator = self.key_at(left, left_size - 1);
        self.set_key_at(parent, parent_key_idx, &new_separator);

        node::set_size(cur, cur_size + 1);
        node::set_size(left, left_size - 1);
    }

    /// Rotates `right`'s first entry through the parent: the separator at
    /// `parent_key_idx` drops onto `cur`'s end, `right`'s first child moves
    /// with it, and `right`'s first key replaces the separator.
    pub fn borrow_from_right(
        &self,
        cur: &mut [u8],
        right: &mut [u8],
        parent: &mut [u8],
        parent_key_idx: usize,
    ) {
        let cur_size = node::size(cur);
        let right_size = node::size(right);

        let separator = self.key_at(parent, parent_key_idx);
        self.set_key_at(cur, cur_size, &separator);
        let moved_child = self.child_at(right, 0);
        self.set_child_at(cur, cur_size + 1, moved_child);

        let new_separator = self.key_at(right, 0);
        self.set_key_at(parent, parent_key_idx, &new_separator);

        right.copy_within(
            self.key_offset(1)..self.key_offset(right_size),
            self.key_offset(0),
        );
        right.copy_within(
            self.child_offset(1)..self.child_offset(right_size + 1),
            self.child_offset(0),
        );

        node::set_size(cur, cur_size + 1);
        node::set_size(right, right_size - 1);
    }

    /// Pulls the parent separator at `parent_key_idx` down into `left` and
    /// appends all of `right`'s keys and children after it. The caller
    /// removes the separator from the parent and deallocates `right`.
    pub fn merge_into(
        &self,
        left: &mut [u8],
        right: &mut [u8],
        parent: &[u8],
        parent_key_idx: usize,
    ) {
        let left_size = node::size(left);
        let right_size = node::size(right);

        let separator = self.key_at(parent, parent_key_idx);
        self.set_key_at(left, left_size, &separator);

        left[self.key_offset(left_size + 1)..self.key_offset(left_size + 1 + right_size)]
            .copy_from_slice(&right[self.key_offset(0)..self.key_offset(right_size)]);
        left[self.child_offset(left_size + 1)..self.child_offset(left_size + 2 + right_size)]
            .copy_from_slice(&right[self.child_offset(0)..self.child_offset(right_size + 1)]);

        node::set_size(left, left_size + right_size + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_common::PAGE_SIZE;

    type Layout = InternalLayout<i64>;

    fn new_node(layout: &Layout) -> [u8; PAGE_SIZE] {
        let mut page = [0u8; PAGE_SIZE];
        layout.init(&mut page);
        page
    }

    /// Builds a node with keys [10, 20, ...] and children [100, 101, ...].
    fn build(layout: &Layout, keys: usize) -> [u8; PAGE_SIZE] {
        let mut page = new_node(layout);
        layout.set_child_at(&mut page, 0, PageId(100));
        for i in 0..keys {
            layout.insert(&mut page, &((i as i64 + 1) * 10), PageId(101 + i as i32));
        }
        page
    }

    #[test]
    fn test_internal_init() {
        let layout = Layout::new(4);
        let page = new_node(&layout);
        assert!(!node::is_leaf(&page));
        assert_eq!(node::size(&page), 0);
    }

    #[test]
    fn test_internal_bytes_required() {
        assert_eq!(Layout::bytes_required(4), 8 + 4 * 8 + 5 * 4);
    }

    #[test]
    fn test_internal_insert_and_lookup() {
        let layout = Layout::new(4);
        let page = build(&layout, 3);

        assert_eq!(node::size(&page), 3);
        // keys: 10 20 30, children: 100 101 102 103
        assert_eq!(layout.lookup(&page, &5), PageId(100));
        assert_eq!(layout.lookup(&page, &10), PageId(101));
        assert_eq!(layout.lookup(&page, &15), PageId(101));
        assert_eq!(layout.lookup(&page, &20), PageId(102));
        assert_eq!(layout.lookup(&page, &99), PageId(103));
    }

    #[test]
    fn test_internal_insert_out_of_order() {
        let layout = Layout::new(4);
        let mut page = new_node(&layout);
        layout.set_child_at(&mut page, 0, PageId(1));

        layout.insert(&mut page, &30, PageId(4));
        layout.insert(&mut page, &10, PageId(2));
        layout.insert(&mut page, &20, PageId(3));

        assert_eq!(layout.key_at(&page, 0), 10);
        assert_eq!(layout.key_at(&page, 1), 20);
        assert_eq!(layout.key_at(&page, 2), 30);
        assert_eq!(layout.child_at(&page, 0), PageId(1));
        assert_eq!(layout.child_at(&page, 1), PageId(2));
        assert_eq!(layout.child_at(&page, 2), PageId(3));
        assert_eq!(layout.child_at(&page, 3), PageId(4));
    }

    #[test]
    fn test_internal_split_promotes_middle() {
        let layout = Layout::new(4);
        let mut src = build(&layout, 4);
        let mut dst = new_node(&layout);

        // keys: 10 20 30 40, children: 100..=104, split_point = 2
        let up = layout.split(&mut src, &mut dst);
        assert_eq!(up, 30);

        assert_eq!(node::size(&src), 2);
        assert_eq!(layout.key_at(&src, 0), 10);
        assert_eq!(layout.key_at(&src, 1), 20);
        assert_eq!(layout.child_at(&src, 2), PageId(102));

        assert_eq!(node::size(&dst), 1);
        assert_eq!(layout.key_at(&dst, 0), 40);
        assert_eq!(layout.child_at(&dst, 0), PageId(103));
        assert_eq!(layout.child_at(&dst, 1), PageId(104));
    }

    #[test]
    fn test_internal_populate_new_root() {
        let layout = Layout::new(4);
        let mut page = new_node(&layout);

        layout.populate_new_root(&mut page, &50, PageId(1), PageId(2));

        assert_eq!(node::size(&page), 1);
        assert_eq!(layout.key_at(&page, 0), 50);
        assert_eq!(layout.child_at(&page, 0), PageId(1));
        assert_eq!(layout.child_at(&page, 1), PageId(2));
        assert_eq!(layout.lookup(&page, &49), PageId(1));
        assert_eq!(layout.lookup(&page, &50), PageId(2));
    }

    #[test]
    fn test_internal_find_child_index() {
        let layout = Layout::new(4);
        let page = build(&layout, 3);

        assert_eq!(layout.find_child_index(&page, PageId(100)), Some(0));
        assert_eq!(layout.find_child_index(&page, PageId(102)), Some(2));
        assert_eq!(layout.find_child_index(&page, PageId(103)), Some(3));
        assert_eq!(layout.find_child_index(&page, PageId(999)), None);
    }

    #[test]
    fn test_internal_remove_at() {
        let layout = Layout::new(4);
        let mut page = build(&layout, 3);

        layout.remove_at(&mut page, 1);

        assert_eq!(node::size(&page), 2);
        assert_eq!(layout.key_at(&page, 0), 10);
        assert_eq!(layout.key_at(&page, 1), 30);
        assert_eq!(layout.child_at(&page, 0), PageId(100));
        assert_eq!(layout.child_at(&page, 1), PageId(101));
        assert_eq!(layout.child_at(&page, 2), PageId(103));
    }

    #[test]
    fn test_internal_borrow_from_left() {
        let layout = Layout::new(4);
        let mut parent = new_node(&layout);
        let mut left = build(&layout, 3);
        let mut cur = new_node(&layout);

        // parent separates left | cur at key 40.
        layout.set_child_at(&mut parent, 0, PageId(1));
        layout.insert(&mut parent, &40, PageId(2));

        layout.set_child_at(&mut cur, 0, PageId(200));
        layout.insert(&mut cur, &50, PageId(201));

        layout.borrow_from_left(&mut cur, &mut left, &mut parent, 0);

        // left's last key (30) replaces the separator; the old separator
        // (40) drops into cur with left's last child (103).
        assert_eq!(node::size(&left), 2);
        assert_eq!(node::size(&cur), 2);
        assert_eq!(layout.key_at(&parent, 0), 30);
        assert_eq!(layout.key_at(&cur, 0), 40);
        assert_eq!(layout.child_at(&cur, 0), PageId(103));
        assert_eq!(layout.key_at(&cur, 1), 50);
        assert_eq!(layout.child_at(&cur, 1), PageId(200));
    }

    #[test]
    fn test_internal_borrow_from_right() {
        let layout = Layout::new(4);
        let mut parent = new_node(&layout);
        let mut cur = new_node(&layout);
        let mut right = build(&layout, 3);

        // parent separates cur | right at key 5.
        layout.set_child_at(&mut parent, 0, PageId(1));
        layout.insert(&mut parent, &5, PageId(2));

        layout.set_child_at(&mut cur, 0, PageId(200));
        layout.insert(&mut cur, &3, PageId(201));

        layout.borrow_from_right(&mut cur, &mut right, &mut parent, 0);

        // right's first key (10) replaces the separator; the old separator
        // (5) lands at cur's end with right's first child (100).
        assert_eq!(node::size(&cur), 2);
        assert_eq!(node::size(&right), 2);
        assert_eq!(layout.key_at(&parent, 0), 10);
        assert_eq!(layout.key_at(&cur, 1), 5);
        assert_eq!(layout.child_at(&cur, 2), PageId(100));
        assert_eq!(layout.key_at(&right, 0), 20);
        assert_eq!(layout.child_at(&right, 0), PageId(101));
    }

    #[test]
    fn test_internal_merge_into() {
        let layout = Layout::new(8);
        let mut parent = new_node(&layout);
        let mut left = new_node(&layout);
        let mut right = new_node(&layout);

        layout.set_child_at(&mut parent, 0, PageId(1));
        layout.insert(&mut parent, &15, PageId(2));

        layout.set_child_at(&mut left, 0, PageId(50));
        layout.insert(&mut left, &5, PageId(51));

        layout.set_child_at(&mut right, 0, PageId(100));
        layout.insert(&mut right, &20, PageId(101));
        layout.insert(&mut right, &30, PageId(102));

        layout.merge_into(&mut left, &mut right, &parent, 0);

        // left keys become [5, 15(sep), 20, 30] over children 50 51 100 101 102.
        assert_eq!(node::size(&left), 4);
        assert_eq!(layout.key_at(&left, 0), 5);
        assert_eq!(layout.key_at(&left, 1), 15);
        assert_eq!(layout.key_at(&left, 2), 20);
        assert_eq!(layout.key_at(&left, 3), 30);
        assert_eq!(layout.child_at(&left, 1), PageId(51));
        assert_eq!(layout.child_at(&left, 2), PageId(100));
        assert_eq!(layout.child_at(&left, 4), PageId(102));
    }

    #[test]
    fn test_internal_first_child() {
        let layout = Layout::new(4);
        let page = build(&layout, 2);
        assert_eq!(layout.first_child(&page), PageId(100));
    }
}
