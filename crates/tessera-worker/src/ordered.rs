//! In-order release of results that arrive out of order.

use std::collections::BTreeMap;

/// Holds completed-but-undelivered items keyed by index and releases
/// them strictly in ascending index order.
///
/// The cursor starts at 0 and advances by one per released item, so
/// item `i` is never released before item `i - 1`.
#[derive(Debug)]
pub struct OrderedRows<T> {
    parked: BTreeMap<usize, T>,
    next: usize,
    total: usize,
}

impl<T> OrderedRows<T> {
    /// Buffer for `total` items indexed `0..total`.
    #[must_use]
    pub const fn new(total: usize) -> Self {
        Self {
            parked: BTreeMap::new(),
            next: 0,
            total,
        }
    }

    /// Park the item for `index`.
    ///
    /// Returns `false` and drops the item if `index` is out of range,
    /// already released, or already parked.
    pub fn insert(&mut self, index: usize, item: T) -> bool {
        if index < self.next || index >= self.total || self.parked.contains_key(&index) {
            log::warn!("ignoring unexpected result for row {index}");
            return false;
        }
        self.parked.insert(index, item);
        true
    }

    /// Release the item at the cursor, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        let item = self.parked.remove(&self.next)?;
        let index = self.next;
        self.next += 1;
        Some((index, item))
    }

    /// Index of the next item to release.
    #[must_use]
    pub const fn next_index(&self) -> usize {
        self.next
    }

    /// Items that arrived ahead of the cursor.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    /// Whether every item has been released.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.next >= self.total
    }
}
