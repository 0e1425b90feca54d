//!
//! Tables keyed by fragments
//!
//! The key of a table is the dense `total_index` of a fragment of a
//! fixed length. If the whole index space is small, the table is a plain
//! `Vec` (no hashing per lookup); otherwise it falls back to a hash map
//! holding only the occupied slots.
//!
use fnv::FnvHashMap as HashMap;
use serde::{Deserialize, Serialize};

/// Index spaces up to this size use the dense backend.
pub const DENSE_TABLE_LIMIT: usize = 1 << 18;

///
/// Fixed-size table `index -> Option<T>` for `0 <= index < size`.
///
/// Serialized as `(size, occupied entries)` so that an empty table is
/// small regardless of its backend.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    into = "TableEntries<T>",
    try_from = "TableEntries<T>",
    bound(serialize = "T: Clone + Serialize", deserialize = "T: Deserialize<'de>")
)]
pub enum FragmentTable<T> {
    /// slot `i` is `Vec[i]`
    Dense(Vec<Option<T>>),
    /// only occupied slots are stored
    Sparse { size: usize, map: HashMap<usize, T> },
}

impl<T> FragmentTable<T> {
    ///
    /// Create an empty table of `size` slots, choosing the backend by
    /// `DENSE_TABLE_LIMIT`.
    ///
    pub fn new(size: usize) -> Self {
        FragmentTable::with_limit(size, DENSE_TABLE_LIMIT)
    }
    pub fn with_limit(size: usize, dense_limit: usize) -> Self {
        if size <= dense_limit {
            FragmentTable::Dense((0..size).map(|_| None).collect())
        } else {
            FragmentTable::Sparse {
                size,
                map: HashMap::default(),
            }
        }
    }
    /// number of slots
    pub fn size(&self) -> usize {
        match self {
            FragmentTable::Dense(v) => v.len(),
            FragmentTable::Sparse { size, .. } => *size,
        }
    }
    pub fn is_dense(&self) -> bool {
        matches!(self, FragmentTable::Dense(_))
    }
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        debug_assert!(index < self.size());
        match self {
            FragmentTable::Dense(v) => v[index].as_ref(),
            FragmentTable::Sparse { map, .. } => map.get(&index),
        }
    }
    ///
    /// Mutable reference to the slot, filling it with `f()` if empty.
    ///
    #[inline]
    pub fn get_or_insert_with<F: FnOnce() -> T>(&mut self, index: usize, f: F) -> &mut T {
        assert!(index < self.size());
        match self {
            FragmentTable::Dense(v) => v[index].get_or_insert_with(f),
            FragmentTable::Sparse { map, .. } => map.entry(index).or_insert_with(f),
        }
    }
    /// overwrite the slot
    pub fn insert(&mut self, index: usize, value: T) {
        assert!(index < self.size());
        match self {
            FragmentTable::Dense(v) => v[index] = Some(value),
            FragmentTable::Sparse { map, .. } => {
                map.insert(index, value);
            }
        }
    }
    /// number of occupied slots
    pub fn n_occupied(&self) -> usize {
        match self {
            FragmentTable::Dense(v) => v.iter().filter(|x| x.is_some()).count(),
            FragmentTable::Sparse { map, .. } => map.len(),
        }
    }
    ///
    /// Iterator over occupied `(index, value)`.
    ///
    /// Dense tables yield in index order; sparse ones in arbitrary order.
    ///
    pub fn iter(&self) -> Box<dyn Iterator<Item = (usize, &T)> + '_> {
        match self {
            FragmentTable::Dense(v) => Box::new(
                v.iter()
                    .enumerate()
                    .filter_map(|(i, x)| x.as_ref().map(|x| (i, x))),
            ),
            FragmentTable::Sparse { map, .. } => Box::new(map.iter().map(|(&i, x)| (i, x))),
        }
    }
    /// empty all slots, keeping the size and backend
    pub fn clear(&mut self) {
        match self {
            FragmentTable::Dense(v) => v.iter_mut().for_each(|x| *x = None),
            FragmentTable::Sparse { map, .. } => map.clear(),
        }
    }
}

/// serialized form of `FragmentTable`
#[derive(Serialize, Deserialize)]
struct TableEntries<T> {
    size: usize,
    dense: bool,
    entries: Vec<(usize, T)>,
}

impl<T: Clone> From<FragmentTable<T>> for TableEntries<T> {
    fn from(table: FragmentTable<T>) -> Self {
        let mut entries: Vec<(usize, T)> = table.iter().map(|(i, x)| (i, x.clone())).collect();
        entries.sort_by_key(|(i, _)| *i);
        TableEntries {
            size: table.size(),
            dense: table.is_dense(),
            entries,
        }
    }
}

impl<T> TryFrom<TableEntries<T>> for FragmentTable<T> {
    type Error = String;
    fn try_from(t: TableEntries<T>) -> Result<Self, String> {
        if t.dense && t.size > DENSE_TABLE_LIMIT {
            return Err(format!("dense table of size {}", t.size));
        }
        let limit = if t.dense { t.size } else { 0 };
        let mut table = FragmentTable::with_limit(t.size, limit);
        for (i, x) in t.entries {
            if i >= t.size {
                return Err(format!("entry {} out of a table of size {}", i, t.size));
            }
            table.insert(i, x);
        }
        Ok(table)
    }
}
